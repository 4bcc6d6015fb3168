//! File operations behind the perimeter.
//!
//! This module provides:
//! - Directory listing of the shared and uploads areas
//! - Download resolution and streaming uploads
//! - Upload file name sanitizing and collision numbering
//! - Content types by extension
//!
//! # Security
//!
//! Every path a handler touches goes through the [`ContainmentValidator`] of
//! the area it was requested in. Client file names are reduced to a single
//! sanitized component before anything is created on disk.
//!
//! [`ContainmentValidator`]: perimeter::ContainmentValidator

pub mod browser;
pub mod mime;
pub mod sanitize;
pub mod transfer;

pub use browser::{Area, BrowseError, DirectoryItem, DirectoryListing, FileItem, ShareAreas};
pub use mime::mime_for_name;
pub use sanitize::{create_unique_file, sanitize_file_name};
pub use transfer::{
    content_disposition, prepare_download, prepare_upload_dir, DownloadTarget, SavedFile,
    TransferError, UploadBatch,
};
