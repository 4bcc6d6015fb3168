//! Directory listing for the shared and uploads areas.
//!
//! Each area has its own [`ContainmentValidator`]; a path is only ever
//! validated against the area it was requested in. Listings skip dot-files,
//! the uploads directory when browsing the shared area, and symbolic links
//! that lead outside the area.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use perimeter::{ContainmentError, ContainmentPolicy, ContainmentRoot, ContainmentValidator};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during directory browsing.
#[derive(Debug, Error)]
pub enum BrowseError {
    /// The requested path failed containment.
    #[error("invalid path: {0}")]
    Containment(#[from] ContainmentError),

    /// The requested directory does not exist.
    #[error("directory not found: {0}")]
    DirNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One of the two exposed areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    /// The shared directory, read-only for clients.
    Shared,
    /// The uploads subdirectory.
    Uploads,
}

impl Area {
    /// Name used in query strings and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Shared => "shared",
            Area::Uploads => "uploads",
        }
    }
}

impl FromStr for Area {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(Area::Shared),
            "uploads" => Ok(Area::Uploads),
            _ => Err(()),
        }
    }
}

/// A subdirectory in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryItem {
    /// Entry name.
    pub name: String,
    /// Path relative to the area root, `/`-separated.
    pub path: String,
}

/// A file in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileItem {
    /// Entry name.
    pub name: String,
    /// Path relative to the area root, `/`-separated.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Contents of one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryListing {
    /// The requested path, as given.
    pub path: String,
    /// Subdirectories, sorted by name.
    pub directories: Vec<DirectoryItem>,
    /// Files, sorted by name.
    pub files: Vec<FileItem>,
}

/// The shared root and its uploads subtree, each with its own validator.
#[derive(Debug, Clone)]
pub struct ShareAreas {
    shared: ContainmentValidator,
    uploads: ContainmentValidator,
}

impl ShareAreas {
    /// Build both areas from the shared root and the uploads directory name.
    pub fn new(
        root: ContainmentRoot,
        uploads_dir: &str,
        policy: ContainmentPolicy,
    ) -> perimeter::Result<Self> {
        let uploads_root = ContainmentRoot::child(&root, uploads_dir)?;
        Ok(Self {
            shared: ContainmentValidator::with_policy(root, policy.clone()),
            uploads: ContainmentValidator::with_policy(uploads_root, policy),
        })
    }

    /// Validator for `area`.
    pub fn validator(&self, area: Area) -> &ContainmentValidator {
        match area {
            Area::Shared => &self.shared,
            Area::Uploads => &self.uploads,
        }
    }

    /// Root directory of the shared area.
    pub fn shared_root(&self) -> &Path {
        self.shared.root().path()
    }

    /// Root directory of the uploads area (may not exist yet).
    pub fn uploads_root(&self) -> &Path {
        self.uploads.root().path()
    }

    /// List the directory at `relative` inside `area`.
    pub fn list(&self, area: Area, relative: Option<&str>) -> Result<DirectoryListing, BrowseError> {
        let validator = self.validator(area);
        let requested = relative.unwrap_or_default();
        let dir = validator.validate(relative)?;

        if !dir.is_dir() {
            if area == Area::Uploads && requested.is_empty() {
                return Ok(DirectoryListing::default());
            }
            return Err(BrowseError::DirNotFound(dir));
        }

        let mut listing = DirectoryListing {
            path: requested.to_string(),
            ..Default::default()
        };

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }

            let entry_path = dir.join(&name);
            if area == Area::Shared && entry_path == self.uploads_root() {
                continue;
            }

            let Some(relative_path) = validator.relative_display(&entry_path) else {
                continue;
            };

            if entry.file_type()?.is_symlink() && validator.validate(Some(&relative_path)).is_err() {
                debug!(path = %entry_path.display(), "Hiding symlink that leaves the area");
                continue;
            }

            // Follows in-area symlinks; dangling links are skipped.
            let Ok(metadata) = fs::metadata(&entry_path) else {
                continue;
            };

            if metadata.is_dir() {
                listing.directories.push(DirectoryItem {
                    name,
                    path: relative_path,
                });
            } else if metadata.is_file() {
                let modified = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_default();
                listing.files.push(FileItem {
                    name,
                    path: relative_path,
                    size: metadata.len(),
                    modified,
                });
            }
        }

        listing.directories.sort_by(|a, b| a.name.cmp(&b.name));
        listing.files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }
}
