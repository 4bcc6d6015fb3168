//! Streaming downloads and uploads.
//!
//! Downloads resolve a path through the area's [`ContainmentValidator`] and
//! hand the open file to the HTTP layer. Uploads are streamed chunk by chunk
//! into exclusively created files under the uploads area, with a byte budget
//! shared across every file of one request.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use perimeter::{ContainmentError, ContainmentValidator};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::sanitize::{create_unique_file, sanitize_file_name};

/// Name used in `Content-Disposition` when nothing ASCII is left.
const FALLBACK_DOWNLOAD_NAME: &str = "download";

/// RFC 5987 `attr-char`: everything else is percent-encoded.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Errors that can occur during file transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The requested path failed containment.
    #[error("invalid path: {0}")]
    Containment(#[from] ContainmentError),

    /// The requested file does not exist or is not a regular file.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// The request body exceeded the upload budget.
    #[error("upload exceeds limit of {limit} bytes")]
    TooLarge { limit: u64 },

    /// The request body could not be read.
    #[error("malformed upload: {0}")]
    Malformed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file resolved for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// Absolute location on disk.
    pub path: PathBuf,
    /// File name sent to the client.
    pub name: String,
    /// Size in bytes at resolution time.
    pub size: u64,
}

/// Resolve `relative` inside the validator's area to a regular file.
///
/// Blocking; run it off the async executor.
pub fn prepare_download(
    validator: &ContainmentValidator,
    relative: &str,
) -> Result<DownloadTarget, TransferError> {
    let path = validator.validate(Some(relative))?;

    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(TransferError::FileNotFound(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TransferError::FileNotFound(path))
        }
        Err(e) => return Err(e.into()),
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_DOWNLOAD_NAME.to_string());

    Ok(DownloadTarget {
        path,
        name,
        size: metadata.len(),
    })
}

/// `Content-Disposition` value carrying both an ASCII and a UTF-8 name.
pub fn content_disposition(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"' && *c != '\\')
        .collect();
    let ascii = if ascii.trim().is_empty() {
        FALLBACK_DOWNLOAD_NAME
    } else {
        ascii.as_str()
    };

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        utf8_percent_encode(name, ATTR_CHAR)
    )
}

/// Validate the upload target directory and create it on demand.
///
/// Blocking; run it off the async executor.
pub fn prepare_upload_dir(
    validator: &ContainmentValidator,
    relative: Option<&str>,
) -> Result<PathBuf, TransferError> {
    let dir = validator.validate(relative)?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// One file written by an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedFile {
    /// Name sent by the client.
    pub original: String,
    /// Name written to disk.
    pub saved: String,
    /// Bytes written.
    pub size: u64,
}

/// Files written by one upload request, sharing a byte budget.
#[derive(Debug)]
pub struct UploadBatch {
    dir: PathBuf,
    limit: u64,
    received: u64,
    saved: Vec<SavedFile>,
}

impl UploadBatch {
    /// Start a batch writing into `dir` with at most `limit` bytes in total.
    pub fn new(dir: PathBuf, limit: u64) -> Self {
        Self {
            dir,
            limit,
            received: 0,
            saved: Vec::new(),
        }
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Total bytes accepted so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Files saved so far.
    pub fn saved(&self) -> &[SavedFile] {
        &self.saved
    }

    /// Consume the batch, returning the saved files.
    pub fn into_saved(self) -> Vec<SavedFile> {
        self.saved
    }

    /// Stream `chunks` into a new file named after `original`.
    ///
    /// On any error the partially written file is removed.
    pub async fn save<S>(&mut self, original: &str, chunks: S) -> Result<&SavedFile, TransferError>
    where
        S: Stream<Item = Result<Bytes, TransferError>>,
    {
        let sanitized = sanitize_file_name(original);
        let dir = self.dir.clone();
        let (saved_name, file) =
            tokio::task::spawn_blocking(move || create_unique_file(&dir, &sanitized))
                .await
                .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;

        let target = self.dir.join(&saved_name);
        let mut file = tokio::fs::File::from_std(file);

        match self.write_chunks(&mut file, chunks).await {
            Ok(size) => {
                debug!(original, saved = %saved_name, size, "Upload saved");
                self.saved.push(SavedFile {
                    original: original.to_string(),
                    saved: saved_name,
                    size,
                });
                Ok(&self.saved[self.saved.len() - 1])
            }
            Err(e) => {
                drop(file);
                if let Err(remove_err) = tokio::fs::remove_file(&target).await {
                    warn!(path = %target.display(), error = %remove_err, "Failed to remove partial upload");
                }
                Err(e)
            }
        }
    }

    async fn write_chunks<S>(&mut self, file: &mut tokio::fs::File, chunks: S) -> Result<u64, TransferError>
    where
        S: Stream<Item = Result<Bytes, TransferError>>,
    {
        let mut chunks = std::pin::pin!(chunks);
        let mut written = 0u64;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let len = chunk.len() as u64;
            if self.received + len > self.limit {
                return Err(TransferError::TooLarge { limit: self.limit });
            }
            file.write_all(&chunk).await?;
            self.received += len;
            written += len;
        }

        file.flush().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use perimeter::ContainmentRoot;
    use std::fs;
    use tempfile::TempDir;

    fn validator(dir: &TempDir) -> ContainmentValidator {
        ContainmentValidator::new(ContainmentRoot::new(dir.path()).unwrap())
    }

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, TransferError>> {
        stream::iter(parts.iter().map(|p| Ok(Bytes::from_static(p))).collect::<Vec<_>>())
    }

    #[test]
    fn test_prepare_download() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();
        fs::write(dir.path().join("subdir/nested.txt"), b"nested").unwrap();

        let target = prepare_download(&validator(&dir), "subdir/nested.txt").unwrap();
        assert_eq!(target.name, "nested.txt");
        assert_eq!(target.size, 6);
        assert!(target.path.ends_with("subdir/nested.txt"));
    }

    #[test]
    fn test_prepare_download_rejects_directory_and_missing() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();
        let v = validator(&dir);

        assert!(matches!(
            prepare_download(&v, "subdir"),
            Err(TransferError::FileNotFound(_))
        ));
        assert!(matches!(
            prepare_download(&v, "missing.txt"),
            Err(TransferError::FileNotFound(_))
        ));
        assert!(matches!(
            prepare_download(&v, ""),
            Err(TransferError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_prepare_download_traversal() {
        let dir = TempDir::new().unwrap();
        match prepare_download(&validator(&dir), "../etc/passwd") {
            Err(TransferError::Containment(e)) => assert_eq!(e.code(), "PATH_TRAVERSAL"),
            other => panic!("expected containment error, got {other:?}"),
        }
    }

    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report.pdf"
        );
    }

    #[test]
    fn test_content_disposition_unicode_and_quotes() {
        let value = content_disposition("résumé \"v2\".txt");
        assert!(value.starts_with("attachment; filename=\"rsum v2.txt\";"));
        assert!(value.ends_with("filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22.txt"));
    }

    #[test]
    fn test_content_disposition_fallback() {
        let value = content_disposition("日本.txt");
        assert!(value.contains("filename=\".txt\""));

        let value = content_disposition("日本");
        assert!(value.contains("filename=\"download\""));
    }

    #[test]
    fn test_prepare_upload_dir_creates_nested() {
        let dir = TempDir::new().unwrap();
        let created = prepare_upload_dir(&validator(&dir), Some("a/b")).unwrap();
        assert!(created.is_dir());
        assert!(created.ends_with("a/b"));
    }

    #[tokio::test]
    async fn test_upload_batch_saves_and_numbers() {
        let dir = TempDir::new().unwrap();
        let mut batch = UploadBatch::new(dir.path().to_path_buf(), 1024);

        let first = batch
            .save("photo.jpg", chunks(&[b"abc", b"def"]))
            .await
            .unwrap()
            .clone();
        let second = batch
            .save("photo.jpg", chunks(&[b"xyz"]))
            .await
            .unwrap()
            .clone();

        assert_eq!(first.saved, "photo.jpg");
        assert_eq!(first.size, 6);
        assert_eq!(second.saved, "photo (1).jpg");
        assert_eq!(batch.received(), 9);
        assert_eq!(fs::read(dir.path().join("photo.jpg")).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_upload_batch_sanitizes_names() {
        let dir = TempDir::new().unwrap();
        let mut batch = UploadBatch::new(dir.path().to_path_buf(), 1024);

        let saved = batch
            .save("../../evil?.sh", chunks(&[b"x"]))
            .await
            .unwrap();
        assert_eq!(saved.original, "../../evil?.sh");
        assert_eq!(saved.saved, "evil.sh");
        assert!(dir.path().join("evil.sh").exists());
    }

    #[tokio::test]
    async fn test_upload_over_budget_removes_partial() {
        let dir = TempDir::new().unwrap();
        let mut batch = UploadBatch::new(dir.path().to_path_buf(), 4);

        let result = batch.save("big.bin", chunks(&[b"abc", b"def"])).await;
        assert!(matches!(result, Err(TransferError::TooLarge { limit: 4 })));
        assert!(!dir.path().join("big.bin").exists());
        assert!(batch.saved().is_empty());
    }

    #[tokio::test]
    async fn test_upload_stream_error_removes_partial() {
        let dir = TempDir::new().unwrap();
        let mut batch = UploadBatch::new(dir.path().to_path_buf(), 1024);

        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(TransferError::Malformed("connection reset".into())),
        ]);
        let result = batch.save("cut.txt", failing).await;
        assert!(matches!(result, Err(TransferError::Malformed(_))));
        assert!(!dir.path().join("cut.txt").exists());
    }
}
