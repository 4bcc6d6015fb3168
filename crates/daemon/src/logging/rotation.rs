//! Size-based rotation of the access log.
//!
//! Generations are numbered: `access.log.1` is the most recent rotated file
//! and `access.log.<max_generations>` the oldest kept one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotates a log file once it reaches a size threshold.
#[derive(Debug, Clone)]
pub struct LogRotator {
    path: PathBuf,
    max_bytes: u64,
    max_generations: u32,
}

impl LogRotator {
    /// Rotator for `path`, rotating at `max_bytes` and keeping
    /// `max_generations` old files.
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, max_generations: u32) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            max_generations,
        }
    }

    /// The live log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of rotated generation `n` (1-based).
    pub fn generation_path(&self, n: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    /// Whether the live file has reached the threshold.
    pub fn needs_rotation(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(metadata) => self.max_bytes > 0 && metadata.len() >= self.max_bytes,
            Err(_) => false,
        }
    }

    /// Rotate if needed. Returns whether a rotation happened.
    pub fn rotate_if_needed(&self) -> io::Result<bool> {
        if !self.needs_rotation() {
            return Ok(false);
        }
        self.rotate()?;
        Ok(true)
    }

    /// Shift every generation up by one and move the live file to `.1`.
    ///
    /// With zero generations the live file is simply removed.
    pub fn rotate(&self) -> io::Result<()> {
        if self.max_generations == 0 {
            return remove_if_exists(&self.path);
        }

        remove_if_exists(&self.generation_path(self.max_generations))?;

        for n in (1..self.max_generations).rev() {
            let from = self.generation_path(n);
            if from.exists() {
                fs::rename(&from, self.generation_path(n + 1))?;
            }
        }

        if self.path.exists() {
            fs::rename(&self.path, self.generation_path(1))?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
