//! Path containment validation.
//!
//! Every filesystem path derived from a request goes through a
//! [`ContainmentValidator`] bound to one [`ContainmentRoot`]. The validator
//! rejects anything that could land outside the root: absolute paths in any
//! platform's notation, `..` segments, characters and device names that some
//! filesystems treat specially, and symbolic links that point out of the
//! tree. Checks run in a fixed order and the first failure wins, so the error
//! code for a given input is stable.
//!
//! The authoritative check is the one done on the OS-resolved path; the
//! textual checks before it reject inputs whose resolution would otherwise
//! depend on platform quirks.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::error::{PerimeterError, Result};

/// Legacy DOS device names.
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters rejected by the portable policy in addition to control characters.
const PORTABLE_INVALID_CHARS: &[char] = &['<', '>', '"', '|', '?', '*'];

/// Reason a path was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainmentError {
    /// The input is absolute (leading separator, UNC share or drive letter).
    #[error("absolute paths are not allowed")]
    AbsolutePath,

    /// The input contains a `..` segment.
    #[error("path traversal is not allowed")]
    PathTraversal,

    /// The input contains a character the policy forbids.
    #[error("path contains invalid characters")]
    InvalidChars,

    /// The final segment names a reserved device.
    #[error("reserved file name")]
    ReservedName,

    /// The resolved path is outside the root.
    #[error("path is outside the allowed directory")]
    OutsideRoot,

    /// The path is a symbolic link whose target is outside the root.
    #[error("symbolic link points outside the allowed directory")]
    SymlinkOutside,

    /// Resolution failed for another reason.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl ContainmentError {
    /// Stable machine-readable code for this rejection.
    pub fn code(&self) -> &'static str {
        match self {
            ContainmentError::AbsolutePath => "ABSOLUTE_PATH",
            ContainmentError::PathTraversal => "PATH_TRAVERSAL",
            ContainmentError::InvalidChars => "INVALID_CHARS",
            ContainmentError::ReservedName => "RESERVED_NAME",
            ContainmentError::OutsideRoot => "OUTSIDE_ROOT",
            ContainmentError::SymlinkOutside => "SYMLINK_OUTSIDE",
            ContainmentError::InvalidPath(_) => "INVALID_PATH",
        }
    }
}

impl From<io::Error> for ContainmentError {
    fn from(err: io::Error) -> Self {
        ContainmentError::InvalidPath(err.to_string())
    }
}

/// Canonical directory that bounds one exposed area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainmentRoot {
    path: PathBuf,
}

impl ContainmentRoot {
    /// Canonicalize `path`, which must be an existing directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                PerimeterError::RootNotDirectory {
                    path: path.to_path_buf(),
                }
            } else {
                PerimeterError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        if !canonical.is_dir() {
            return Err(PerimeterError::RootNotDirectory { path: canonical });
        }

        Ok(Self { path: canonical })
    }

    /// Derive a sub-area of `parent` named `name`.
    ///
    /// The directory does not have to exist yet (the uploads area is created
    /// on first use). When it does exist it is canonicalized and must still be
    /// inside `parent`.
    pub fn child(parent: &ContainmentRoot, name: &str) -> Result<Self> {
        let joined = parent.path.join(name);
        match fs::canonicalize(&joined) {
            Ok(canonical) => {
                if !canonical.starts_with(&parent.path) || canonical == parent.path {
                    return Err(PerimeterError::AreaOutsideParent { path: canonical });
                }
                if !canonical.is_dir() {
                    return Err(PerimeterError::RootNotDirectory { path: canonical });
                }
                Ok(Self { path: canonical })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self { path: joined }),
            Err(source) => Err(PerimeterError::Io {
                path: joined,
                source,
            }),
        }
    }

    /// The canonical root path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the root directory currently exists.
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Whether `candidate` is the root or lies beneath it.
    ///
    /// Comparison is per path component, so `/srv/share-other` is not inside
    /// `/srv/share`.
    pub fn contains(&self, candidate: &Path) -> bool {
        candidate.starts_with(&self.path)
    }
}

/// Character and name restrictions applied before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainmentPolicy {
    invalid_chars: Vec<char>,
    reject_control_chars: bool,
    reserved_names: Vec<String>,
}

impl ContainmentPolicy {
    /// Restrictions that keep shared content usable on every major platform.
    pub fn portable() -> Self {
        Self {
            invalid_chars: PORTABLE_INVALID_CHARS.to_vec(),
            reject_control_chars: true,
            reserved_names: WINDOWS_RESERVED_NAMES
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }

    /// Only what POSIX filesystems themselves forbid.
    pub fn posix() -> Self {
        Self {
            invalid_chars: Vec::new(),
            reject_control_chars: false,
            reserved_names: Vec::new(),
        }
    }

    /// Replace the set of forbidden characters.
    pub fn with_invalid_chars(mut self, chars: impl IntoIterator<Item = char>) -> Self {
        self.invalid_chars = chars.into_iter().collect();
        self
    }

    /// Replace the set of reserved names.
    pub fn with_reserved_names<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.reserved_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `c` may not appear in a path.
    ///
    /// NUL is rejected under every policy.
    pub fn is_invalid_char(&self, c: char) -> bool {
        c == '\0'
            || (self.reject_control_chars && c.is_ascii_control() && c != '\x7f')
            || self.invalid_chars.contains(&c)
    }

    /// Whether `file_name` (extension ignored) is a reserved name.
    pub fn is_reserved_name(&self, file_name: &str) -> bool {
        let stem = match file_name.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => file_name,
        };
        self.reserved_names
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    }
}

impl Default for ContainmentPolicy {
    fn default() -> Self {
        Self::portable()
    }
}

/// Validates client-supplied relative paths against one root.
#[derive(Debug, Clone)]
pub struct ContainmentValidator {
    root: ContainmentRoot,
    policy: ContainmentPolicy,
}

impl ContainmentValidator {
    /// Create a validator with the default portable policy.
    pub fn new(root: ContainmentRoot) -> Self {
        Self::with_policy(root, ContainmentPolicy::default())
    }

    /// Create a validator with an explicit policy.
    pub fn with_policy(root: ContainmentRoot, policy: ContainmentPolicy) -> Self {
        Self { root, policy }
    }

    /// The root this validator guards.
    pub fn root(&self) -> &ContainmentRoot {
        &self.root
    }

    /// Validate `relative` and return the absolute path it designates.
    ///
    /// `None` or an empty string designates the root itself. The path does
    /// not need to exist, so callers can validate a location before creating
    /// it.
    pub fn validate(&self, relative: Option<&str>) -> std::result::Result<PathBuf, ContainmentError> {
        let relative = match relative {
            Some(r) if !r.is_empty() => r,
            _ => return Ok(self.root.path.clone()),
        };

        if relative.starts_with("\\\\") || relative.starts_with("//") {
            return Err(ContainmentError::AbsolutePath);
        }

        if has_drive_prefix(relative) {
            return Err(ContainmentError::AbsolutePath);
        }

        let as_path = Path::new(relative);
        if relative.starts_with('/')
            || relative.starts_with('\\')
            || as_path.is_absolute()
            || as_path.has_root()
        {
            return Err(ContainmentError::AbsolutePath);
        }

        let segments: Vec<&str> = relative
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty())
            .collect();
        if segments.iter().any(|segment| *segment == "..") {
            return Err(ContainmentError::PathTraversal);
        }

        if relative.chars().any(|c| self.policy.is_invalid_char(c)) {
            return Err(ContainmentError::InvalidChars);
        }

        if let Some(last) = segments.last() {
            if self.policy.is_reserved_name(last) {
                return Err(ContainmentError::ReservedName);
            }
        }

        let mut joined = self.root.path.clone();
        for segment in segments.iter().filter(|segment| **segment != ".") {
            joined.push(segment);
        }

        let resolved = resolve_entry(&joined)?;
        if !self.root.contains(&resolved) {
            return Err(ContainmentError::OutsideRoot);
        }

        self.check_symlink(&resolved)?;

        Ok(resolved)
    }

    /// Render an absolute path inside the root as `/`-separated relative text.
    ///
    /// Returns `None` when `path` is outside the root. The root itself renders
    /// as an empty string.
    pub fn relative_display(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root.path).ok()?;
        let parts: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    fn check_symlink(&self, resolved: &Path) -> std::result::Result<(), ContainmentError> {
        let metadata = match fs::symlink_metadata(resolved) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if !metadata.file_type().is_symlink() {
            return Ok(());
        }

        let target = match fs::canonicalize(resolved) {
            Ok(target) => target,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Dangling link: resolve the stored target textually.
                let link = fs::read_link(resolved)?;
                let base = resolved.parent().unwrap_or(self.root.path());
                resolve_lenient(&normalize_lexically(&base.join(link)))?
            }
            Err(e) => return Err(e.into()),
        };

        if self.root.contains(&target) {
            Ok(())
        } else {
            tracing::debug!(
                link = %resolved.display(),
                target = %target.display(),
                "symlink escapes containment root"
            );
            Err(ContainmentError::SymlinkOutside)
        }
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolve the directory part of `path` through the OS and keep the final
/// name as-is, so a symlink at the final position is not followed.
fn resolve_entry(path: &Path) -> io::Result<PathBuf> {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let mut resolved = resolve_lenient(parent)?;
            resolved.push(name);
            Ok(resolved)
        }
        _ => resolve_lenient(path),
    }
}

/// Canonicalize the longest existing ancestor of `path` and append the rest.
fn resolve_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut current = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();

    loop {
        match fs::canonicalize(&current) {
            Ok(mut base) => {
                for part in tail.iter().rev() {
                    base.push(part);
                }
                return Ok(base);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = current.file_name().map(|n| n.to_os_string()) else {
                    return Err(e);
                };
                tail.push(name);
                if !current.pop() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fold `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
