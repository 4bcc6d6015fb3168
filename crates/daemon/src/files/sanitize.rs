//! Upload file name sanitizing.
//!
//! Client-supplied names are never trusted as paths: only the final
//! component is kept, characters that are invalid on common filesystems are
//! dropped, and device names get an underscore prefix.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Name used when nothing usable is left.
pub const FALLBACK_NAME: &str = "unnamed";

/// Longest file name, in bytes, accepted by common filesystems.
pub const MAX_NAME_BYTES: usize = 255;

/// Highest counter tried when making a name unique.
pub const MAX_DUPLICATES: u32 = 10_000;

const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Turn a client-supplied file name into a safe single path component.
pub fn sanitize_file_name(name: &str) -> String {
    // Browsers on some platforms send the full client path.
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && !INVALID_NAME_CHARS.contains(c))
        .collect();

    if cleaned.trim().is_empty() {
        return FALLBACK_NAME.to_string();
    }

    let trimmed = cleaned.trim_end_matches([' ', '.']);
    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    let mut sanitized = trimmed.to_string();
    let (stem, _) = split_extension(&sanitized);
    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        sanitized.insert(0, '_');
    }

    truncate_name(&sanitized)
}

/// Split `name` into stem and extension (including the dot).
///
/// A leading dot is part of the stem, so `.env` has no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_BYTES {
        return name.to_string();
    }

    let (stem, ext) = split_extension(name);
    let ext = if ext.len() >= MAX_NAME_BYTES { "" } else { ext };
    let budget = MAX_NAME_BYTES - ext.len();

    let mut end = budget.min(stem.len());
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &stem[..end], ext)
}

/// Candidate name for the `n`th duplicate: `report (n).pdf`.
pub fn numbered_name(name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(name);
    format!("{stem} ({n}){ext}")
}

/// Create a new file in `dir` named after `name`, numbering on collision.
///
/// Uses exclusive creation, so two concurrent uploads of the same name get
/// distinct files. Returns the name actually used and the open file.
pub fn create_unique_file(dir: &Path, name: &str) -> io::Result<(String, File)> {
    let mut candidate = name.to_string();
    let mut counter = 0;

    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&candidate))
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                counter += 1;
                if counter > MAX_DUPLICATES {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("too many files named {name}"),
                    ));
                }
                candidate = numbered_name(name, counter);
            }
            Err(e) => return Err(e),
        }
    }
}
