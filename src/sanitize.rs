//! Entry name to destination path, with zip-slip protection.
//!
//! Names are treated as `/`-separated strings rather than host paths so a
//! Windows-style name behaves the same on every platform.

use std::path::{Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

use crate::error::EntryError;

/// Result of sanitizing an archive entry name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SanitizedPath {
    /// Path relative to the destination root
    pub relative: PathBuf,
    /// `dest` joined with `relative`
    pub target: PathBuf,
    /// Human-readable notes for every change made to the name
    pub rewrites: Vec<String>,
}

const ENCODED_SEPARATORS: [&str; 4] = ["%2f", "%2F", "%5c", "%5C"];

/// Sanitize `name` for extraction under `dest`.
pub fn sanitize_entry_path(name: &str, dest: &Path) -> Result<SanitizedPath, EntryError> {
    if name.contains('\0') {
        return Err(EntryError::RejectedPath("name contains a NUL byte".to_string()));
    }

    let mut rewrites = Vec::new();
    let mut text = name.to_string();

    if ENCODED_SEPARATORS.iter().any(|s| text.contains(s)) {
        for sep in ENCODED_SEPARATORS {
            text = text.replace(sep, "/");
        }
        rewrites.push("decoded percent-encoded separators".to_string());
    }
    if text.contains('\\') {
        text = text.replace('\\', "/");
        rewrites.push("converted backslashes".to_string());
    }

    let mut parts: Vec<String> = Vec::new();
    for (position, part) in text.split('/').enumerate() {
        match part {
            "" if position == 0 && text.len() > 1 => {
                rewrites.push("dropped leading root".to_string());
            }
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    rewrites.push("dropped parent reference at root".to_string());
                } else {
                    rewrites.push("resolved parent reference".to_string());
                }
            }
            drive if position == 0 && is_drive_prefix(drive) => {
                rewrites.push(format!("dropped drive prefix {drive}"));
            }
            normal => parts.push(normal.nfc().collect()),
        }
    }

    if parts.is_empty() {
        return Err(EntryError::RejectedPath("nothing left after sanitizing".to_string()));
    }

    let relative: PathBuf = parts.iter().collect();
    let target = dest.join(&relative);
    if !target.starts_with(dest) {
        return Err(EntryError::RejectedPath(format!(
            "resolves outside the destination: {}",
            target.display()
        )));
    }

    Ok(SanitizedPath {
        relative,
        target,
        rewrites,
    })
}

fn is_drive_prefix(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
