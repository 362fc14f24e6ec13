//! Spanned ZIP through the external 7-Zip binary.
//!
//! The `zip` crate cannot follow `.z01`, `.z02`, ... `.zip` spans, so those
//! sets are handed to `7zz`/`7z`, pointed at the closing `.zip`. The binary
//! finds the other volumes next to it.
//!
//! # 7z Commands Reference
//!
//! - List files: `7zz l -slt -ba -p<pw> archive.zip`
//!   - `-slt`: Technical listing (key=value format)
//!   - `-ba`: Bare output (no headers)
//!
//! - Extract single file to stdout: `7zz e -so -spd -p<pw> archive.zip "path/in/archive"`
//!   - `-so`: Write to stdout
//!   - `-spd`: Disable wildcard matching
//!
//! A `-p` switch is always passed (empty when there is no candidate) so the
//! binary never stops to prompt for a password.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use once_cell::sync::Lazy;
use tracing::debug;

use super::{Container, ContainerError, ContainerReader, Entry};
use crate::discover::VolumeSet;

static SEVEN_ZIP: Lazy<Option<PathBuf>> = Lazy::new(find_7z);

/// Get the path to the 7z binary.
///
/// Looks for the binary in the following locations:
/// 1. `bin/7zz` or `bin/7z.exe` relative to the executable
/// 2. System PATH (`7zz`, then `7z`)
fn find_7z() -> Option<PathBuf> {
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        for candidate in ["bin/7zz", "bin/7z.exe", "7zz"] {
            let path = exe_dir.join(candidate);
            if path.is_file() {
                return Some(path);
            }
        }
    }

    which::which("7zz").or_else(|_| which::which("7z")).ok()
}

pub fn get_7z_path() -> Result<&'static Path, ContainerError> {
    SEVEN_ZIP.as_deref().ok_or_else(|| {
        ContainerError::Unsupported(
            "spanned zip needs the 7z binary (install p7zip or place 7zz in bin/)".to_string(),
        )
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SevenZipCliReader;

impl ContainerReader for SevenZipCliReader {
    fn open(
        &self,
        set: &VolumeSet,
        password: Option<&str>,
    ) -> Result<Box<dyn Container>, ContainerError> {
        let binary = get_7z_path()?;
        let archive = set.entry_point().to_path_buf();
        debug!("Using {} for {}", binary.display(), archive.display());

        Ok(Box::new(SevenZipCliContainer {
            binary,
            archive,
            password: password.map(str::to_owned),
            listing: None,
        }))
    }
}

struct SevenZipCliContainer {
    binary: &'static Path,
    archive: PathBuf,
    password: Option<String>,
    listing: Option<Vec<ListedEntry>>,
}

impl SevenZipCliContainer {
    fn password_switch(&self) -> String {
        format!("-p{}", self.password.as_deref().unwrap_or(""))
    }

    fn run(&self, command: &mut Command) -> Result<Output, ContainerError> {
        command
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ContainerError::Io(format!("failed to run 7z: {e}")))
    }

    fn listing(&mut self) -> Result<&[ListedEntry], ContainerError> {
        if self.listing.is_none() {
            let output = self.run(
                Command::new(self.binary)
                    .arg("l")
                    .arg("-slt")
                    .arg("-ba")
                    .arg("-scsUTF-8")
                    .arg(self.password_switch())
                    .arg(&self.archive),
            )?;
            if !output.status.success() {
                return Err(classify_failure(&output.stderr));
            }
            self.listing = Some(parse_7z_list(&output.stdout)?);
        }
        Ok(self.listing.as_deref().unwrap_or_default())
    }
}

impl Container for SevenZipCliContainer {
    fn list(&mut self) -> Result<Vec<Entry>, ContainerError> {
        Ok(self
            .listing()?
            .iter()
            .enumerate()
            .map(|(i, e)| Entry {
                index: i,
                name: e.path.clone(),
                raw_name: None,
                size: e.size,
                is_dir: e.is_dir,
                encrypted: e.encrypted,
            })
            .collect())
    }

    fn open(&mut self, entry: &Entry) -> Result<Box<dyn Read + '_>, ContainerError> {
        let output = self.run(
            Command::new(self.binary)
                .arg("e")
                .arg("-so")
                .arg("-bd")
                .arg("-y")
                .arg("-spd")
                .arg("-scsUTF-8")
                .arg(self.password_switch())
                .arg(&self.archive)
                .arg(&entry.name),
        )?;

        if !output.status.success() {
            return Err(classify_failure(&output.stderr));
        }
        if output.stdout.is_empty() && entry.size > 0 {
            return Err(ContainerError::Corrupt(format!(
                "7z returned no data for '{}'",
                entry.name
            )));
        }
        Ok(Box::new(Cursor::new(output.stdout)))
    }

    fn is_encrypted(&mut self) -> Result<bool, ContainerError> {
        match self.listing() {
            Ok(entries) => Ok(entries.iter().any(|e| e.encrypted)),
            Err(ContainerError::WrongPassword) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

/// Map a failed run onto an error from the binary's stderr.
fn classify_failure(stderr: &[u8]) -> ContainerError {
    let text = String::from_utf8_lossy(stderr);
    let lower = text.to_lowercase();

    if lower.contains("wrong password") || lower.contains("encrypted archive") {
        ContainerError::WrongPassword
    } else if lower.contains("crc failed") || lower.contains("data error") {
        ContainerError::Corrupt(text.trim().to_string())
    } else if lower.contains("cannot open") || lower.contains("can not open") {
        ContainerError::Corrupt(text.trim().to_string())
    } else {
        ContainerError::Io(text.trim().to_string())
    }
}

/// Information about a file in an archive, as 7z lists it.
#[derive(Debug, Clone)]
struct ListedEntry {
    /// Path within the archive (forward slashes, case-preserved)
    path: String,
    /// Uncompressed size in bytes
    size: u64,
    is_dir: bool,
    encrypted: bool,
}

/// Parse 7z technical listing output into entries.
fn parse_7z_list(output: &[u8]) -> Result<Vec<ListedEntry>, ContainerError> {
    let mut entries = Vec::new();
    let mut current: HashMap<String, String> = HashMap::new();

    for line in BufReader::new(output).lines() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() {
            // End of entry - process it
            entries.extend(finish_block(&current));
            current.clear();
        } else if let Some((key, value)) = line.split_once(" = ") {
            current.insert(key.to_string(), value.to_string());
        } else if let Some(key) = line.strip_suffix(" =") {
            current.insert(key.to_string(), String::new());
        }
    }

    // Handle last entry if no trailing newline
    entries.extend(finish_block(&current));

    Ok(entries)
}

fn finish_block(block: &HashMap<String, String>) -> Option<ListedEntry> {
    let path = block.get("Path").filter(|p| !p.is_empty())?;
    let flag = |key: &str| block.get(key).map(|v| v == "+").unwrap_or(false);

    Some(ListedEntry {
        path: path.replace('\\', "/"),
        size: block
            .get("Size")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0),
        is_dir: flag("Folder"),
        encrypted: flag("Encrypted"),
    })
}
