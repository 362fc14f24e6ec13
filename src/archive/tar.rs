//! Plain and gzip-compressed tarballs through `tar` and `flate2`.
//!
//! Tar is strictly sequential: `for_each` is one pass over the stream and
//! `open` re-reads from the start up to the wanted entry. Tar headers carry
//! no encoding declaration, so every non-UTF-8 name is handed to the
//! encoding detector as raw bytes.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::PathBuf;

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use super::{Container, ContainerError, ContainerReader, Entry, EntryVisitor};
use crate::discover::VolumeSet;

#[derive(Debug, Clone, Copy)]
pub struct TarReader {
    gzip: bool,
}

impl TarReader {
    pub fn plain() -> Self {
        Self { gzip: false }
    }

    pub fn gzip() -> Self {
        Self { gzip: true }
    }
}

impl ContainerReader for TarReader {
    fn open(
        &self,
        set: &VolumeSet,
        _password: Option<&str>,
    ) -> Result<Box<dyn Container>, ContainerError> {
        let path = set.entry_point().to_path_buf();
        File::open(&path)?;

        Ok(Box::new(TarContainer {
            path,
            gzip: self.gzip,
        }))
    }
}

struct TarContainer {
    path: PathBuf,
    gzip: bool,
}

impl TarContainer {
    fn archive(&self) -> Result<Archive<Box<dyn Read>>, ContainerError> {
        let file = BufReader::new(File::open(&self.path)?);
        let stream: Box<dyn Read> = if self.gzip {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Archive::new(stream))
    }
}

/// Only regular files and directories are extracted. Links and device nodes
/// are left out of the listing entirely.
fn keep(kind: EntryType) -> bool {
    kind.is_file() || kind.is_dir() || kind == EntryType::Continuous
}

fn describe(index: usize, header_path: &[u8], size: u64, is_dir: bool) -> Entry {
    let (name, raw_name) = match std::str::from_utf8(header_path) {
        Ok(s) => (s.to_string(), None),
        Err(_) => (
            String::from_utf8_lossy(header_path).into_owned(),
            Some(header_path.to_vec()),
        ),
    };
    Entry {
        index,
        name,
        raw_name,
        size,
        is_dir,
        encrypted: false,
    }
}

impl Container for TarContainer {
    fn list(&mut self) -> Result<Vec<Entry>, ContainerError> {
        let mut archive = self.archive()?;
        let mut entries = Vec::new();

        for (i, item) in archive.entries()?.enumerate() {
            let item = item?;
            let kind = item.header().entry_type();
            if !keep(kind) {
                continue;
            }
            let size = item.header().size()?;
            entries.push(describe(i, &item.path_bytes(), size, kind.is_dir()));
        }
        Ok(entries)
    }

    fn open(&mut self, entry: &Entry) -> Result<Box<dyn Read + '_>, ContainerError> {
        let mut archive = self.archive()?;
        for (i, item) in archive.entries()?.enumerate() {
            let mut item = item?;
            if i == entry.index {
                let mut data = Vec::with_capacity(entry.size as usize);
                item.read_to_end(&mut data)?;
                return Ok(Box::new(Cursor::new(data)));
            }
        }
        Err(ContainerError::Corrupt(format!("entry {} not found", entry.name)))
    }

    fn is_encrypted(&mut self) -> Result<bool, ContainerError> {
        Ok(false)
    }

    fn for_each(&mut self, entries: &[Entry], visit: &mut EntryVisitor<'_>) {
        let mut remaining: Vec<&Entry> = entries.iter().collect();
        remaining.sort_by_key(|e| std::cmp::Reverse(e.index));

        let walk = (|| -> Result<(), ContainerError> {
            let mut archive = self.archive()?;
            for (i, item) in archive.entries()?.enumerate() {
                match remaining.last() {
                    None => break,
                    Some(next) if next.index != i => continue,
                    Some(_) => {}
                }
                let Some(entry) = remaining.pop() else {
                    break;
                };
                match item {
                    Ok(mut item) => visit(entry, Ok(&mut item)),
                    // A broken header ends the stream for everything after it.
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })();

        let leftover = match walk {
            Ok(()) => ContainerError::Corrupt("entry was not reached".to_string()),
            Err(e) => e,
        };
        while let Some(entry) = remaining.pop() {
            visit(entry, Err(leftover.clone()));
        }
    }
}
