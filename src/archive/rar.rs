//! RAR through the `unrar` crate.
//!
//! The library follows `.partN.rar` and `.rNN` chains itself once it is
//! pointed at the first volume, and in listing mode it reports each split
//! file once. Handles are cursor-typed and consumed by every step, so the
//! container keeps only the path and password and reopens per pass.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use tracing::debug;
use unrar::error::{Code, UnrarError};
use unrar::Archive;

use super::{Container, ContainerError, ContainerReader, Entry, EntryVisitor};
use crate::discover::VolumeSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct RarReader;

impl ContainerReader for RarReader {
    fn open(
        &self,
        set: &VolumeSet,
        password: Option<&str>,
    ) -> Result<Box<dyn Container>, ContainerError> {
        let path = set.first_volume().to_path_buf();
        if !path.is_file() {
            return Err(ContainerError::Io(format!("{} is not a file", path.display())));
        }
        debug!("Opening RAR {} ({} volumes)", path.display(), set.members.len());

        Ok(Box::new(RarContainer {
            path,
            password: password.map(str::to_owned),
        }))
    }
}

struct RarContainer {
    path: PathBuf,
    password: Option<String>,
}

fn archive<'a>(path: &'a Path, password: Option<&'a String>) -> Archive<'a> {
    match password {
        Some(pw) => Archive::with_password(path, pw),
        None => Archive::new(path),
    }
}

impl RarContainer {
    /// Walk the archive in processing mode. Headers for which `wants` returns
    /// `true` are read and handed to `on_data`; the rest are skipped.
    ///
    /// A failed read consumes the handle, so the archive is reopened and the
    /// walk resumes after the failed entry.
    fn process(
        &self,
        mut wants: impl FnMut(usize) -> bool,
        mut on_data: impl FnMut(usize, Result<Vec<u8>, ContainerError>),
    ) -> Result<(), ContainerError> {
        let mut resume_at = 0usize;

        'reopen: loop {
            let mut cursor = archive(&self.path, self.password.as_ref())
                .open_for_processing()
                .map_err(map_rar_error)?;
            let mut index = 0usize;

            loop {
                let Some(header) = cursor.read_header().map_err(map_rar_error)? else {
                    return Ok(());
                };

                if index < resume_at || !wants(index) {
                    cursor = header.skip().map_err(map_rar_error)?;
                    index += 1;
                    continue;
                }

                match header.read() {
                    Ok((data, next)) => {
                        on_data(index, Ok(data));
                        cursor = next;
                        index += 1;
                    }
                    Err(e) => {
                        on_data(index, Err(map_rar_error(e)));
                        resume_at = index + 1;
                        continue 'reopen;
                    }
                }
            }
        }
    }
}

impl Container for RarContainer {
    fn list(&mut self) -> Result<Vec<Entry>, ContainerError> {
        let listing = archive(&self.path, self.password.as_ref())
            .open_for_listing()
            .map_err(map_rar_error)?;

        let mut entries = Vec::new();
        for (i, header) in listing.enumerate() {
            let header = header.map_err(map_rar_error)?;
            entries.push(Entry {
                index: i,
                name: header.filename.to_string_lossy().replace('\\', "/"),
                raw_name: None,
                size: header.unpacked_size,
                is_dir: header.is_directory(),
                encrypted: header.is_encrypted(),
            });
        }
        Ok(entries)
    }

    fn open(&mut self, entry: &Entry) -> Result<Box<dyn Read + '_>, ContainerError> {
        let target = entry.index;
        let mut found: Option<Result<Vec<u8>, ContainerError>> = None;

        self.process(|i| i == target, |_, data| found = Some(data))?;

        match found {
            Some(Ok(data)) => Ok(Box::new(Cursor::new(data))),
            Some(Err(e)) => Err(e),
            None => Err(ContainerError::Corrupt(format!("entry {} not found", entry.name))),
        }
    }

    fn is_encrypted(&mut self) -> Result<bool, ContainerError> {
        let listing = match Archive::new(&self.path).open_for_listing() {
            Ok(l) => l,
            Err(e) if is_password_error(&e) => return Ok(true),
            Err(e) => return Err(map_rar_error(e)),
        };

        for header in listing {
            match header {
                Ok(h) if h.is_encrypted() => return Ok(true),
                Ok(_) => {}
                Err(e) if is_password_error(&e) => return Ok(true),
                Err(e) => return Err(map_rar_error(e)),
            }
        }
        Ok(false)
    }

    fn for_each(&mut self, entries: &[Entry], visit: &mut EntryVisitor<'_>) {
        let mut wanted: Vec<Option<&Entry>> = Vec::new();
        for entry in entries {
            if wanted.len() <= entry.index {
                wanted.resize(entry.index + 1, None);
            }
            wanted[entry.index] = Some(entry);
        }
        let mut visited = vec![false; wanted.len()];

        let walk = self.process(
            |i| wanted.get(i).copied().flatten().is_some(),
            |i, data| {
                let Some(entry) = wanted.get(i).copied().flatten() else {
                    return;
                };
                visited[i] = true;
                match data {
                    Ok(bytes) => visit(entry, Ok(&mut Cursor::new(bytes))),
                    Err(e) => visit(entry, Err(e)),
                }
            },
        );

        let leftover = match walk {
            Ok(()) => ContainerError::Corrupt("entry was not reached".to_string()),
            Err(e) => e,
        };
        for (i, entry) in wanted.iter().enumerate() {
            if let (Some(entry), false) = (entry, visited[i]) {
                visit(entry, Err(leftover.clone()));
            }
        }
    }
}

fn is_password_error(e: &UnrarError) -> bool {
    matches!(e.code, Code::MissingPassword | Code::BadPassword)
}

fn map_rar_error(e: UnrarError) -> ContainerError {
    match e.code {
        Code::MissingPassword | Code::BadPassword => ContainerError::WrongPassword,
        Code::EOpen | Code::ERead | Code::EWrite | Code::ECreate | Code::EClose => {
            ContainerError::Io(e.to_string())
        }
        Code::UnknownFormat => ContainerError::Unsupported(e.to_string()),
        _ => ContainerError::Corrupt(e.to_string()),
    }
}
