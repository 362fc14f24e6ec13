//! Single-volume ZIP through the `zip` crate.
//!
//! Both ZipCrypto and AES entries are supported. Names stored without the
//! UTF-8 flag are decoded by the crate as CP437, which is almost never what a
//! legacy archive actually used, so those entries carry their raw bytes for
//! the encoding detector.

use std::fs::File;
use std::io::{BufReader, Read};

use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use super::{Container, ContainerError, ContainerReader, Entry};
use crate::discover::VolumeSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipReader;

impl ContainerReader for ZipReader {
    fn open(
        &self,
        set: &VolumeSet,
        password: Option<&str>,
    ) -> Result<Box<dyn Container>, ContainerError> {
        let path = set.entry_point();
        let file = File::open(path)?;
        let archive = ZipArchive::new(BufReader::new(file)).map_err(map_zip_error)?;
        debug!("Opened ZIP {} ({} entries)", path.display(), archive.len());

        Ok(Box::new(ZipContainer {
            archive,
            password: password.map(str::to_owned),
        }))
    }
}

struct ZipContainer {
    archive: ZipArchive<BufReader<File>>,
    password: Option<String>,
}

impl Container for ZipContainer {
    fn list(&mut self) -> Result<Vec<Entry>, ContainerError> {
        let mut entries = Vec::with_capacity(self.archive.len());
        for i in 0..self.archive.len() {
            let file = self.archive.by_index_raw(i).map_err(map_zip_error)?;
            let name = file.name().to_string();
            let raw = file.name_raw();

            // ASCII and flagged UTF-8 names round-trip; anything else was
            // guessed as CP437 by the crate.
            let raw_name = match std::str::from_utf8(raw) {
                Ok(s) if s == name => None,
                _ => Some(raw.to_vec()),
            };

            entries.push(Entry {
                index: i,
                name,
                raw_name,
                size: file.size(),
                is_dir: file.is_dir(),
                encrypted: file.encrypted(),
            });
        }
        Ok(entries)
    }

    fn open(&mut self, entry: &Entry) -> Result<Box<dyn Read + '_>, ContainerError> {
        let encrypted = self
            .archive
            .by_index_raw(entry.index)
            .map_err(map_zip_error)?
            .encrypted();

        let file = match (&self.password, encrypted) {
            (Some(pw), true) => self.archive.by_index_decrypt(entry.index, pw.as_bytes()),
            (None, true) => return Err(ContainerError::WrongPassword),
            (_, false) => self.archive.by_index(entry.index),
        }
        .map_err(map_zip_error)?;

        Ok(Box::new(file))
    }

    fn is_encrypted(&mut self) -> Result<bool, ContainerError> {
        for i in 0..self.archive.len() {
            if self.archive.by_index_raw(i).map_err(map_zip_error)?.encrypted() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn map_zip_error(e: ZipError) -> ContainerError {
    match e {
        ZipError::InvalidPassword => ContainerError::WrongPassword,
        ZipError::Io(io) => io.into(),
        ZipError::UnsupportedArchive(msg) => ContainerError::Unsupported(msg.to_string()),
        other => ContainerError::Corrupt(other.to_string()),
    }
}
