//! 7z (single file and `.7z.001` splits) through `sevenz-rust2`.
//!
//! Split volumes are fed to the provider as one stream through
//! [`VolumeReader`], so the provider never knows the archive was split.
//! Solid blocks can only be decompressed front to back; `for_each` runs a
//! single pass over the whole archive instead of reopening per entry.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

use sevenz_rust2::{ArchiveReader, Password};
use tracing::debug;

use super::volume::VolumeReader;
use super::{Container, ContainerError, ContainerReader, Entry, EntryVisitor};
use crate::discover::VolumeSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct SevenZReader;

impl ContainerReader for SevenZReader {
    fn open(
        &self,
        set: &VolumeSet,
        password: Option<&str>,
    ) -> Result<Box<dyn Container>, ContainerError> {
        let paths: Vec<PathBuf> = set.members.iter().map(|m| m.path.clone()).collect();
        let container = SevenZContainer {
            paths,
            password: password.map(str::to_owned),
            encrypted: None,
        };

        // Parse the headers now so encrypted headers and corrupt archives
        // surface at open time.
        let reader = container.reader(container.password.as_deref())?;
        debug!(
            "Opened 7z {} ({} entries)",
            set.first_volume().display(),
            reader.archive().files.len()
        );

        Ok(Box::new(container))
    }
}

/// The provider's reader is rebuilt per operation; only paths and the
/// password are kept between calls.
struct SevenZContainer {
    paths: Vec<PathBuf>,
    password: Option<String>,
    encrypted: Option<bool>,
}

impl SevenZContainer {
    fn reader(&self, password: Option<&str>) -> Result<ArchiveReader<VolumeReader>, ContainerError> {
        let source = VolumeReader::open(self.paths.clone())?;
        let Some(pw) = password else {
            return ArchiveReader::new(source, Password::empty()).map_err(map_7z_error);
        };

        match ArchiveReader::new(source, Password::from(pw)) {
            Ok(reader) => Ok(reader),
            // A wrong key turns encrypted headers into arbitrary parse errors
            Err(e) => match self.reader(None) {
                Err(ContainerError::WrongPassword) => Err(ContainerError::WrongPassword),
                _ => Err(map_7z_error(e)),
            },
        }
    }
}

impl Container for SevenZContainer {
    fn list(&mut self) -> Result<Vec<Entry>, ContainerError> {
        let reader = self.reader(self.password.as_deref())?;
        Ok(reader
            .archive()
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| Entry {
                index: i,
                name: f.name().to_string(),
                raw_name: None,
                size: f.size(),
                is_dir: f.is_directory(),
                encrypted: false,
            })
            .collect())
    }

    fn open(&mut self, entry: &Entry) -> Result<Box<dyn Read + '_>, ContainerError> {
        let mut reader = self.reader(self.password.as_deref())?;

        // Entries are matched by name and position among equal names.
        let nth = reader.archive().files[..entry.index.min(reader.archive().files.len())]
            .iter()
            .filter(|f| f.name() == entry.name)
            .count();

        let mut seen = 0;
        let mut data: Option<io::Result<Vec<u8>>> = None;
        reader
            .for_each_entries(|file, rd| {
                if file.name() != entry.name {
                    return Ok(true);
                }
                if seen < nth {
                    seen += 1;
                    return Ok(true);
                }
                let mut buf = Vec::with_capacity(file.size() as usize);
                data = Some(rd.read_to_end(&mut buf).map(|_| buf));
                Ok(false)
            })
            .map_err(map_7z_error)?;

        match data {
            Some(Ok(buf)) => Ok(Box::new(Cursor::new(buf))),
            Some(Err(e)) => Err(map_read_error(e)),
            None => Err(ContainerError::Corrupt(format!("entry {} not found", entry.name))),
        }
    }

    fn is_encrypted(&mut self) -> Result<bool, ContainerError> {
        if let Some(known) = self.encrypted {
            return Ok(known);
        }

        // Encrypted headers refuse to open at all without a password.
        let mut reader = match self.reader(None) {
            Ok(r) => r,
            Err(ContainerError::WrongPassword) => {
                self.encrypted = Some(true);
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        // Otherwise decode the first file with data; AES coders fail fast.
        let mut outcome: io::Result<()> = Ok(());
        let walk = reader.for_each_entries(|file, rd| {
            if file.is_directory() || file.size() == 0 {
                return Ok(true);
            }
            outcome = io::copy(rd, &mut io::sink()).map(|_| ());
            Ok(false)
        });

        let encrypted = match walk.map_err(map_7z_error) {
            Err(ContainerError::WrongPassword) => true,
            Err(e) => return Err(e),
            Ok(()) => matches!(outcome.map_err(map_read_error), Err(ContainerError::WrongPassword)),
        };
        self.encrypted = Some(encrypted);
        Ok(encrypted)
    }

    fn for_each(&mut self, entries: &[Entry], visit: &mut EntryVisitor<'_>) {
        let mut reader = match self.reader(self.password.as_deref()) {
            Ok(r) => r,
            Err(e) => {
                for entry in entries {
                    visit(entry, Err(e.clone()));
                }
                return;
            }
        };

        // name -> requested entries in archive order
        let mut pending: HashMap<String, VecDeque<&Entry>> = HashMap::new();
        let mut sorted: Vec<&Entry> = entries.iter().collect();
        sorted.sort_by_key(|e| e.index);
        for entry in sorted {
            pending.entry(entry.name.clone()).or_default().push_back(entry);
        }

        // Every archive file with this name, so unrequested duplicates can be
        // told apart from requested ones.
        let mut occurrences: HashMap<String, VecDeque<usize>> = HashMap::new();
        for (i, f) in reader.archive().files.iter().enumerate() {
            occurrences.entry(f.name().to_string()).or_default().push_back(i);
        }

        let walk = reader.for_each_entries(|file, rd| {
            let index = occurrences.get_mut(file.name()).and_then(VecDeque::pop_front);
            let queue = pending.get_mut(file.name());
            let wanted = match (index, queue) {
                (Some(i), Some(q)) if q.front().is_some_and(|e| e.index == i) => q.pop_front(),
                _ => None,
            };

            if let Some(entry) = wanted {
                visit(entry, Ok(&mut *rd));
            }
            // Whatever the visitor left unread still has to be decoded to
            // reach the next entry of a solid block.
            let _ = io::copy(rd, &mut io::sink());
            Ok(true)
        });

        let leftover = match walk {
            Ok(()) => ContainerError::Corrupt("entry was not reached".to_string()),
            Err(e) => map_7z_error(e),
        };
        let mut missed: Vec<&Entry> = pending.into_values().flatten().collect();
        missed.sort_by_key(|e| e.index);
        for entry in missed {
            visit(entry, Err(leftover.clone()));
        }
    }
}

fn map_7z_error(e: sevenz_rust2::Error) -> ContainerError {
    match e {
        sevenz_rust2::Error::PasswordRequired | sevenz_rust2::Error::MaybeBadPassword(_) => {
            ContainerError::WrongPassword
        }
        other => ContainerError::Corrupt(other.to_string()),
    }
}

/// Errors raised from inside an entry stream arrive as `io::Error`, with the
/// provider error boxed inside.
fn map_read_error(e: io::Error) -> ContainerError {
    let wrong_password = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<sevenz_rust2::Error>())
        .is_some_and(|inner| {
            matches!(
                inner,
                sevenz_rust2::Error::PasswordRequired | sevenz_rust2::Error::MaybeBadPassword(_)
            )
        });
    if wrong_password {
        ContainerError::WrongPassword
    } else {
        e.into()
    }
}
