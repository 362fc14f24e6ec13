//! Container capability and the per-family adapter table.
//!
//! Every archive family is reached through the same two traits:
//!
//! - [`ContainerReader`] opens a [`VolumeSet`] under an optional password
//! - [`Container`] lists entries, opens entry streams and reports encryption
//!
//! Providers (zip, sevenz-rust2, unrar, tar, the 7z binary) only appear inside
//! the adapter modules. The orchestration in `engine` and `password` never
//! names a provider type.

pub mod detect;
pub mod rar;
pub mod sevenz;
pub mod sevenzip;
pub mod tar;
pub mod volume;
pub mod zip;

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use serde::Serialize;

use crate::discover::VolumeSet;

/// Container family. Derived from file names during discovery and
/// re-confirmed from signature bytes by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Zip,
    #[serde(rename = "7z")]
    SevenZ,
    Rar,
    Tar,
    #[serde(rename = "tar.gz")]
    TarGz,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Zip => "zip",
            Family::SevenZ => "7z",
            Family::Rar => "rar",
            Family::Tar => "tar",
            Family::TarGz => "tar.gz",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical file inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Provider-specific position, stable for the lifetime of the container.
    pub index: usize,
    /// Name as decoded by the provider.
    pub name: String,
    /// Raw name bytes, present only when the format did not declare how the
    /// name is encoded. The encoding detector works on these.
    pub raw_name: Option<Vec<u8>>,
    /// Uncompressed size in bytes
    pub size: u64,
    pub is_dir: bool,
    /// Entry data needs a password. Formats that only know this per archive
    /// leave it `false`.
    pub encrypted: bool,
}

impl Entry {
    pub fn file(index: usize, name: impl Into<String>, size: u64) -> Self {
        Self {
            index,
            name: name.into(),
            raw_name: None,
            size,
            is_dir: false,
            encrypted: false,
        }
    }
}

/// Failures reported by a provider, normalized across families.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContainerError {
    /// Missing or wrong password, detected either from a header check or an
    /// authentication failure.
    #[error("wrong or missing password")]
    WrongPassword,

    #[error("corrupt archive: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<io::Error> for ContainerError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                ContainerError::Corrupt(e.to_string())
            }
            _ => ContainerError::Io(e.to_string()),
        }
    }
}

/// Callback used by [`Container::for_each`]. Receives every requested entry
/// exactly once, with either its data stream or the reason it could not be
/// opened.
pub type EntryVisitor<'v> = dyn FnMut(&Entry, Result<&mut dyn Read, ContainerError>) + 'v;

/// Uniform view of an opened archive.
pub trait Container: Send {
    /// List every entry, directories included.
    fn list(&mut self) -> Result<Vec<Entry>, ContainerError>;

    /// Open the decompressed stream of one entry.
    fn open(&mut self, entry: &Entry) -> Result<Box<dyn Read + '_>, ContainerError>;

    /// Whether entry data (or the headers) need a password.
    fn is_encrypted(&mut self) -> Result<bool, ContainerError>;

    /// Visit the given entries in order.
    ///
    /// The default opens each entry independently. Formats that can only
    /// decompress sequentially override this with a single pass.
    fn for_each(&mut self, entries: &[Entry], visit: &mut EntryVisitor<'_>) {
        for entry in entries {
            match self.open(entry) {
                Ok(mut stream) => visit(entry, Ok(&mut *stream)),
                Err(e) => visit(entry, Err(e)),
            }
        }
    }
}

/// Opens volume sets of one family.
pub trait ContainerReader: Send + Sync {
    fn open(
        &self,
        set: &VolumeSet,
        password: Option<&str>,
    ) -> Result<Box<dyn Container>, ContainerError>;
}

/// Which volume layouts an adapter row accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Single,
    Split,
    Any,
}

impl Layout {
    fn accepts(self, split: bool) -> bool {
        match self {
            Layout::Single => !split,
            Layout::Split => split,
            Layout::Any => true,
        }
    }

    pub fn describe(split: bool) -> &'static str {
        if split {
            "split volumes"
        } else {
            "single volume"
        }
    }
}

/// Declarative table of family adapters. The first row matching
/// (family, layout) wins.
#[derive(Clone, Default)]
pub struct AdapterTable {
    rows: Vec<(Family, Layout, Arc<dyn ContainerReader>)>,
}

impl AdapterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table backed by the native providers plus the 7z binary for spanned zip.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Family::Zip, Layout::Single, Arc::new(zip::ZipReader))
            .register(Family::Zip, Layout::Split, Arc::new(sevenzip::SevenZipCliReader))
            .register(Family::SevenZ, Layout::Any, Arc::new(sevenz::SevenZReader))
            .register(Family::Rar, Layout::Any, Arc::new(rar::RarReader))
            .register(Family::Tar, Layout::Single, Arc::new(tar::TarReader::plain()))
            .register(Family::TarGz, Layout::Single, Arc::new(tar::TarReader::gzip()))
    }

    pub fn register(
        mut self,
        family: Family,
        layout: Layout,
        reader: Arc<dyn ContainerReader>,
    ) -> Self {
        self.rows.push((family, layout, reader));
        self
    }

    pub fn lookup(&self, family: Family, split: bool) -> Option<Arc<dyn ContainerReader>> {
        self.rows
            .iter()
            .find(|(f, layout, _)| *f == family && layout.accepts(split))
            .map(|(_, _, reader)| Arc::clone(reader))
    }
}

impl fmt::Debug for AdapterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rows.iter().map(|(family, layout, _)| (family, layout)))
            .finish()
    }
}
