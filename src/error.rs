//! Error taxonomy for a batch extraction run.
//!
//! Only [`ConfigError`] is fatal. Everything else is attached to one archive
//! (and optionally one entry) and ends up in the final report.

use std::path::PathBuf;

use serde::Serialize;

use crate::archive::{ContainerError, Family};

/// Fatal pre-flight configuration errors. These abort the run before any
/// extraction starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Source directory not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Destination root is not writable: {path}: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read password file {path}: {source}")]
    PasswordFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unknown fallback encoding label: {0}")]
    UnknownEncoding(String),

    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Confidence threshold must be within 0.0..=1.0, got {0}")]
    BadThreshold(f32),
}

/// Problems found while grouping files into volume sets.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("incomplete volume set: {detail}")]
    IncompleteVolumeSet { detail: String },

    #[error("ambiguous stem claimed by {}", .families.join(", "))]
    AmbiguousStem { families: Vec<String> },

    #[error("failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },

    #[error("{name:?} cannot be used as a folder name")]
    UnusableName { name: String },
}

/// The set's family could not be settled, so it never reached listing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("signature says {signature} but volume naming says {extension}")]
    Irreconcilable { signature: Family, extension: Family },

    #[error("no container reader for {family} ({layout})")]
    Unsupported { family: Family, layout: &'static str },

    #[error("failed to read signature: {0}")]
    Io(String),
}

/// A single entry could not be extracted. Recorded, never fatal for the job.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EntryError {
    #[error("rejected path: {0}")]
    RejectedPath(String),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("write failed for {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// What went wrong, at whatever level it happened.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("unreadable archive: {0}")]
    Listing(ContainerError),

    #[error("password exhausted after {attempts} candidates")]
    PasswordExhausted { attempts: usize },

    #[error(transparent)]
    Entry(#[from] EntryError),
}

/// An error tied to an archive stem and, for entry errors, an entry name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stem}{}: {kind}", .entry.as_ref().map(|e| format!(" [{e}]")).unwrap_or_default())]
pub struct ArchiveError {
    pub stem: String,
    pub entry: Option<String>,
    pub kind: ErrorKind,
}

impl ArchiveError {
    pub fn new(stem: impl Into<String>, kind: impl Into<ErrorKind>) -> Self {
        Self {
            stem: stem.into(),
            entry: None,
            kind: kind.into(),
        }
    }

    pub fn for_entry(stem: impl Into<String>, entry: impl Into<String>, kind: EntryError) -> Self {
        Self {
            stem: stem.into(),
            entry: Some(entry.into()),
            kind: ErrorKind::Entry(kind),
        }
    }

    /// Entry errors are isolated; everything else sinks the whole archive.
    pub fn is_entry_level(&self) -> bool {
        matches!(self.kind, ErrorKind::Entry(_))
    }
}

impl Serialize for ArchiveError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("ArchiveError", 3)?;
        s.serialize_field("stem", &self.stem)?;
        s.serialize_field("entry", &self.entry)?;
        s.serialize_field("cause", &self.kind.to_string())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_entry_name() {
        let err = ArchiveError::for_entry(
            "photos",
            "../etc/passwd",
            EntryError::RejectedPath("escapes destination".into()),
        );
        assert_eq!(
            err.to_string(),
            "photos [../etc/passwd]: rejected path: escapes destination"
        );
        assert!(err.is_entry_level());
    }

    #[test]
    fn test_display_without_entry() {
        let err = ArchiveError::new("a", ErrorKind::PasswordExhausted { attempts: 4 });
        assert_eq!(err.to_string(), "a: password exhausted after 4 candidates");
        assert!(!err.is_entry_level());
    }

    #[test]
    fn test_serialize_reports_cause_text() {
        let err = ArchiveError::new(
            "a",
            DiscoveryError::IncompleteVolumeSet {
                detail: "missing volume 2".into(),
            },
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["stem"], "a");
        assert_eq!(json["entry"], serde_json::Value::Null);
        assert_eq!(json["cause"], "incomplete volume set: missing volume 2");
    }
}
