//! Run configuration
//!
//! Built by the CLI, checked once before any archive is touched.

use std::fs;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;

use crate::engine::ExtractOptions;
use crate::error::ConfigError;
use crate::password::PasswordList;

/// Configuration for one batch extraction run
#[derive(Clone)]
pub struct ExtractConfig {
    /// Directory scanned for archives
    pub source: PathBuf,

    /// Descend into subdirectories
    pub recursive: bool,

    /// Where extracted sets go. Defaults to the source directory.
    pub dest_root: Option<PathBuf>,

    /// Candidate passwords, in trial order
    pub passwords: Vec<String>,

    /// One candidate per line, tried after `passwords`
    pub password_file: Option<PathBuf>,

    /// Archives extracted at the same time
    pub workers: usize,

    /// Charset used when name detection is unsure
    pub fallback_encoding: String,

    /// Minimum classifier confidence to accept a detected charset
    pub confidence_threshold: f32,

    pub skip_existing: bool,

    pub delete_after: bool,

    /// Print the summary as JSON
    pub json: bool,

    /// Only discover and print volume sets
    pub list_only: bool,
}

impl std::fmt::Debug for ExtractConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractConfig")
            .field("source", &self.source)
            .field("recursive", &self.recursive)
            .field("dest_root", &self.dest_root)
            .field("passwords", &self.passwords.len())
            .field("password_file", &self.password_file)
            .field("workers", &self.workers)
            .field("fallback_encoding", &self.fallback_encoding)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("skip_existing", &self.skip_existing)
            .field("delete_after", &self.delete_after)
            .finish()
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            recursive: false,
            dest_root: None,
            passwords: Vec::new(),
            password_file: None,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            fallback_encoding: "windows-1252".to_string(),
            confidence_threshold: 0.5,
            skip_existing: false,
            delete_after: false,
            json: false,
            list_only: false,
        }
    }
}

impl ExtractConfig {
    /// Destination root, falling back to the source directory
    pub fn dest_root(&self) -> &Path {
        self.dest_root.as_deref().unwrap_or(&self.source)
    }

    /// The destination, when it lives inside the scanned tree and must be
    /// skipped by discovery.
    pub fn nested_dest(&self) -> Option<&Path> {
        let dest = self.dest_root.as_deref()?;
        (dest != self.source.as_path() && dest.starts_with(&self.source)).then_some(dest)
    }

    pub fn options(&self) -> ExtractOptions {
        ExtractOptions {
            skip_existing: self.skip_existing,
            delete_after: self.delete_after,
        }
    }

    /// Resolve the fallback charset label (WHATWG labels, case-insensitive)
    pub fn fallback(&self) -> Result<&'static Encoding, ConfigError> {
        Encoding::for_label(self.fallback_encoding.trim().as_bytes())
            .ok_or_else(|| ConfigError::UnknownEncoding(self.fallback_encoding.clone()))
    }

    /// Inline passwords followed by the password file's lines
    pub fn load_passwords(&self) -> Result<PasswordList, ConfigError> {
        let mut candidates = self.passwords.clone();
        if let Some(path) = &self.password_file {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::PasswordFile {
                path: path.clone(),
                source,
            })?;
            candidates.extend(parse_password_lines(&text));
        }
        Ok(PasswordList::new(candidates))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.source.is_dir() {
            return Err(ConfigError::SourceNotFound(self.source.clone()));
        }

        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::BadThreshold(self.confidence_threshold));
        }

        self.fallback()?;

        if let Some(path) = &self.password_file {
            fs::metadata(path).map_err(|source| ConfigError::PasswordFile {
                path: path.clone(),
                source,
            })?;
        }

        Ok(())
    }

    /// Create the destination root and prove it accepts files
    pub fn prepare_destination(&self) -> Result<(), ConfigError> {
        let dest = self.dest_root();
        let unwritable = |source| ConfigError::DestinationUnwritable {
            path: dest.to_path_buf(),
            source,
        };

        fs::create_dir_all(dest).map_err(unwritable)?;
        tempfile::tempfile_in(dest).map_err(unwritable)?;
        Ok(())
    }
}

/// One password per line. Blank lines are skipped, line endings stripped,
/// other whitespace kept.
fn parse_password_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
}
