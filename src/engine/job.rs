//! One volume set from resolution to its final state.
//!
//! ```text
//! Pending → Resolving → Listing → [Probing] → Extracting → Done | Failed
//! ```
//!
//! Archive-level problems (resolution, listing, password exhaustion) fail
//! the job outright. Entry-level problems are recorded and the job moves on
//! to the next entry.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::JobContext;
use crate::archive::{Container, ContainerError, ContainerReader, Entry, Family};
use crate::discover::VolumeSet;
use crate::encoding::EncodingGuess;
use crate::error::{ArchiveError, DiscoveryError, EntryError, ErrorKind};
use crate::password::{PasswordChoice, ProbeError};
use crate::report::{ArchiveReport, Outcome};
use crate::sanitize::{sanitize_entry_path, SanitizedPath};

const COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Resolving,
    Listing,
    Probing,
    Extracting,
    Done { partial: bool },
    Failed,
}

impl JobState {
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Resolving, Listing)
                | (Listing, Probing)
                | (Listing, Extracting)
                | (Probing, Extracting)
                | (Extracting, Done { .. })
                | (Resolving | Listing | Probing | Extracting, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Resolving => "resolving",
            JobState::Listing => "listing",
            JobState::Probing => "probing",
            JobState::Extracting => "extracting",
            JobState::Done { partial: false } => "done",
            JobState::Done { partial: true } => "partial",
            JobState::Failed => "failed",
        }
    }
}

/// What happened to one file entry.
enum Written {
    Bytes(u64),
    Skipped,
}

pub struct ExtractionJob {
    set: VolumeSet,
    /// Refused up front when the set's name cannot become a folder
    dest: Result<PathBuf, DiscoveryError>,
    state: JobState,
    family: Family,
    password: PasswordChoice,
    encoding: Option<EncodingGuess>,
    entries: usize,
    extracted: usize,
    skipped: usize,
    failed: usize,
    bytes: u64,
    warnings: Vec<String>,
    errors: Vec<ArchiveError>,
}

impl ExtractionJob {
    pub fn new(set: VolumeSet, dest: Result<PathBuf, DiscoveryError>) -> Self {
        let family = set.family;
        Self {
            set,
            dest,
            state: JobState::Pending,
            family,
            password: PasswordChoice::None,
            encoding: None,
            entries: 0,
            extracted: 0,
            skipped: 0,
            failed: 0,
            bytes: 0,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_warning(mut self, note: String) -> Self {
        self.warnings.push(note);
        self
    }

    fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal job transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("{}: {} -> {}", self.set.label(), self.state.as_str(), next.as_str());
        self.state = next;
    }

    fn fail(&mut self, kind: ErrorKind) {
        warn!("{}: {}", self.set.label(), kind);
        self.errors.push(ArchiveError::new(self.set.label(), kind));
        self.transition(JobState::Failed);
    }

    fn record(&mut self, entry: &str, error: EntryError) {
        warn!("{} [{}]: {}", self.set.label(), entry, error);
        self.failed += 1;
        self.errors.push(ArchiveError::for_entry(self.set.label(), entry, error));
    }

    /// Drive the job to a terminal state and report on it.
    pub fn run(mut self, ctx: &JobContext) -> ArchiveReport {
        if let Err(kind) = self.drive(ctx) {
            self.fail(kind);
        }

        if self.state == (JobState::Done { partial: false }) && ctx.options.delete_after {
            self.delete_sources();
        }

        self.into_report()
    }

    fn drive(&mut self, ctx: &JobContext) -> Result<(), ErrorKind> {
        self.transition(JobState::Resolving);
        let dest = self.dest.clone()?;
        let resolved = ctx.resolver.resolve(&self.set)?;
        self.family = resolved.family;
        self.warnings.extend(resolved.warnings);
        let reader = resolved.reader.as_ref();

        // Encrypted headers refuse to open or list without a password.
        let opened = match reader.open(&self.set, None) {
            Ok(container) => Some(container),
            Err(ContainerError::WrongPassword) => None,
            Err(e) => return Err(ErrorKind::Listing(e)),
        };

        self.transition(JobState::Listing);
        let listed = match opened {
            Some(mut container) => match container.list() {
                Ok(entries) => match container.is_encrypted() {
                    Ok(false) => Some((container, entries)),
                    Ok(true) => None,
                    Err(e) => return Err(ErrorKind::Listing(e)),
                },
                Err(ContainerError::WrongPassword) => None,
                Err(e) => return Err(ErrorKind::Listing(e)),
            },
            None => None,
        };

        let (container, entries) = match listed {
            Some(found) => found,
            None => self.probe(ctx, reader)?,
        };

        self.transition(JobState::Extracting);
        self.extract(ctx, &dest, container, entries);
        Ok(())
    }

    fn probe(
        &mut self,
        ctx: &JobContext,
        reader: &dyn ContainerReader,
    ) -> Result<(Box<dyn Container>, Vec<Entry>), ErrorKind> {
        self.transition(JobState::Probing);
        match ctx.prober.probe(reader, &self.set) {
            Ok(unlocked) => {
                info!("{}: unlocked with {}", self.set.label(), unlocked.choice);
                self.password = unlocked.choice;
                Ok((unlocked.container, unlocked.entries))
            }
            Err(ProbeError::Exhausted { attempts }) => Err(ErrorKind::PasswordExhausted { attempts }),
            Err(ProbeError::Unreadable(e)) => Err(ErrorKind::Listing(e)),
        }
    }

    fn extract(
        &mut self,
        ctx: &JobContext,
        dest: &Path,
        mut container: Box<dyn Container>,
        entries: Vec<Entry>,
    ) {
        self.entries = entries.len();
        if entries.is_empty() {
            info!("{}: archive is empty", self.set.label());
            self.transition(JobState::Done { partial: false });
            return;
        }

        let guess = ctx.detector.detect(&entries);
        if let Some(g) = guess {
            debug!("{}: names decoded as {} ({:.2})", self.set.label(), g.name(), g.confidence);
            if g.fallback {
                self.warnings.push(format!(
                    "name encoding uncertain (confidence {:.2}); using {}",
                    g.confidence,
                    g.name()
                ));
            }
        }
        self.encoding = guess;

        // Keyed by entry index, holding the decoded name for error reports
        let mut targets: HashMap<usize, (String, SanitizedPath)> = HashMap::new();
        let mut files = Vec::new();
        let mut made_dirs = 0usize;

        for entry in entries {
            let name = match &self.encoding {
                Some(g) => g.decode_entry(&entry),
                None => entry.name.clone(),
            };

            let clean = match sanitize_entry_path(&name, dest) {
                Ok(clean) => clean,
                Err(e) if entry.is_dir => {
                    // A bare "./" or "/" directory entry has nothing to create.
                    debug!("{}: ignoring directory entry {:?}: {}", self.set.label(), name, e);
                    continue;
                }
                Err(e) => {
                    self.record(&name, e);
                    continue;
                }
            };
            if !clean.rewrites.is_empty() {
                let note = format!(
                    "entry {:?} written as {} ({})",
                    name,
                    clean.relative.display(),
                    clean.rewrites.join(", ")
                );
                warn!("{}: {}", self.set.label(), note);
                self.warnings.push(note);
            }

            if entry.is_dir {
                match fs::create_dir_all(&clean.target) {
                    Ok(()) => made_dirs += 1,
                    Err(e) => self.record(
                        &name,
                        EntryError::Write {
                            path: clean.target.clone(),
                            message: e.to_string(),
                        },
                    ),
                }
                continue;
            }

            targets.insert(entry.index, (name, clean));
            files.push(entry);
        }

        let skip_existing = ctx.options.skip_existing;
        let mut outcomes: Vec<(String, Result<Written, EntryError>)> = Vec::with_capacity(files.len());
        let mut visit = |entry: &Entry, stream: Result<&mut dyn Read, ContainerError>| {
            let Some((name, clean)) = targets.get(&entry.index) else {
                return;
            };
            let result = match stream {
                Ok(stream) => write_entry(stream, &clean.target, skip_existing),
                Err(e) => Err(EntryError::Corrupt(e.to_string())),
            };
            outcomes.push((name.clone(), result));
        };
        container.for_each(&files, &mut visit);

        for (name, result) in outcomes {
            match result {
                Ok(Written::Bytes(n)) => {
                    self.extracted += 1;
                    self.bytes += n;
                }
                Ok(Written::Skipped) => self.skipped += 1,
                Err(e) => self.record(&name, e),
            }
        }

        let succeeded = self.extracted + self.skipped + made_dirs;
        if succeeded == 0 && self.failed > 0 {
            warn!("{}: no entry could be extracted", self.set.label());
            self.transition(JobState::Failed);
        } else {
            self.transition(JobState::Done {
                partial: self.failed > 0,
            });
        }
    }

    fn delete_sources(&mut self) {
        for member in &self.set.members {
            match fs::remove_file(&member.path) {
                Ok(()) => debug!("Deleted {}", member.path.display()),
                Err(e) => {
                    let note = format!("could not delete {}: {}", member.path.display(), e);
                    warn!("{}: {}", self.set.label(), note);
                    self.warnings.push(note);
                }
            }
        }
    }

    fn into_report(self) -> ArchiveReport {
        let outcome = match self.state {
            JobState::Done { partial: false } => Outcome::Success,
            JobState::Done { partial: true } => Outcome::Partial,
            _ => Outcome::Failed,
        };

        ArchiveReport {
            name: self.set.label(),
            family: self.family,
            volumes: self.set.members.len(),
            password: self.password,
            encoding: self.encoding.map(|g| g.name().to_string()),
            outcome,
            state: self.state.as_str(),
            destination: self.dest.ok(),
            entries: self.entries,
            extracted: self.extracted,
            skipped: self.skipped,
            failed: self.failed,
            bytes: self.bytes,
            warnings: self.warnings,
            errors: self.errors,
        }
    }
}

/// Stream one entry to disk. A file left behind by a failed copy is removed.
fn write_entry(stream: &mut dyn Read, target: &Path, skip_existing: bool) -> Result<Written, EntryError> {
    if skip_existing && target.exists() {
        return Ok(Written::Skipped);
    }

    let write_error = |e: io::Error| EntryError::Write {
        path: target.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    let mut file = File::create(target).map_err(write_error)?;

    match copy_entry(stream, &mut file) {
        Ok(n) => Ok(Written::Bytes(n)),
        Err(e) => {
            drop(file);
            if let Err(rm) = fs::remove_file(target) {
                debug!("Could not remove partial {}: {}", target.display(), rm);
            }
            Err(e.into_entry_error(target))
        }
    }
}

enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

impl CopyError {
    fn into_entry_error(self, target: &Path) -> EntryError {
        match self {
            CopyError::Read(e) => EntryError::Corrupt(e.to_string()),
            CopyError::Write(e) => EntryError::Write {
                path: target.to_path_buf(),
                message: e.to_string(),
            },
        }
    }
}

/// `io::copy`, but telling a bad source apart from a failing destination.
fn copy_entry(reader: &mut dyn Read, writer: &mut File) -> Result<u64, CopyError> {
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }
    writer.flush().map_err(CopyError::Write)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use JobState::*;
        let path = [Pending, Resolving, Listing, Probing, Extracting, Done { partial: true }];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{:?}", pair);
        }
        assert!(Listing.can_transition_to(&Extracting));
        assert!(Probing.can_transition_to(&Failed));
    }

    #[test]
    fn test_illegal_transitions() {
        use JobState::*;
        assert!(!Pending.can_transition_to(&Extracting));
        assert!(!Pending.can_transition_to(&Failed));
        assert!(!Failed.can_transition_to(&Resolving));
        assert!(!(Done { partial: false }).can_transition_to(&Failed));
        assert!(!Extracting.can_transition_to(&Probing));
    }

    #[test]
    fn test_failed_copy_removes_partial_file() {
        struct Breaks;
        impl Read for Breaks {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::InvalidData, "Invalid checksum"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out.bin");
        let err = write_entry(&mut Breaks, &target, false).err().unwrap();
        assert!(matches!(err, EntryError::Corrupt(_)));
        assert!(!target.exists());
        assert!(target.parent().unwrap().exists());
    }

    #[test]
    fn test_skip_existing_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("keep.txt");
        std::fs::write(&target, b"original").unwrap();

        let mut data: &[u8] = b"replacement";
        assert!(matches!(write_entry(&mut data, &target, true), Ok(Written::Skipped)));
        assert_eq!(std::fs::read(&target).unwrap(), b"original");

        let mut data: &[u8] = b"replacement";
        assert!(matches!(write_entry(&mut data, &target, false), Ok(Written::Bytes(11))));
        assert_eq!(std::fs::read(&target).unwrap(), b"replacement");
    }
}
