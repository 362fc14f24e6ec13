//! Parallel extraction of discovered volume sets.
//!
//! Each set becomes one [`ExtractionJob`] running on a bounded rayon pool.
//! A failing set never stops the others; every job ends in a report.

pub mod job;

pub use job::{ExtractionJob, JobState};

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::archive::detect::FormatResolver;
use crate::archive::AdapterTable;
use crate::discover::{is_usable_stem, VolumeSet};
use crate::encoding::EncodingDetector;
use crate::error::DiscoveryError;
use crate::password::{PasswordList, PasswordProber};
use crate::report::ArchiveReport;

/// Per-run switches that change how entries are written.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Leave files that already exist untouched
    pub skip_existing: bool,
    /// Remove a set's volumes once it extracted without errors
    pub delete_after: bool,
}

/// Everything a job needs, shared read-only across workers.
pub struct JobContext {
    pub resolver: FormatResolver,
    pub prober: PasswordProber,
    pub detector: EncodingDetector,
    pub options: ExtractOptions,
}

pub struct ExtractionEngine {
    context: JobContext,
    dest_root: PathBuf,
    workers: usize,
}

impl ExtractionEngine {
    pub fn new(
        adapters: AdapterTable,
        passwords: PasswordList,
        detector: EncodingDetector,
        dest_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            context: JobContext {
                resolver: FormatResolver::new(adapters),
                prober: PasswordProber::new(passwords),
                detector,
                options: ExtractOptions::default(),
            },
            dest_root: dest_root.into(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.context.options = options;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// `<dest root>/<set dir relative to source>/<stem>`
    pub fn destination_for(&self, set: &VolumeSet) -> Result<PathBuf, DiscoveryError> {
        destination(&self.dest_root, set)
    }

    /// Extract every set. Reports come back in input order.
    pub fn run(&self, sets: Vec<VolumeSet>) -> Result<Vec<ArchiveReport>> {
        let total = sets.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("autounpack-{i}"))
            .build()
            .context("Failed to build extraction thread pool")?;

        info!("Extracting {} archives with {} workers...", total, self.workers);

        let planned = assign_destinations(&self.dest_root, &sets);
        let finished = AtomicUsize::new(0);
        let reports = pool.install(|| {
            sets.into_par_iter()
                .zip(planned)
                .map(|(set, (dest, note))| {
                    let mut job = ExtractionJob::new(set, dest);
                    if let Some(note) = note {
                        job = job.with_warning(note);
                    }
                    let report = job.run(&self.context);

                    let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                    info!("[{}/{}] {}: {}", done, total, report.name, report.outcome);
                    report
                })
                .collect::<Vec<_>>()
        });

        Ok(reports)
    }
}

/// Refuses any set whose folder would not sit strictly below `root`.
fn destination(root: &Path, set: &VolumeSet) -> Result<PathBuf, DiscoveryError> {
    let plain_dirs = set
        .rel_dir
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    let dest = root.join(&set.rel_dir).join(&set.stem);

    if plain_dirs && is_usable_stem(&set.stem) && dest.starts_with(root) && dest != root {
        Ok(dest)
    } else {
        Err(DiscoveryError::UnusableName { name: set.label() })
    }
}

type Planned = (Result<PathBuf, DiscoveryError>, Option<String>);

/// Give every set a folder no other set's folder lives in. A folder that
/// would contain another set's output (`a.zip` next to `a/b.zip`) is
/// renamed `a_1`, `a_2`, ... and the rename is noted on the job.
fn assign_destinations(root: &Path, sets: &[VolumeSet]) -> Vec<Planned> {
    let natural: Vec<Result<PathBuf, DiscoveryError>> =
        sets.iter().map(|set| destination(root, set)).collect();
    let mut taken: Vec<PathBuf> = Vec::with_capacity(sets.len());
    let mut planned = Vec::with_capacity(sets.len());

    for (i, (set, dest)) in sets.iter().zip(&natural).enumerate() {
        let dest = match dest {
            Ok(dest) => dest,
            Err(e) => {
                planned.push((Err(e.clone()), None));
                continue;
            }
        };

        let clashes = |candidate: &Path| {
            taken
                .iter()
                .any(|t| t.starts_with(candidate) || candidate.starts_with(t))
                || natural
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && matches!(other, Ok(o) if o.starts_with(candidate)))
        };

        let mut chosen = dest.clone();
        let mut suffix = 0usize;
        while clashes(&chosen) {
            suffix += 1;
            chosen = dest.with_file_name(format!("{}_{}", set.stem, suffix));
        }

        let note = (suffix > 0).then(|| {
            let note = format!(
                "extracted to {} because {} also holds another archive's output",
                chosen.display(),
                dest.display()
            );
            warn!("{}: {}", set.label(), note);
            note
        });
        taken.push(chosen.clone());
        planned.push((Ok(chosen), note));
    }

    planned
}
