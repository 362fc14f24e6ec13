//! autounpack - batch archive extraction
//!
//! Finds every archive under a directory (split volumes included), works out
//! its real format, guesses legacy filename encodings, tries a list of
//! passwords and extracts each archive into its own folder. One bad archive
//! never stops the batch.

pub mod archive;
pub mod config;
pub mod discover;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod password;
pub mod report;
pub mod sanitize;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::archive::AdapterTable;
use crate::config::ExtractConfig;
use crate::discover::{ArchiveDiscoverer, Discovery};
use crate::encoding::{ChardetClassifier, EncodingDetector};
use crate::engine::ExtractionEngine;
use crate::report::RunSummary;

/// Walk the source tree and group archives into volume sets.
pub fn discover(config: &ExtractConfig) -> Discovery {
    let mut discoverer = ArchiveDiscoverer::new(&config.source, config.recursive);
    if let Some(dest) = config.nested_dest() {
        discoverer = discoverer.exclude(dest);
    }
    discoverer.discover()
}

/// Discover and extract everything. The config must already be validated.
pub fn run(config: &ExtractConfig) -> Result<RunSummary> {
    let passwords = config.load_passwords()?;
    config.prepare_destination()?;

    let detector = EncodingDetector::new(
        Arc::new(ChardetClassifier),
        config.fallback()?,
        config.confidence_threshold,
    );

    let Discovery { sets, errors } = discover(config);
    info!(
        "Found {} archives ({} discovery errors), {} candidate passwords",
        sets.len(),
        errors.len(),
        passwords.len()
    );

    let engine = ExtractionEngine::new(
        AdapterTable::with_defaults(),
        passwords,
        detector,
        config.dest_root(),
    )
    .with_workers(config.workers)
    .with_options(config.options());

    let reports = engine.run(sets)?;
    Ok(RunSummary::new(reports, errors))
}
