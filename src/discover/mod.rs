//! Archive discovery and volume-set grouping.
//!
//! A single synchronous walk collects every file whose name matches the
//! volume pattern table, then groups members by (directory, stem, family).
//! Grouping needs the full picture, so nothing here runs concurrently.
//!
//! Problems are per stem: an incomplete or ambiguous stem is reported and
//! excluded, and every other stem carries on.

pub mod patterns;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::Family;
use crate::error::{ArchiveError, DiscoveryError};

pub use patterns::{is_usable_stem, match_name, NameMatch, Scheme, VolumeIndex};

/// One physical file belonging to an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveMember {
    pub path: PathBuf,
    pub family: Family,
    pub scheme: Scheme,
    pub index: VolumeIndex,
    pub size: u64,
}

/// The complete group of files making one logical archive, ordered by
/// volume index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeSet {
    /// Directory of the members, relative to the source root
    pub rel_dir: PathBuf,
    pub stem: String,
    pub family: Family,
    pub scheme: Scheme,
    pub members: Vec<ArchiveMember>,
}

impl VolumeSet {
    /// First volume in index order; the resolver reads its signature.
    pub fn first_volume(&self) -> &Path {
        &self.members[0].path
    }

    /// The file a provider is pointed at. Spanned zip sets are opened through
    /// their closing `.zip`; everything else through the first volume.
    pub fn entry_point(&self) -> &Path {
        match self.members.last() {
            Some(last) if last.index == VolumeIndex::Terminal => &last.path,
            _ => self.first_volume(),
        }
    }

    pub fn is_split(&self) -> bool {
        self.members.len() > 1
    }

    pub fn volume_paths(&self) -> Vec<&Path> {
        self.members.iter().map(|m| m.path.as_path()).collect()
    }

    pub fn total_size(&self) -> u64 {
        self.members.iter().map(|m| m.size).sum()
    }

    /// Stem qualified by its directory, used as the archive's name in logs and
    /// in the report.
    pub fn label(&self) -> String {
        label_for(&self.rel_dir, &self.stem)
    }
}

fn label_for(rel_dir: &Path, stem: &str) -> String {
    if rel_dir.as_os_str().is_empty() {
        stem.to_string()
    } else {
        rel_dir.join(stem).to_string_lossy().replace('\\', "/")
    }
}

/// Everything one discovery pass produced.
#[derive(Debug, Default)]
pub struct Discovery {
    pub sets: Vec<VolumeSet>,
    pub errors: Vec<ArchiveError>,
}

/// Walks a source tree and reconstructs volume sets.
#[derive(Debug, Clone)]
pub struct ArchiveDiscoverer {
    root: PathBuf,
    recursive: bool,
    /// Pruned from the walk so extracted output is never rediscovered
    exclude: Option<PathBuf>,
}

type StemKey = (PathBuf, String);

impl ArchiveDiscoverer {
    pub fn new(root: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            root: root.into(),
            recursive,
            exclude: None,
        }
    }

    pub fn exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exclude = Some(dir.into());
        self
    }

    pub fn discover(&self) -> Discovery {
        let mut discovery = Discovery::default();
        let mut stems: BTreeMap<StemKey, BTreeMap<Family, Vec<ArchiveMember>>> = BTreeMap::new();

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(&self.root)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| match &self.exclude {
                Some(excluded) => e.depth() == 0 || e.path() != excluded.as_path(),
                None => true,
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                    warn!("Skipping unreadable path {}: {}", path.display(), e);
                    discovery.errors.push(ArchiveError::new(
                        path.display().to_string(),
                        DiscoveryError::Walk {
                            path,
                            message: e.to_string(),
                        },
                    ));
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            let Some(found) = match_name(&name) else {
                continue;
            };
            if !is_usable_stem(&found.stem) {
                warn!("Skipping {}: its name has no usable folder name", entry.path().display());
                discovery.errors.push(ArchiveError::new(
                    entry.path().display().to_string(),
                    DiscoveryError::UnusableName {
                        name: found.stem.clone(),
                    },
                ));
                continue;
            }

            let rel_dir = entry
                .path()
                .parent()
                .and_then(|p| p.strip_prefix(&self.root).ok())
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);

            debug!("Found {} member {} ({:?})", found.family, entry.path().display(), found.index);

            stems
                .entry((rel_dir, found.stem))
                .or_default()
                .entry(found.family)
                .or_default()
                .push(ArchiveMember {
                    path: entry.path().to_path_buf(),
                    family: found.family,
                    scheme: found.scheme,
                    index: found.index,
                    size,
                });
        }

        for ((rel_dir, stem), families) in stems {
            let label = label_for(&rel_dir, &stem);

            if families.len() > 1 {
                let claimed: Vec<String> = families.keys().map(|f| f.to_string()).collect();
                warn!("{}: stem claimed by several families: {}", label, claimed.join(", "));
                discovery.errors.push(ArchiveError::new(
                    label,
                    DiscoveryError::AmbiguousStem { families: claimed },
                ));
                continue;
            }

            for (family, members) in families {
                match build_set(rel_dir.clone(), stem.clone(), family, members) {
                    Ok(set) => discovery.sets.push(set),
                    Err(e) => {
                        warn!("{}: {}", label, e);
                        discovery.errors.push(ArchiveError::new(label.clone(), e));
                    }
                }
            }
        }

        info!(
            "Discovery found {} volume sets ({} problems) under {}",
            discovery.sets.len(),
            discovery.errors.len(),
            self.root.display()
        );

        discovery
    }
}

/// Order members and check that they form one complete set.
fn build_set(
    rel_dir: PathBuf,
    stem: String,
    family: Family,
    mut members: Vec<ArchiveMember>,
) -> Result<VolumeSet, DiscoveryError> {
    members.sort_by_key(|m| m.index);

    let mut schemes: Vec<Scheme> = members.iter().map(|m| m.scheme).collect();
    schemes.sort();
    schemes.dedup();
    if schemes.len() > 1 {
        return Err(DiscoveryError::AmbiguousStem {
            families: schemes
                .iter()
                .map(|s| format!("{} ({})", family, s.as_str()))
                .collect(),
        });
    }
    let scheme = schemes[0];
    let start = match_start(scheme);

    let mut expected = start;
    let mut terminal_seen = false;
    for member in &members {
        match member.index {
            VolumeIndex::Ordinal(n) if n == expected => expected += 1,
            VolumeIndex::Ordinal(n) if n < expected => {
                return Err(DiscoveryError::IncompleteVolumeSet {
                    detail: format!("volume {} appears more than once", n),
                });
            }
            VolumeIndex::Ordinal(_) => {
                return Err(DiscoveryError::IncompleteVolumeSet {
                    detail: format!("missing volume {}", expected),
                });
            }
            VolumeIndex::Terminal if terminal_seen => {
                return Err(DiscoveryError::IncompleteVolumeSet {
                    detail: "closing volume appears more than once".to_string(),
                });
            }
            VolumeIndex::Terminal => terminal_seen = true,
        }
    }

    if scheme.needs_terminal() && !terminal_seen {
        return Err(DiscoveryError::IncompleteVolumeSet {
            detail: format!("missing closing .{} volume", family),
        });
    }

    Ok(VolumeSet {
        rel_dir,
        stem,
        family,
        scheme,
        members,
    })
}

/// Expected first index of a scheme, taken from the pattern table.
fn match_start(scheme: Scheme) -> u32 {
    patterns::PATTERNS
        .iter()
        .find(|p| p.scheme == scheme)
        .map(|p| p.start)
        .unwrap_or(1)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Build a set straight from paths, bypassing the walk.
    pub fn set_from_files(family: Family, paths: &[PathBuf]) -> VolumeSet {
        let members: Vec<ArchiveMember> = paths
            .iter()
            .map(|p| {
                let name = p.file_name().unwrap().to_string_lossy().to_string();
                let found = match_name(&name).unwrap_or(NameMatch {
                    stem: name.clone(),
                    family,
                    scheme: Scheme::Tar,
                    start: 1,
                    index: VolumeIndex::Ordinal(1),
                });
                ArchiveMember {
                    path: p.clone(),
                    family,
                    scheme: found.scheme,
                    index: found.index,
                    size: std::fs::metadata(p).map(|m| m.len()).unwrap_or(0),
                }
            })
            .collect();
        let stem = paths
            .first()
            .and_then(|p| p.file_name())
            .and_then(|n| match_name(&n.to_string_lossy()))
            .map(|m| m.stem)
            .unwrap_or_else(|| "archive".to_string());

        VolumeSet {
            rel_dir: PathBuf::new(),
            stem,
            family,
            scheme: members[0].scheme,
            members,
        }
    }
}
