//! Volume naming conventions.
//!
//! Each row maps a file-name pattern to a family, a naming scheme, the index
//! the scheme starts counting from and how to read a volume's index out of
//! the name. Rows are tried in order; the first match wins, so the more
//! specific multi-part patterns come before the plain extensions.

use std::path::{Component, Path};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::archive::Family;

/// A vendor naming convention. Members of one volume set must share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheme {
    /// `name.part1.rar`, `name.part2.rar` (or a `.part1.exe` self-extractor)
    RarPart,
    /// `name.rar`, `name.r00`, `name.r01`
    RarLegacy,
    /// `name.z01`, `name.z02`, closed by `name.zip`
    Zip,
    /// `name.7z.001`, `name.7z.002`
    SevenZSplit,
    SevenZ,
    TarGz,
    Tar,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::RarPart => "rar-part",
            Scheme::RarLegacy => "rar-legacy",
            Scheme::Zip => "zip",
            Scheme::SevenZSplit => "7z-split",
            Scheme::SevenZ => "7z",
            Scheme::TarGz => "tar-gz",
            Scheme::Tar => "tar",
        }
    }

    /// Whether a complete set must end with a terminal volume.
    pub fn needs_terminal(&self) -> bool {
        matches!(self, Scheme::Zip)
    }
}

/// Position of a member inside its set. Terminal volumes sort after every
/// ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeIndex {
    Ordinal(u32),
    Terminal,
}

/// How a row turns a name into a [`VolumeIndex`].
#[derive(Debug, Clone, Copy)]
pub enum IndexRule {
    /// The `n` capture group, as-is
    Captured,
    /// The `n` capture group plus an offset (`.r00` is the second volume)
    CapturedPlus(u32),
    Fixed(u32),
    Terminal,
}

pub struct VolumePattern {
    pub regex: Regex,
    pub family: Family,
    pub scheme: Scheme,
    pub start: u32,
    pub rule: IndexRule,
}

/// Result of matching one file name against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatch {
    pub stem: String,
    pub family: Family,
    pub scheme: Scheme,
    pub start: u32,
    pub index: VolumeIndex,
}

fn row(pattern: &str, family: Family, scheme: Scheme, start: u32, rule: IndexRule) -> VolumePattern {
    VolumePattern {
        // Table patterns are literals checked by the tests below
        regex: Regex::new(pattern).unwrap_or_else(|e| panic!("bad volume pattern {pattern}: {e}")),
        family,
        scheme,
        start,
        rule,
    }
}

pub static PATTERNS: Lazy<Vec<VolumePattern>> = Lazy::new(|| {
    use IndexRule::*;

    vec![
        row(r"(?i)^(?P<stem>.+)\.part(?P<n>\d+)\.(?:rar|exe)$", Family::Rar, Scheme::RarPart, 1, Captured),
        row(r"(?i)^(?P<stem>.+)\.7z\.(?P<n>\d{3})$", Family::SevenZ, Scheme::SevenZSplit, 1, Captured),
        row(r"(?i)^(?P<stem>.+)\.z(?P<n>\d{2,})$", Family::Zip, Scheme::Zip, 1, Captured),
        row(r"(?i)^(?P<stem>.+)\.zip$", Family::Zip, Scheme::Zip, 1, Terminal),
        row(r"(?i)^(?P<stem>.+)\.r(?P<n>\d{2,})$", Family::Rar, Scheme::RarLegacy, 0, CapturedPlus(1)),
        row(r"(?i)^(?P<stem>.+)\.rar$", Family::Rar, Scheme::RarLegacy, 0, Fixed(0)),
        row(r"(?i)^(?P<stem>.+)\.7z$", Family::SevenZ, Scheme::SevenZ, 1, Fixed(1)),
        row(r"(?i)^(?P<stem>.+)\.(?:tar\.gz|tgz)$", Family::TarGz, Scheme::TarGz, 1, Fixed(1)),
        row(r"(?i)^(?P<stem>.+)\.tar$", Family::Tar, Scheme::Tar, 1, Fixed(1)),
    ]
});

/// A stem becomes a directory name, so it must be one plain path component.
pub fn is_usable_stem(stem: &str) -> bool {
    let mut components = Path::new(stem).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !stem.contains(['/', '\\'])
}

/// Match a bare file name (no directories) against the table.
pub fn match_name(name: &str) -> Option<NameMatch> {
    PATTERNS.iter().find_map(|p| {
        let caps = p.regex.captures(name)?;
        let stem = caps.name("stem")?.as_str().to_string();
        let captured = || caps.name("n").and_then(|n| n.as_str().parse::<u32>().ok());

        let index = match p.rule {
            IndexRule::Captured => VolumeIndex::Ordinal(captured()?),
            IndexRule::CapturedPlus(offset) => VolumeIndex::Ordinal(captured()?.checked_add(offset)?),
            IndexRule::Fixed(n) => VolumeIndex::Ordinal(n),
            IndexRule::Terminal => VolumeIndex::Terminal,
        };

        Some(NameMatch {
            stem,
            family: p.family,
            scheme: p.scheme,
            start: p.start,
            index,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(name: &str) -> NameMatch {
        match_name(name).unwrap_or_else(|| panic!("{name} should match"))
    }

    #[test]
    fn test_table_compiles() {
        assert_eq!(PATTERNS.len(), 9);
    }

    #[test]
    fn test_single_files() {
        assert_eq!(m("photos.zip").index, VolumeIndex::Terminal);
        assert_eq!(m("photos.zip").family, Family::Zip);
        assert_eq!(m("photos.7z").index, VolumeIndex::Ordinal(1));
        assert_eq!(m("photos.rar").index, VolumeIndex::Ordinal(0));
        assert_eq!(m("photos.tar.gz").family, Family::TarGz);
        assert_eq!(m("photos.tar.gz").stem, "photos");
        assert_eq!(m("photos.TGZ").family, Family::TarGz);
        assert_eq!(m("photos.tar").family, Family::Tar);
    }

    #[test]
    fn test_dot_stems_are_not_usable() {
        assert_eq!(m("...zip").stem, "..");
        assert_eq!(m("..zip").stem, ".");
        assert!(!is_usable_stem(".."));
        assert!(!is_usable_stem("."));
        assert!(!is_usable_stem(""));
        assert!(!is_usable_stem("a\\b"));
        assert!(is_usable_stem("a.."));
        assert!(is_usable_stem("..a"));
    }

    #[test]
    fn test_rar_parts() {
        let first = m("Movie.Name.part01.rar");
        assert_eq!(first.stem, "Movie.Name");
        assert_eq!(first.scheme, Scheme::RarPart);
        assert_eq!(first.index, VolumeIndex::Ordinal(1));

        let sfx = m("Movie.Name.part1.exe");
        assert_eq!(sfx.stem, "Movie.Name");
        assert_eq!(sfx.family, Family::Rar);
        assert_eq!(m("Movie.Name.PART12.RAR").index, VolumeIndex::Ordinal(12));
    }

    #[test]
    fn test_rar_legacy_volumes() {
        assert_eq!(m("a.rar").scheme, Scheme::RarLegacy);
        assert_eq!(m("a.r00").index, VolumeIndex::Ordinal(1));
        assert_eq!(m("a.r01").index, VolumeIndex::Ordinal(2));
        assert_eq!(m("a.r00").stem, "a");
    }

    #[test]
    fn test_split_7z_and_zip() {
        let v = m("backup.7z.002");
        assert_eq!(v.stem, "backup");
        assert_eq!(v.scheme, Scheme::SevenZSplit);
        assert_eq!(v.index, VolumeIndex::Ordinal(2));

        let z = m("backup.z03");
        assert_eq!(z.family, Family::Zip);
        assert_eq!(z.index, VolumeIndex::Ordinal(3));
    }

    #[test]
    fn test_unmatched_names() {
        for name in ["notes.txt", "a.7z.1", "zip", ".zip", "a.exe", "a.7z.01"] {
            assert_eq!(match_name(name), None, "{name}");
        }
    }

    #[test]
    fn test_terminal_sorts_last() {
        assert!(VolumeIndex::Ordinal(99) < VolumeIndex::Terminal);
        assert!(VolumeIndex::Ordinal(1) < VolumeIndex::Ordinal(2));
    }
}
