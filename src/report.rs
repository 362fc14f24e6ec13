//! End-of-run summary: one line per archive, the error list, then counts.

use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;

use serde::Serialize;

use crate::archive::Family;
use crate::discover::VolumeSet;
use crate::error::ArchiveError;
use crate::password::PasswordChoice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Success => "ok",
            Outcome::Partial => "partial",
            Outcome::Failed => "failed",
        })
    }
}

/// What one extraction job did.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub name: String,
    pub family: Family,
    pub volumes: usize,
    pub password: PasswordChoice,
    pub encoding: Option<String>,
    pub outcome: Outcome,
    /// Final job state
    pub state: &'static str,
    pub destination: Option<PathBuf>,
    pub entries: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
    pub warnings: Vec<String>,
    pub errors: Vec<ArchiveError>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Counts {
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
}

/// The whole run. Discovery errors count as failed archives.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub archives: Vec<ArchiveReport>,
    pub discovery_errors: Vec<ArchiveError>,
    pub counts: Counts,
}

impl RunSummary {
    pub fn new(archives: Vec<ArchiveReport>, discovery_errors: Vec<ArchiveError>) -> Self {
        let mut counts = Counts {
            failed: discovery_errors.len(),
            ..Counts::default()
        };
        for report in &archives {
            match report.outcome {
                Outcome::Success => counts.succeeded += 1,
                Outcome::Partial => counts.partial += 1,
                Outcome::Failed => counts.failed += 1,
            }
        }

        Self {
            archives,
            discovery_errors,
            counts,
        }
    }

    /// 0 only if every archive fully succeeded.
    pub fn exit_code(&self) -> u8 {
        if self.counts.partial == 0 && self.counts.failed == 0 {
            0
        } else {
            1
        }
    }

    pub fn write_text(&self, out: &mut impl Write) -> io::Result<()> {
        for report in &self.archives {
            writeln!(
                out,
                "{:<40} {:<7} password: {:<13} encoding: {:<12} {}",
                report.name,
                report.family.as_str(),
                report.password.to_string(),
                report.encoding.as_deref().unwrap_or("-"),
                describe(report),
            )?;
        }

        let errors: Vec<&ArchiveError> = self
            .discovery_errors
            .iter()
            .chain(self.archives.iter().flat_map(|r| r.errors.iter()))
            .collect();
        if !errors.is_empty() {
            writeln!(out)?;
            writeln!(out, "Errors:")?;
            for error in errors {
                writeln!(out, "  {}", error)?;
            }
        }

        writeln!(out)?;
        writeln!(
            out,
            "{} succeeded, {} partial, {} failed",
            self.counts.succeeded, self.counts.partial, self.counts.failed
        )
    }

    pub fn write_json(&self, out: &mut impl Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        writeln!(out)
    }

    pub fn print(&self, json: bool) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if json {
            self.write_json(&mut out)
        } else {
            self.write_text(&mut out)
        }
    }
}

fn describe(report: &ArchiveReport) -> String {
    match report.outcome {
        Outcome::Success if report.skipped > 0 => {
            format!("ok ({} extracted, {} skipped)", report.extracted, report.skipped)
        }
        Outcome::Success => format!("ok ({} extracted)", report.extracted),
        Outcome::Partial => format!(
            "partial ({} extracted, {} failed)",
            report.extracted, report.failed
        ),
        Outcome::Failed => "failed".to_string(),
    }
}

/// Discovered sets, for `--list`.
#[derive(Debug, Serialize)]
pub struct SetListing<'a> {
    pub name: String,
    pub family: Family,
    pub scheme: &'static str,
    pub volumes: Vec<&'a std::path::Path>,
    pub size: u64,
}

pub fn write_listing(
    sets: &[VolumeSet],
    errors: &[ArchiveError],
    json: bool,
    out: &mut impl Write,
) -> io::Result<()> {
    let listing: Vec<SetListing<'_>> = sets
        .iter()
        .map(|set| SetListing {
            name: set.label(),
            family: set.family,
            scheme: set.scheme.as_str(),
            volumes: set.volume_paths(),
            size: set.total_size(),
        })
        .collect();

    if json {
        #[derive(Serialize)]
        struct Listing<'a, 'b> {
            sets: &'b [SetListing<'a>],
            errors: &'b [ArchiveError],
        }
        serde_json::to_writer_pretty(
            &mut *out,
            &Listing {
                sets: &listing,
                errors,
            },
        )?;
        return writeln!(out);
    }

    for item in &listing {
        writeln!(
            out,
            "{:<40} {:<7} {:<10} {} volume(s), {} bytes",
            item.name,
            item.family.as_str(),
            item.scheme,
            item.volumes.len(),
            item.size
        )?;
    }
    for error in errors {
        writeln!(out, "  {}", error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DiscoveryError, EntryError};

    fn report(name: &str, outcome: Outcome) -> ArchiveReport {
        ArchiveReport {
            name: name.to_string(),
            family: Family::Zip,
            volumes: 1,
            password: PasswordChoice::None,
            encoding: None,
            outcome,
            state: "done",
            destination: None,
            entries: 5,
            extracted: 5,
            skipped: 0,
            failed: 0,
            bytes: 80,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_counts_and_exit_code() {
        let all_good = RunSummary::new(
            vec![report("a", Outcome::Success), report("b", Outcome::Success)],
            Vec::new(),
        );
        assert_eq!(all_good.counts.succeeded, 2);
        assert_eq!(all_good.exit_code(), 0);

        let missing = ArchiveError::new(
            "c",
            DiscoveryError::IncompleteVolumeSet {
                detail: "missing volume 2".into(),
            },
        );
        let mixed = RunSummary::new(
            vec![report("a", Outcome::Success), report("b", Outcome::Partial)],
            vec![missing],
        );
        assert_eq!(mixed.counts.partial, 1);
        assert_eq!(mixed.counts.failed, 1);
        assert_eq!(mixed.exit_code(), 1);
    }

    #[test]
    fn test_text_summary_layout() {
        let mut locked = report("secret", Outcome::Partial);
        locked.family = Family::Rar;
        locked.password = PasswordChoice::Candidate(3);
        locked.encoding = Some("Shift_JIS".to_string());
        locked.extracted = 4;
        locked.failed = 1;
        locked.errors.push(ArchiveError::for_entry(
            "secret",
            "broken.bin",
            EntryError::Corrupt("Invalid checksum".into()),
        ));

        let summary = RunSummary::new(vec![report("plain", Outcome::Success), locked], Vec::new());
        let mut out = Vec::new();
        summary.write_text(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("plain"));
        assert!(lines[0].contains("password: none"));
        assert!(lines[1].contains("rar"));
        assert!(lines[1].contains("password: candidate #3"));
        assert!(lines[1].contains("encoding: Shift_JIS"));
        assert!(lines[1].ends_with("partial (4 extracted, 1 failed)"));
        assert!(text.contains("secret [broken.bin]: corrupt data: Invalid checksum"));
        assert!(text.trim_end().ends_with("1 succeeded, 1 partial, 0 failed"));
    }

    #[test]
    fn test_json_summary() {
        let mut locked = report("secret", Outcome::Success);
        locked.password = PasswordChoice::Candidate(1);
        let summary = RunSummary::new(vec![locked], Vec::new());

        let mut out = Vec::new();
        summary.write_json(&mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["archives"][0]["password"], "candidate #1");
        assert_eq!(value["archives"][0]["outcome"], "success");
        assert_eq!(value["archives"][0]["family"], "zip");
        assert_eq!(value["counts"]["succeeded"], 1);
    }
}
