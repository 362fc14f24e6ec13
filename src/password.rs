//! Candidate passwords and the prober that picks one per archive.
//!
//! Plaintext never leaves this module in logs or reports: a choice is shown
//! as `none` or `candidate #k`.

use std::fmt;
use std::io;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::archive::{Container, ContainerError, ContainerReader, Entry};
use crate::discover::VolumeSet;

/// Ordered candidate passwords, shared read-only by every worker.
///
/// Iteration always starts with "no password".
#[derive(Clone, Default)]
pub struct PasswordList {
    candidates: Arc<Vec<String>>,
}

impl PasswordList {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates: Arc::new(candidates),
        }
    }

    /// Number of configured candidates, not counting "no password".
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// `(choice, password)` pairs in trial order.
    pub fn iter(&self) -> impl Iterator<Item = (PasswordChoice, Option<&str>)> {
        std::iter::once((PasswordChoice::None, None)).chain(
            self.candidates
                .iter()
                .enumerate()
                .map(|(i, pw)| (PasswordChoice::Candidate(i + 1), Some(pw.as_str()))),
        )
    }

    pub fn get(&self, choice: PasswordChoice) -> Option<&str> {
        match choice {
            PasswordChoice::None => None,
            PasswordChoice::Candidate(k) => self.candidates.get(k - 1).map(String::as_str),
        }
    }
}

impl fmt::Debug for PasswordList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PasswordList({} candidates)", self.candidates.len())
    }
}

/// Which candidate opened an archive. `Candidate(k)` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordChoice {
    #[default]
    None,
    Candidate(usize),
}

impl fmt::Display for PasswordChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordChoice::None => f.write_str("none"),
            PasswordChoice::Candidate(k) => write!(f, "candidate #{k}"),
        }
    }
}

impl Serialize for PasswordChoice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A container opened under the winning candidate.
pub struct Unlocked {
    pub container: Box<dyn Container>,
    pub entries: Vec<Entry>,
    pub choice: PasswordChoice,
    /// Candidates tried, the winner included
    pub attempts: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("no candidate opened the archive ({attempts} tried)")]
    Exhausted { attempts: usize },

    /// Listing failed for a reason other than the password.
    #[error(transparent)]
    Unreadable(ContainerError),
}

/// Tries candidates in order until one decrypts the first file entry.
#[derive(Debug, Clone)]
pub struct PasswordProber {
    passwords: PasswordList,
}

impl PasswordProber {
    pub fn new(passwords: PasswordList) -> Self {
        Self { passwords }
    }

    pub fn probe(
        &self,
        reader: &dyn ContainerReader,
        set: &VolumeSet,
    ) -> Result<Unlocked, ProbeError> {
        let label = set.label();
        let mut attempts = 0;

        for (choice, password) in self.passwords.iter() {
            attempts += 1;
            debug!("{}: trying {}", label, choice);

            let mut container = match reader.open(set, password) {
                Ok(c) => c,
                Err(ContainerError::WrongPassword) => continue,
                Err(e) => return Err(ProbeError::Unreadable(e)),
            };

            let entries = match container.list() {
                Ok(entries) => entries,
                Err(ContainerError::WrongPassword) => continue,
                Err(e) => return Err(ProbeError::Unreadable(e)),
            };

            // Listing alone proves nothing when only the data is encrypted.
            if let Some(first) = trial_entry(&entries) {
                if let Err(e) = drain(container.as_mut(), first) {
                    debug!("{}: {} rejected ({})", label, choice, e);
                    continue;
                }
            }

            debug!("{}: unlocked with {} after {} attempts", label, choice, attempts);
            return Ok(Unlocked {
                container,
                entries,
                choice,
                attempts,
            });
        }

        Err(ProbeError::Exhausted { attempts })
    }
}

/// The first encrypted file, or the first file when the format cannot tell
/// entries apart. A plain file would accept any candidate.
fn trial_entry(entries: &[Entry]) -> Option<&Entry> {
    let mut files = entries.iter().filter(|e| !e.is_dir);
    let first = files.clone().next();
    files.find(|e| e.encrypted).or(first)
}

fn drain(container: &mut dyn Container, entry: &Entry) -> Result<(), ContainerError> {
    let mut stream = container.open(entry)?;
    io::copy(&mut stream, &mut io::sink())?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::LockedReader;
    use super::*;
    use crate::archive::Family;
    use crate::discover::testing::set_from_files;
    use std::path::PathBuf;

    fn set() -> VolumeSet {
        set_from_files(Family::Zip, &[PathBuf::from("/nowhere/locked.zip")])
    }

    #[test]
    fn test_candidates_tried_in_order_until_winner() {
        let reader = LockedReader::new("correct", &["a.txt", "b.txt"]);
        let list = PasswordList::new(
            ["wrong1", "wrong2", "correct", "unused"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );

        let unlocked = PasswordProber::new(list.clone()).probe(&reader, &set()).unwrap();

        assert_eq!(
            reader.attempts(),
            vec![
                None,
                Some("wrong1".to_string()),
                Some("wrong2".to_string()),
                Some("correct".to_string()),
            ]
        );
        assert_eq!(unlocked.choice, PasswordChoice::Candidate(3));
        assert_eq!(unlocked.attempts, 4);
        assert_eq!(list.get(unlocked.choice), Some("correct"));
        assert_eq!(unlocked.entries.len(), 2);
    }

    #[test]
    fn test_exhaustion() {
        let reader = LockedReader::new("correct", &["a.txt"]);
        let list = PasswordList::new(vec!["x".to_string(), "y".to_string()]);

        let err = PasswordProber::new(list).probe(&reader, &set()).err().unwrap();
        assert!(matches!(err, ProbeError::Exhausted { attempts: 3 }));
    }

    #[test]
    fn test_plain_first_entry_does_not_win_without_password() {
        let reader = LockedReader::new("correct", &["secret.txt"]).with_plain("readme.txt");
        let list = PasswordList::new(vec!["wrong".to_string(), "correct".to_string()]);

        let unlocked = PasswordProber::new(list).probe(&reader, &set()).unwrap();

        assert_eq!(unlocked.choice, PasswordChoice::Candidate(2));
        assert_eq!(unlocked.attempts, 3);
        assert_eq!(unlocked.entries[0].name, "readme.txt");
    }

    #[test]
    fn test_trial_entry_prefers_encrypted_files() {
        let plain = Entry::file(0, "readme.txt", 1);
        let locked = Entry {
            encrypted: true,
            ..Entry::file(1, "secret.txt", 1)
        };
        let dir = Entry {
            is_dir: true,
            ..Entry::file(2, "docs/", 0)
        };

        let mixed = vec![dir.clone(), plain.clone(), locked.clone()];
        assert_eq!(trial_entry(&mixed), Some(&locked));

        // No per-entry information: the first file is used
        let unknown = vec![dir.clone(), plain.clone()];
        assert_eq!(trial_entry(&unknown), Some(&plain));
        assert_eq!(trial_entry(&[dir]), None);
    }

    #[test]
    fn test_choice_display_hides_plaintext() {
        assert_eq!(PasswordChoice::None.to_string(), "none");
        assert_eq!(PasswordChoice::Candidate(2).to_string(), "candidate #2");
        assert_eq!(
            serde_json::to_value(PasswordChoice::Candidate(2)).unwrap(),
            "candidate #2"
        );

        let list = PasswordList::new(vec!["hunter2".to_string()]);
        assert!(!format!("{list:?}").contains("hunter2"));
    }
}
