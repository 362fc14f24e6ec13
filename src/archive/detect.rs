//! Signature-based family confirmation.
//!
//! File names only suggest a family. The resolver reads the first volume's
//! magic bytes to handle mislabeled archives (e.g., a `.zip` that's actually
//! a RAR file). Signature wins over the name for single-volume sets; for
//! split sets the naming convention decides how volumes chain, so a mismatch
//! there cannot be reconciled.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use super::{AdapterTable, ContainerReader, Family, Layout};
use crate::discover::VolumeSet;
use crate::error::ResolutionError;

/// RAR marker shared by RAR4 (`Rar!\x1A\x07\x00`) and RAR5 (`Rar!\x1A\x07\x01\x00`)
const RAR_MARKER: &[u8] = b"Rar!\x1a\x07";

/// How far into a self-extracting executable we look for an embedded archive.
const SFX_SCAN_LIMIT: u64 = 4 * 1024 * 1024;

/// Detect a family from magic bytes. `None` when nothing matches.
pub fn detect_signature(path: &Path) -> std::io::Result<Option<Family>> {
    let mut file = File::open(path)?;

    let mut magic = [0u8; 512];
    let bytes_read = read_up_to(&mut file, &mut magic)?;
    let magic = &magic[..bytes_read];

    if bytes_read < 4 {
        return Ok(None);
    }

    // ZIP: PK\x03\x04, PK\x05\x06 (empty) or PK\x07\x08 (spanned)
    if magic[0..2] == [0x50, 0x4B] {
        return Ok(Some(Family::Zip));
    }

    if magic.starts_with(RAR_MARKER) {
        return Ok(Some(Family::Rar));
    }

    // 7z: 7z\xBC\xAF\x27\x1C
    if magic.starts_with(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
        return Ok(Some(Family::SevenZ));
    }

    if magic.starts_with(&[0x1F, 0x8B]) {
        return Ok(Some(Family::TarGz));
    }

    if magic.len() >= 263 && &magic[257..262] == b"ustar" {
        return Ok(Some(Family::Tar));
    }

    // MZ stub: only RAR self-extractors are recognized
    if magic[0..2] == *b"MZ" && embeds_rar(path)? {
        return Ok(Some(Family::Rar));
    }

    Ok(None)
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn embeds_rar(path: &Path) -> std::io::Result<bool> {
    let mut head = Vec::new();
    File::open(path)?.take(SFX_SCAN_LIMIT).read_to_end(&mut head)?;
    Ok(head.windows(RAR_MARKER.len()).any(|w| w == RAR_MARKER))
}

/// Outcome of resolving a set: confirmed family, the adapter that will open
/// it, and warnings worth surfacing in the report.
pub struct Resolved {
    pub family: Family,
    pub reader: Arc<dyn ContainerReader>,
    pub warnings: Vec<String>,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("family", &self.family)
            .field("warnings", &self.warnings)
            .finish()
    }
}

/// Confirms each set's family and picks its adapter.
#[derive(Debug, Clone)]
pub struct FormatResolver {
    adapters: AdapterTable,
}

impl FormatResolver {
    pub fn new(adapters: AdapterTable) -> Self {
        Self { adapters }
    }

    pub fn resolve(&self, set: &VolumeSet) -> Result<Resolved, ResolutionError> {
        let named = set.family;
        let split = set.is_split();
        let mut warnings = Vec::new();

        let signature = detect_signature(set.first_volume())
            .map_err(|e| ResolutionError::Io(e.to_string()))?;

        let family = match signature {
            Some(found) if found == named => named,
            Some(found) if split => {
                return Err(ResolutionError::Irreconcilable {
                    signature: found,
                    extension: named,
                });
            }
            Some(found) => {
                let msg = format!("signature says {found}, name says {named}; treating as {found}");
                warn!("{}: {}", set.stem, msg);
                warnings.push(msg);
                found
            }
            None => {
                let msg = format!("no known signature; trusting name ({named})");
                warn!("{}: {}", set.stem, msg);
                warnings.push(msg);
                named
            }
        };

        let reader = self
            .adapters
            .lookup(family, split)
            .ok_or(ResolutionError::Unsupported {
                family,
                layout: Layout::describe(split),
            })?;

        Ok(Resolved {
            family,
            reader,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discover::testing::set_from_files;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_detect_known_signatures() {
        let dir = tempdir().unwrap();
        let cases: &[(&str, &[u8], Option<Family>)] = &[
            ("a", b"PK\x03\x04rest", Some(Family::Zip)),
            ("b", b"PK\x07\x08rest", Some(Family::Zip)),
            ("c", b"Rar!\x1a\x07\x01\x00", Some(Family::Rar)),
            ("d", b"7z\xbc\xaf\x27\x1c\x00\x04", Some(Family::SevenZ)),
            ("e", b"\x1f\x8b\x08\x00", Some(Family::TarGz)),
            ("f", b"\xde\xad\xbe\xef\x00", None),
            ("g", b"PK", None),
        ];
        for (name, bytes, expected) in cases {
            let path = write(dir.path(), name, bytes);
            assert_eq!(detect_signature(&path).unwrap(), *expected, "case {name}");
        }
    }

    #[test]
    fn test_detect_plain_tar() {
        let dir = tempdir().unwrap();
        let mut header = vec![0u8; 512];
        header[257..263].copy_from_slice(b"ustar\0");
        let path = write(dir.path(), "x.tar", &header);
        assert_eq!(detect_signature(&path).unwrap(), Some(Family::Tar));
    }

    #[test]
    fn test_detect_rar_sfx() {
        let dir = tempdir().unwrap();
        let mut exe = b"MZ\x90\x00".to_vec();
        exe.extend(std::iter::repeat(0u8).take(10_000));
        exe.extend_from_slice(b"Rar!\x1a\x07\x00");
        let path = write(dir.path(), "setup.part1.exe", &exe);
        assert_eq!(detect_signature(&path).unwrap(), Some(Family::Rar));

        let plain_exe = write(dir.path(), "tool.exe", b"MZ\x90\x00plain program");
        assert_eq!(detect_signature(&plain_exe).unwrap(), None);
    }

    #[test]
    fn test_signature_wins_for_single_volume() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "mislabeled.zip", b"Rar!\x1a\x07\x01\x00");
        let set = set_from_files(Family::Zip, &[path]);

        let resolved = FormatResolver::new(AdapterTable::with_defaults())
            .resolve(&set)
            .unwrap();
        assert_eq!(resolved.family, Family::Rar);
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn test_split_mismatch_is_irreconcilable() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.7z.001", b"Rar!\x1a\x07\x01\x00");
        let b = write(dir.path(), "a.7z.002", b"more");
        let set = set_from_files(Family::SevenZ, &[a, b]);

        let err = FormatResolver::new(AdapterTable::with_defaults())
            .resolve(&set)
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::Irreconcilable {
                signature: Family::Rar,
                extension: Family::SevenZ
            }
        ));
    }

    #[test]
    fn test_unknown_signature_trusts_name() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "odd.7z", b"\x00\x00\x00\x00garbage");
        let set = set_from_files(Family::SevenZ, &[path]);

        let resolved = FormatResolver::new(AdapterTable::with_defaults())
            .resolve(&set)
            .unwrap();
        assert_eq!(resolved.family, Family::SevenZ);
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn test_missing_adapter_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "a.zip", b"PK\x03\x04");
        let set = set_from_files(Family::Zip, &[path]);

        let err = FormatResolver::new(AdapterTable::new())
            .resolve(&set)
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Unsupported { family: Family::Zip, .. }));
    }
}
