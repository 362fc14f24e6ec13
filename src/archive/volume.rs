//! Concatenating reader over split volumes.
//!
//! `.7z.001`, `.7z.002`, ... are plain byte slices of one archive, so the
//! provider can read them as a single seekable stream. Volume files are
//! opened lazily and kept open once touched.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;

/// An open volume and where its file cursor currently sits.
struct OpenVolume {
    reader: BufReader<File>,
    cursor: u64,
}

pub struct VolumeReader {
    paths: Vec<PathBuf>,
    files: Vec<Option<OpenVolume>>,
    sizes: Vec<u64>,
    total_size: u64,
    /// Logical position across all volumes
    position: u64,
    /// Seeks issued to the underlying files
    physical_seeks: u64,
}

impl VolumeReader {
    /// Stat every volume up front; a missing one fails here rather than
    /// halfway through a decompression.
    pub fn open(paths: Vec<PathBuf>) -> io::Result<Self> {
        let sizes = paths
            .iter()
            .map(|p| std::fs::metadata(p).map(|m| m.len()))
            .collect::<io::Result<Vec<_>>>()?;
        let total_size = sizes.iter().sum();
        let files = paths.iter().map(|_| None).collect();

        Ok(Self {
            paths,
            files,
            sizes,
            total_size,
            position: 0,
            physical_seeks: 0,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Volume index and offset inside it for a logical position.
    fn locate(&self, pos: u64) -> Option<(usize, u64)> {
        let mut remaining = pos;
        for (i, &size) in self.sizes.iter().enumerate() {
            if remaining < size {
                return Some((i, remaining));
            }
            remaining -= size;
        }
        None
    }

    fn volume(&mut self, index: usize) -> io::Result<&mut OpenVolume> {
        let slot = &mut self.files[index];
        if slot.is_none() {
            *slot = Some(OpenVolume {
                reader: BufReader::new(File::open(&self.paths[index])?),
                cursor: 0,
            });
        }
        slot.as_mut()
            .ok_or_else(|| io::Error::other("volume handle missing after open"))
    }
}

impl Read for VolumeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some((index, offset)) = self.locate(self.position) else {
            return Ok(0);
        };

        let available = self.sizes[index] - offset;
        let want = buf.len().min(available as usize);

        let volume = self.volume(index)?;
        // Sequential reads keep the BufReader's buffer; only jumps seek.
        let jumped = volume.cursor != offset;
        if jumped {
            volume.reader.seek(SeekFrom::Start(offset))?;
            volume.cursor = offset;
        }
        let n = volume.reader.read(&mut buf[..want])?;
        volume.cursor += n as u64;
        if jumped {
            self.physical_seeks += 1;
        }
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("volume {} is shorter than when it was opened", index + 1),
            ));
        }

        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for VolumeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.total_size.checked_add_signed(d),
            SeekFrom::Current(d) => self.position.checked_add_signed(d),
        };

        match target {
            Some(p) => {
                self.position = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of volume set",
            )),
        }
    }
}

impl std::fmt::Debug for VolumeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeReader")
            .field("volumes", &self.paths.len())
            .field("total_size", &self.total_size)
            .field("position", &self.position)
            .field("physical_seeks", &self.physical_seeks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn volumes(dir: &std::path::Path, parts: &[&[u8]]) -> Vec<PathBuf> {
        parts
            .iter()
            .enumerate()
            .map(|(i, bytes)| {
                let path = dir.join(format!("v.7z.{:03}", i + 1));
                std::fs::write(&path, bytes).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_reads_across_boundaries() {
        let dir = tempdir().unwrap();
        let paths = volumes(dir.path(), &[b"hello ", b"split ", b"world"]);

        let mut reader = VolumeReader::open(paths).unwrap();
        assert_eq!(reader.total_size(), 17);

        let mut all = String::new();
        reader.read_to_string(&mut all).unwrap();
        assert_eq!(all, "hello split world");
    }

    #[test]
    fn test_seek_into_middle_volume() {
        let dir = tempdir().unwrap();
        let paths = volumes(dir.path(), &[b"abc", b"def", b"ghi"]);
        let mut reader = VolumeReader::open(paths).unwrap();

        reader.seek(SeekFrom::Start(4)).unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"efgh");

        reader.seek(SeekFrom::End(-2)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"hi");

        assert!(reader.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_sequential_reads_do_not_seek() {
        let dir = tempdir().unwrap();
        let paths = volumes(dir.path(), &[b"0123456789", b"abcdefghij"]);
        let mut reader = VolumeReader::open(paths).unwrap();

        let mut chunk = [0u8; 3];
        let mut all = Vec::new();
        loop {
            let n = reader.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            all.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(all, b"0123456789abcdefghij");
        assert_eq!(reader.physical_seeks, 0);

        // Jumping back lands on the right bytes and costs one seek
        reader.seek(SeekFrom::Start(12)).unwrap();
        reader.read_exact(&mut chunk).unwrap();
        assert_eq!(&chunk, b"cde");
        assert_eq!(reader.physical_seeks, 1);
    }

    #[test]
    fn test_missing_volume_fails_open() {
        let dir = tempdir().unwrap();
        let mut paths = volumes(dir.path(), &[b"abc"]);
        paths.push(dir.path().join("v.7z.002"));
        assert!(VolumeReader::open(paths).is_err());
    }
}
