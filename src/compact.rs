//! Gzip compaction of finished output files.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::CompactionError;

pub const COMPRESSED_EXTENSION: &str = "gz";
const KNOWN_COMPRESSED: &[&str] = &["gz", "zst", "bz2", "xz", "zip"];
const COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Hidden,
    AlreadyCompressed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactOutcome {
    Compressed {
        artifact: PathBuf,
        original_bytes: u64,
        compressed_bytes: u64,
    },
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct Compactor {
    level: u32,
    keep_original: bool,
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_COMPRESSION_LEVEL)
    }
}

impl Compactor {
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
            keep_original: false,
        }
    }

    pub fn keep_original(mut self, keep: bool) -> Self {
        self.keep_original = keep;
        self
    }

    /// Compress `path` into `path.gz` and remove `path`.
    ///
    /// The artifact is written to `path.gz.tmp`, synced, checked to decode
    /// back to the original length and only then renamed into place. The
    /// original is removed last.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The original cannot be read
    /// - The artifact cannot be written, synced or renamed
    /// - The artifact does not decode to the original length
    /// - The original cannot be removed afterwards
    ///
    /// In every case but the last the original is untouched and no
    /// artifact is left behind.
    pub fn compact(&self, path: &Path) -> Result<CompactOutcome, CompactionError> {
        self.compact_into(path, |tmp| File::create(tmp))
    }

    fn compact_into<W, F>(&self, path: &Path, open_tmp: F) -> Result<CompactOutcome, CompactionError>
    where
        W: Durable,
        F: FnOnce(&Path) -> io::Result<W>,
    {
        if is_hidden(path).map_err(|source| CompactionError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })? {
            return Ok(CompactOutcome::Skipped(SkipReason::Hidden));
        }
        if has_compressed_extension(path) {
            return Ok(CompactOutcome::Skipped(SkipReason::AlreadyCompressed));
        }

        let artifact = with_appended_extension(path, COMPRESSED_EXTENSION);
        let tmp = with_appended_extension(&artifact, "tmp");
        let _ = std::fs::remove_file(&tmp);

        let staged = self
            .write_artifact(path, &tmp, open_tmp)
            .and_then(|original_bytes| {
                verify_artifact(&tmp, original_bytes)?;
                std::fs::rename(&tmp, &artifact).map_err(|source| {
                    CompactionError::WriteFailed {
                        path: artifact.clone(),
                        source,
                    }
                })?;
                Ok(original_bytes)
            });
        let original_bytes = match staged {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = std::fs::remove_file(&tmp);
                return Err(err);
            }
        };

        sync_parent_dir(&artifact);

        let compressed_bytes = std::fs::metadata(&artifact)
            .map(|meta| meta.len())
            .unwrap_or(0);

        if !self.keep_original {
            std::fs::remove_file(path).map_err(|source| CompactionError::RemoveFailed {
                path: path.to_path_buf(),
                source,
            })?;
        }

        Ok(CompactOutcome::Compressed {
            artifact,
            original_bytes,
            compressed_bytes,
        })
    }

    fn write_artifact<W, F>(&self, path: &Path, tmp: &Path, open_tmp: F) -> Result<u64, CompactionError>
    where
        W: Durable,
        F: FnOnce(&Path) -> io::Result<W>,
    {
        let read_failed = |source| CompactionError::ReadFailed {
            path: path.to_path_buf(),
            source,
        };
        let write_failed = |source| CompactionError::WriteFailed {
            path: tmp.to_path_buf(),
            source,
        };

        let mut input = File::open(path).map_err(read_failed)?;
        let output = open_tmp(tmp).map_err(write_failed)?;
        let mut encoder = GzEncoder::new(output, Compression::new(self.level));

        let mut buf = vec![0u8; COPY_BUFFER];
        let mut total = 0u64;
        loop {
            let read = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(read_failed(err)),
            };
            encoder.write_all(&buf[..read]).map_err(write_failed)?;
            total += read as u64;
        }

        let mut output = encoder.finish().map_err(write_failed)?;
        output.sync().map_err(write_failed)?;
        Ok(total)
    }
}

/// Sink for the staged artifact: a writer that can be made durable.
trait Durable: Write {
    fn sync(&mut self) -> io::Result<()>;
}

impl Durable for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

fn verify_artifact(tmp: &Path, expected: u64) -> Result<(), CompactionError> {
    let file = File::open(tmp).map_err(|source| CompactionError::ReadFailed {
        path: tmp.to_path_buf(),
        source,
    })?;
    let actual = io::copy(&mut GzDecoder::new(file), &mut io::sink()).map_err(|source| {
        CompactionError::ReadFailed {
            path: tmp.to_path_buf(),
            source,
        }
    })?;
    if actual != expected {
        return Err(CompactionError::VerifyFailed {
            path: tmp.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn has_compressed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| KNOWN_COMPRESSED.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_hidden(path: &Path) -> io::Result<bool> {
    std::fs::symlink_metadata(path)?;
    Ok(path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false))
}

#[cfg(windows)]
fn is_hidden(path: &Path) -> io::Result<bool> {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    let meta = std::fs::metadata(path)?;
    Ok(meta.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
}

#[cfg(not(any(unix, windows)))]
fn is_hidden(path: &Path) -> io::Result<bool> {
    std::fs::metadata(path)?;
    Ok(false)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let _ = File::open(parent).and_then(|dir| dir.sync_all());
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

fn with_appended_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn decode(path: &Path) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    /// Fails once more than `budget` bytes have been written.
    struct ShortWriter {
        inner: File,
        budget: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.budget {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.budget -= buf.len();
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Durable for ShortWriter {
        fn sync(&mut self) -> io::Result<()> {
            self.inner.sync_all()
        }
    }

    fn sample_content() -> Vec<u8> {
        (0..20_000)
            .map(|i| format!("{},{}.5,Good\n", 1_600_000_000 + i, i % 97))
            .collect::<String>()
            .into_bytes()
    }

    #[test]
    fn compresses_and_removes_original() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("T_a_b.csv");
        let content = sample_content();
        std::fs::write(&path, &content).unwrap();

        let outcome = Compactor::default().compact(&path).unwrap();
        let CompactOutcome::Compressed {
            artifact,
            original_bytes,
            compressed_bytes,
        } = outcome
        else {
            panic!("expected compression, got {outcome:?}");
        };

        assert_eq!(artifact, temp.path().join("T_a_b.csv.gz"));
        assert_eq!(original_bytes, content.len() as u64);
        assert!(compressed_bytes > 0 && compressed_bytes < original_bytes);
        assert_eq!(decode(&artifact), content);
        assert!(!path.exists());
        assert!(!temp.path().join("T_a_b.csv.gz.tmp").exists());
    }

    #[test]
    fn empty_file_round_trips() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("empty.csv");
        std::fs::write(&path, b"").unwrap();

        Compactor::default().compact(&path).unwrap();
        assert_eq!(decode(&temp.path().join("empty.csv.gz")), b"");
        assert!(!path.exists());
    }

    #[test]
    fn keep_original_leaves_both_files() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("keep.csv");
        std::fs::write(&path, b"1,1,Good\n").unwrap();

        Compactor::new(1).keep_original(true).compact(&path).unwrap();
        assert!(path.exists());
        assert_eq!(decode(&temp.path().join("keep.csv.gz")), b"1,1,Good\n");
    }

    #[test]
    fn skips_already_compressed() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("done.csv.gz");
        std::fs::write(&path, b"not really gzip").unwrap();

        let outcome = Compactor::default().compact(&path).unwrap();
        assert_eq!(outcome, CompactOutcome::Skipped(SkipReason::AlreadyCompressed));
        assert!(path.exists());
        assert!(!temp.path().join("done.csv.gz.gz").exists());
    }

    #[cfg(unix)]
    #[test]
    fn skips_hidden_files() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(".partial.csv");
        std::fs::write(&path, b"1,1,Good\n").unwrap();

        let outcome = Compactor::default().compact(&path).unwrap();
        assert_eq!(outcome, CompactOutcome::Skipped(SkipReason::Hidden));
        assert!(path.exists());
    }

    #[test]
    fn missing_file_is_read_failure() {
        let temp = tempdir().unwrap();
        let err = Compactor::default()
            .compact(&temp.path().join("gone.csv"))
            .unwrap_err();
        assert!(matches!(err, CompactionError::ReadFailed { .. }));
    }

    #[test]
    fn interrupted_write_keeps_original_and_no_artifact() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("T.csv");
        let content = sample_content();
        std::fs::write(&path, &content).unwrap();

        let err = Compactor::new(0)
            .compact_into(&path, |tmp| {
                Ok(ShortWriter {
                    inner: File::create(tmp)?,
                    budget: 1024,
                })
            })
            .unwrap_err();

        assert!(matches!(err, CompactionError::WriteFailed { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), content);
        assert!(!temp.path().join("T.csv.gz").exists());
        assert!(!temp.path().join("T.csv.gz.tmp").exists());
    }

    #[test]
    fn stale_tmp_is_replaced() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("T.csv");
        std::fs::write(&path, b"1,2,Good\n").unwrap();
        std::fs::write(temp.path().join("T.csv.gz.tmp"), b"old junk").unwrap();

        Compactor::default().compact(&path).unwrap();
        assert_eq!(decode(&temp.path().join("T.csv.gz")), b"1,2,Good\n");
        assert!(!temp.path().join("T.csv.gz.tmp").exists());
    }
}
