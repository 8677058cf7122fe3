//! # cstore-cas
//!
//! Content-addressed blob storage for the cstore artifact store.
//!
//! Blobs are keyed by their SHA-256 digest with a 2-level fan-out layout:
//!
//! ```text
//! <root>/
//! ├── sha256/
//! │   └── ab/
//! │       └── cd/
//! │           └── abcd1234...ef        # full digest hex
//! └── tmp/
//!     └── <pid>-<seq>.tmp              # in-flight writer staging
//! ```
//!
//! Writers stream into a staging file and commit with an atomic rename, so a
//! blob either exists completely under its digest or not at all. Identical
//! content renames onto itself, which makes deduplication free.

pub mod digest;

pub use digest::{fingerprint, hash_to_hex, hex_to_hash, sha256, sha256_hex, Sha256Hash};

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors that can occur during blob store operations.
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob not found: {hash}")]
    NotFound { hash: String },

    #[error("blob digest mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Sequence for unique staging file names within this process.
static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Content-addressed blob store rooted at a directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open or create a blob store at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path for a blob with the given digest.
    fn blob_path(&self, hash: &Sha256Hash) -> PathBuf {
        let hex = hash_to_hex(hash);
        self.root
            .join("sha256")
            .join(&hex[..2])
            .join(&hex[2..4])
            .join(&hex)
    }

    /// Begin streaming a new blob into the store.
    ///
    /// The digest is folded in incrementally on every write, so
    /// [`BlobWriter::finish`] is O(1) in the bytes written.
    pub fn writer(&self) -> Result<BlobWriter> {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let temp_path = self
            .root
            .join("tmp")
            .join(format!("{}-{}.tmp", std::process::id(), seq));
        let file = File::create(&temp_path)?;
        Ok(BlobWriter {
            store: self.clone(),
            temp_path,
            file: Some(file),
            hasher: Sha256::new(),
            written: 0,
        })
    }

    /// Store a complete byte slice, returning its digest.
    ///
    /// Convenience over [`BlobStore::writer`] for small payloads.
    #[instrument(skip(self, data), level = "debug")]
    pub fn put(&self, data: &[u8]) -> Result<Sha256Hash> {
        let mut writer = self.writer()?;
        writer.write_all(data)?;
        let (hash, _) = writer.finish()?;
        Ok(hash)
    }

    /// Open a streaming reader over a blob.
    pub fn reader(&self, hash: &Sha256Hash) -> Result<BlobReader> {
        let path = self.blob_path(hash);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                CasError::NotFound {
                    hash: hash_to_hex(hash),
                }
            } else {
                CasError::Io(e)
            }
        })?;
        Ok(BlobReader { file })
    }

    /// Read a whole blob, verifying its digest on the way out.
    #[instrument(skip(self), level = "debug")]
    pub fn get(&self, hash: &Sha256Hash) -> Result<Vec<u8>> {
        let mut reader = self.reader(hash)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        let actual = sha256(&data);
        if actual != *hash {
            return Err(CasError::HashMismatch {
                expected: hash_to_hex(hash),
                actual: hash_to_hex(&actual),
            });
        }
        Ok(data)
    }

    /// Memory-map a blob for zero-copy reads of large archives.
    pub fn map(&self, hash: &Sha256Hash) -> Result<memmap2::Mmap> {
        let path = self.blob_path(hash);
        if !path.exists() {
            return Err(CasError::NotFound {
                hash: hash_to_hex(hash),
            });
        }
        let file = File::open(&path)?;
        // Safety: blobs are immutable once committed and opened read-only.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(io::Error::other)?;
        Ok(mmap)
    }

    pub fn contains(&self, hash: &Sha256Hash) -> bool {
        self.blob_path(hash).exists()
    }

    /// Size in bytes of a stored blob.
    pub fn size(&self, hash: &Sha256Hash) -> Result<u64> {
        let path = self.blob_path(hash);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CasError::NotFound {
                hash: hash_to_hex(hash),
            }),
            Err(e) => Err(CasError::Io(e)),
        }
    }

    /// Walk the fan-out tree and count committed blobs.
    pub fn stats(&self) -> Result<BlobStats> {
        let mut stats = BlobStats::default();
        let base = self.root.join("sha256");
        if !base.exists() {
            return Ok(stats);
        }
        for l1 in fs::read_dir(&base)? {
            let l1 = l1?;
            if !l1.file_type()?.is_dir() {
                continue;
            }
            for l2 in fs::read_dir(l1.path())? {
                let l2 = l2?;
                if !l2.file_type()?.is_dir() {
                    continue;
                }
                for blob in fs::read_dir(l2.path())? {
                    let blob = blob?;
                    if blob.file_type()?.is_file() {
                        stats.blob_count += 1;
                        stats.total_bytes += blob.metadata()?.len();
                    }
                }
            }
        }
        Ok(stats)
    }
}

/// Counters over the committed blob tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobStats {
    pub blob_count: u64,
    pub total_bytes: u64,
}

/// Streaming sink that commits one blob on [`BlobWriter::finish`].
///
/// Dropping an unfinished writer discards the staging file and commits
/// nothing.
#[derive(Debug)]
pub struct BlobWriter {
    store: BlobStore,
    temp_path: PathBuf,
    file: Option<File>,
    hasher: Sha256,
    written: u64,
}

impl BlobWriter {
    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Finalize the blob: flush, fsync, and rename into the fan-out tree.
    ///
    /// Returns the content digest and byte length. If another writer
    /// committed the same content first, the rename lands on the existing
    /// blob and this staging copy is discarded.
    pub fn finish(mut self) -> Result<(Sha256Hash, u64)> {
        let mut file = self.file.take().expect("staging file present until finish");
        file.flush()?;
        file.sync_all()?;
        drop(file);

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&std::mem::take(&mut self.hasher).finalize());

        let path = self.store.blob_path(&hash);
        let commit = (|| {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&self.temp_path, &path)
        })();
        if let Err(e) = commit {
            let _ = fs::remove_file(&self.temp_path);
            if !path.exists() {
                return Err(CasError::Io(e));
            }
            debug!(hash = %hash_to_hex(&hash), "blob already present, staging copy dropped");
        }
        Ok((hash, self.written))
    }

    /// Discard the staging file without committing anything.
    pub fn abort(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("blob writer already finished"))?;
        let n = file.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Streaming reader over one committed blob.
#[derive(Debug)]
pub struct BlobReader {
    file: File,
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl io::Seek for BlobReader {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}
