//! Charm bundle sources.
//!
//! A [`CharmSource`] feeds a publish twice: once for its *identity* (a
//! stable digest derivable without streaming the archive, used by the
//! early-currency check) and once for its *bytes* (streamed into the
//! writer the coordinator hands back).
//!
//! [`CharmDir`] derives its identity from the bundle's metadata listing
//! (relative path, entry kind, permission mode, and size of every file),
//! so a rebuild that preserves the tree shape fingerprints identically
//! even when mtimes moved. File contents are deliberately not read.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use cstore_cas::sha256_hex;

/// A publishable charm bundle.
pub trait CharmSource {
    /// Stable identity of the source, derivable without streaming the
    /// archive.
    fn digest(&self) -> io::Result<String>;

    /// Stream the bundle archive into `w`.
    fn archive_to(&self, w: &mut dyn Write) -> io::Result<()>;
}

/// A charm read from a directory tree, archived as a deterministic tar.
#[derive(Debug, Clone)]
pub struct CharmDir {
    path: PathBuf,
}

impl CharmDir {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("charm directory not found: {}", path.display()),
            ));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sorted walk over the tree, root excluded.
    fn entries(&self) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> + '_ {
        WalkDir::new(&self.path)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
    }
}

impl CharmSource for CharmDir {
    fn digest(&self) -> io::Result<String> {
        let mut listing = Vec::new();
        for entry in self.entries() {
            let entry = entry.map_err(io::Error::from)?;
            let meta = entry.metadata().map_err(io::Error::from)?;
            let rel = entry
                .path()
                .strip_prefix(&self.path)
                .unwrap_or(entry.path());

            listing.extend_from_slice(rel.to_string_lossy().as_bytes());
            listing.push(0);
            listing.push(if meta.is_dir() { b'd' } else { b'f' });
            listing.extend_from_slice(&file_mode(&meta).to_be_bytes());
            let size = if meta.is_dir() { 0 } else { meta.len() };
            listing.extend_from_slice(&size.to_be_bytes());
            listing.push(b'\n');
        }
        Ok(sha256_hex(&listing))
    }

    fn archive_to(&self, w: &mut dyn Write) -> io::Result<()> {
        let mut builder = tar::Builder::new(w);
        for entry in self.entries() {
            let entry = entry.map_err(io::Error::from)?;
            let meta = entry.metadata().map_err(io::Error::from)?;
            if !meta.is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.path)
                .unwrap_or(entry.path());

            // Zeroed mtime keeps the archive byte-identical across rebuilds.
            let mut header = tar::Header::new_gnu();
            header.set_size(meta.len());
            header.set_mode(file_mode(&meta));
            header.set_mtime(0);
            header.set_cksum();
            builder.append_data(&mut header, rel, File::open(entry.path())?)?;
        }
        builder.finish()
    }
}

/// An in-memory charm payload, for embedders and tests.
#[derive(Debug, Clone)]
pub struct CharmBytes {
    data: Vec<u8>,
}

impl CharmBytes {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl CharmSource for CharmBytes {
    fn digest(&self) -> io::Result<String> {
        Ok(sha256_hex(&self.data))
    }

    fn archive_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_all(&self.data)
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> u32 {
    0o644
}
