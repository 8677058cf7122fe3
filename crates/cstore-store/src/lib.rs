//! # cstore-store
//!
//! Publish coordinator for the charm artifact store.
//!
//! A publish carries a bundle source, a set of charm URLs, and an update
//! key. The coordinator refuses the publish outright when every URL is
//! already current for that `(key, source)` pair, otherwise it takes
//! exclusive leases on the whole URL set and hands back a [`CharmWriter`].
//! Closing the writer promotes the streamed bytes to one shared revision
//! number across the set and drops the leases; abandoning it (close
//! without writing, or drop) just drops the leases.
//!
//! ```no_run
//! use std::io::Write;
//! use cstore_config::Config;
//! use cstore_store::{CharmBytes, CharmSource, Store};
//! use cstore_url::CharmUrl;
//!
//! # fn main() -> Result<(), cstore_store::StoreError> {
//! let store = Store::open(&Config::load().unwrap())?;
//! let urls = vec![CharmUrl::parse("cs:oneiric/wordpress").unwrap()];
//! let source = CharmBytes::new(&b"bundle bytes"[..]);
//!
//! let (mut writer, revision) = store.add_charm(&source, &urls, "build-42")?;
//! source.archive_to(&mut writer)?;
//! writer.close()?;
//!
//! let (_reader, info) = store.open_charm(&urls[0])?;
//! assert_eq!(info.revision, revision);
//! # Ok(())
//! # }
//! ```

pub mod bundle;
mod writer;

pub use bundle::{CharmBytes, CharmDir, CharmSource};
pub use writer::CharmWriter;

use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use cstore_cas::{fingerprint, hex_to_hash, BlobReader, BlobStats, BlobStore, CasError};
use cstore_config::Config;
use cstore_registry::{Registry, RegistryError};
use cstore_url::CharmUrl;

/// Errors surfaced by store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Another live lease overlaps the requested URL set. Retryable once
    /// the holder finishes or its lease expires.
    #[error("charm update already in progress")]
    UpdateInProgress,

    /// The publish lease was stolen via expiration before finalize. The
    /// writer is dead; the caller must start the publish over.
    #[error("charm update conflict: publish lease lost")]
    UpdateConflict,

    /// Every URL in the set already carries a revision with the candidate
    /// fingerprint. Success-like: nothing needed publishing.
    #[error("charm is already up-to-date")]
    AlreadyCurrent,

    /// The URL, or the requested revision of it, does not exist.
    #[error("charm not found: {0}")]
    NotFound(String),

    /// Operation on an already-closed writer.
    #[error("charm writer already closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Registry(RegistryError),

    #[error(transparent)]
    Blob(CasError),
}

impl From<RegistryError> for StoreError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::LeaseHeld { .. } => StoreError::UpdateInProgress,
            RegistryError::LeaseLost { .. } => StoreError::UpdateConflict,
            other => StoreError::Registry(other),
        }
    }
}

impl From<CasError> for StoreError {
    fn from(e: CasError) -> Self {
        StoreError::Blob(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Metadata of one opened charm revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharmInfo {
    /// Revision the read resolved to.
    pub revision: u32,
    /// Lower-case hex SHA-256 of the bundle bytes.
    pub sha256: String,
    /// Bundle length in bytes.
    pub size: u64,
}

/// The charm artifact store.
///
/// Cheap to clone; clones share the blob tree and registry handles, and a
/// clone per thread is the intended way to publish concurrently.
#[derive(Debug, Clone)]
pub struct Store {
    blobs: BlobStore,
    registry: Registry,
}

impl Store {
    /// Open the store described by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_at(
            config.blob_root(),
            config.registry_dir(),
            config.update_timeout(),
        )
    }

    /// Open a store at explicit paths, bypassing configuration files.
    pub fn open_at<B, R>(blob_root: B, registry_dir: R, update_timeout: Duration) -> Result<Self>
    where
        B: AsRef<Path>,
        R: AsRef<Path>,
    {
        Ok(Self {
            blobs: BlobStore::open(blob_root)?,
            registry: Registry::open(registry_dir, update_timeout)?,
        })
    }

    /// The underlying lock registry and revision index.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Begin publishing `source` under every URL in `urls`.
    ///
    /// Returns the writer to stream the bundle archive into, plus the
    /// revision number the publish will be assigned. Fails fast with
    /// [`StoreError::AlreadyCurrent`] when every URL's latest revision
    /// already carries the `(update_key, source)` fingerprint, and with
    /// [`StoreError::UpdateInProgress`] when any URL is leased by a live
    /// publish.
    #[instrument(skip(self, source), level = "debug")]
    pub fn add_charm(
        &self,
        source: &dyn CharmSource,
        urls: &[CharmUrl],
        update_key: &str,
    ) -> Result<(CharmWriter, u32)> {
        let keys = lock_keys(urls);
        if keys.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no URLs to publish").into());
        }

        let candidate = fingerprint(update_key, &source.digest()?);
        let latest = self.registry.peek(&keys)?;
        if latest
            .iter()
            .all(|e| e.as_ref().is_some_and(|e| e.fingerprint == candidate))
        {
            debug!("publish refused, all URLs current");
            return Err(StoreError::AlreadyCurrent);
        }

        let owner = Uuid::new_v4();
        self.registry.acquire(&keys, owner)?;

        // Under the lease the promised revision cannot move any more.
        let setup = (|| -> Result<(u32, cstore_cas::BlobWriter)> {
            let latest = self.registry.peek(&keys)?;
            let revision = latest
                .iter()
                .flatten()
                .map(|e| e.revision)
                .max()
                .map_or(0, |m| m + 1);
            let blob = self.blobs.writer()?;
            Ok((revision, blob))
        })();
        match setup {
            Ok((revision, blob)) => {
                debug!(revision, urls = keys.len(), "publish leased");
                let writer = CharmWriter::new(self.clone(), keys, owner, candidate, blob);
                Ok((writer, revision))
            }
            Err(e) => {
                let _ = self.registry.release(&keys, owner);
                Err(e)
            }
        }
    }

    /// Open one revision of a charm for reading.
    ///
    /// An unset revision slot resolves to the latest revision; the caller's
    /// URL value is only read, never rewritten.
    #[instrument(skip(self), level = "debug")]
    pub fn open_charm(&self, url: &CharmUrl) -> Result<(BlobReader, CharmInfo)> {
        let entry = self
            .registry
            .lookup(&url.key(), url.revision())?
            .ok_or_else(|| StoreError::NotFound(url.to_string()))?;

        let hash = hex_to_hash(&entry.blob_id).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("corrupt blob id in index: {}", entry.blob_id),
            )
        })?;
        let reader = self.blobs.reader(&hash)?;
        Ok((
            reader,
            CharmInfo {
                revision: entry.revision,
                sha256: entry.sha256,
                size: entry.size,
            },
        ))
    }

    /// Read a whole charm bundle, verifying its digest on the way out.
    pub fn read_charm(&self, url: &CharmUrl) -> Result<(Vec<u8>, CharmInfo)> {
        let entry = self
            .registry
            .lookup(&url.key(), url.revision())?
            .ok_or_else(|| StoreError::NotFound(url.to_string()))?;
        let hash = hex_to_hash(&entry.blob_id).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("corrupt blob id in index: {}", entry.blob_id),
            )
        })?;
        let data = self.blobs.get(&hash)?;
        Ok((
            data,
            CharmInfo {
                revision: entry.revision,
                sha256: entry.sha256,
                size: entry.size,
            },
        ))
    }

    /// Counters over the committed blob tree.
    pub fn stats(&self) -> Result<BlobStats> {
        Ok(self.blobs.stats()?)
    }
}

/// Canonical lock keys for a publish set, first occurrence wins.
///
/// Deduplication matters: a repeated URL must not contend with itself in
/// the lock registry.
fn lock_keys(urls: &[CharmUrl]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(urls.len());
    for url in urls {
        let key = url.key();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_keys_dedupe_and_strip_revision() {
        let urls = vec![
            CharmUrl::parse("cs:oneiric/wordpress-1").unwrap(),
            CharmUrl::parse("cs:oneiric/wordpress-2").unwrap(),
            CharmUrl::parse("cs:oneiric/mysql").unwrap(),
        ];
        assert_eq!(
            lock_keys(&urls),
            vec!["cs:oneiric/wordpress".to_string(), "cs:oneiric/mysql".to_string()]
        );
    }
}
