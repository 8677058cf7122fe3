//! # cstore-registry
//!
//! Persistent coordination state for the charm store: per-URL publish
//! leases and the append-only revision index, both in one LMDB
//! environment with ACID transactions.
//!
//! ## Databases
//!
//! - `locks`: URL key → [`LockRecord`]. Existence of a record means the
//!   lease is held; a record older than the update timeout is abandoned
//!   and may be overwritten by any contender.
//! - `charms`: URL key → [`CharmRecord`], an ordered append-only list of
//!   revision entries. Entries are only ever appended under a lease.
//!
//! Cross-process coordination rides entirely on LMDB's single-writer
//! transactions: lease acquisition, theft, and revision promotion each run
//! in one write transaction, so contenders on different processes serialize
//! on the environment's write lock and observe each other's commits.

pub mod locks;
pub mod revisions;

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Lease lifetime before a lock record is considered abandoned.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors from registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("index error: {0}")]
    Heed(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("publish lease already held for {url}")]
    LeaseHeld { url: String },

    #[error("publish lease for {url} lost before finalize")]
    LeaseLost { url: String },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// One immutable snapshot of a URL's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionEntry {
    /// Zero-based revision number, strictly increasing within a record.
    pub revision: u32,
    /// Handle of the content blob (its digest hex).
    pub blob_id: String,
    /// Publish fingerprint used for no-op detection.
    pub fingerprint: String,
    /// Lower-case hex SHA-256 of the raw blob bytes.
    pub sha256: String,
    /// Blob length in bytes.
    pub size: u64,
}

/// Append-only revision history of one URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharmRecord {
    pub revisions: Vec<RevisionEntry>,
}

/// Ephemeral publish lease on one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Owner token (UUID bytes) of the writer holding the lease.
    pub owner: [u8; 16],
    /// Wall-clock acquisition time, nanoseconds since the Unix epoch.
    pub acquired_at: u64,
}

/// Fields of a revision entry about to be promoted across a URL set.
#[derive(Debug, Clone)]
pub struct NewRevision {
    pub blob_id: String,
    pub fingerprint: String,
    pub sha256: String,
    pub size: u64,
}

/// Lock registry and revision index over one LMDB environment.
#[derive(Clone)]
pub struct Registry {
    env: Env,
    charms: Database<Str, SerdeBincode<CharmRecord>>,
    locks: Database<Str, SerdeBincode<LockRecord>>,
    update_timeout_ns: u64,
}

impl Registry {
    /// Default LMDB map size: 1 GiB (virtual, grows on demand).
    const MAP_SIZE: usize = 1024 * 1024 * 1024;
    const MAX_READERS: u32 = 128;

    /// Open or create the registry at `path` (a directory).
    pub fn open<P: AsRef<Path>>(path: P, update_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(Self::MAP_SIZE)
                .max_readers(Self::MAX_READERS)
                .max_dbs(2)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let charms = env.create_database(&mut wtxn, Some("charms"))?;
        let locks = env.create_database(&mut wtxn, Some("locks"))?;
        wtxn.commit()?;

        debug!(path = %path.display(), "opened registry");

        Ok(Self {
            env,
            charms,
            locks,
            update_timeout_ns: update_timeout.as_nanos() as u64,
        })
    }

    /// The configured lease timeout.
    pub fn update_timeout(&self) -> Duration {
        Duration::from_nanos(self.update_timeout_ns)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("update_timeout_ns", &self.update_timeout_ns)
            .finish_non_exhaustive()
    }
}

/// Wall-clock time in nanoseconds since the Unix epoch.
pub(crate) fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
