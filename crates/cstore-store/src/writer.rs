//! Publish writer bound to a set of leased URLs.

use std::io::{self, Write};

use tracing::{debug, warn};
use uuid::Uuid;

use cstore_cas::{hash_to_hex, BlobWriter};
use cstore_registry::{NewRevision, RegistryError};

use crate::{Store, StoreError};

/// Streaming sink for one publish.
///
/// Obtained from [`Store::add_charm`]; the caller streams the bundle
/// archive into it and must finish with exactly one [`CharmWriter::close`].
/// Closing promotes the blob to a new revision across every URL of the
/// publish; closing before any write abandons the publish and only
/// releases the leases. Dropping an unclosed writer abandons it the same
/// way, discarding whatever was staged.
#[derive(Debug)]
pub struct CharmWriter {
    store: Store,
    urls: Vec<String>,
    owner: Uuid,
    fingerprint: String,
    blob: Option<BlobWriter>,
    dirty: bool,
}

impl CharmWriter {
    pub(crate) fn new(
        store: Store,
        urls: Vec<String>,
        owner: Uuid,
        fingerprint: String,
        blob: BlobWriter,
    ) -> Self {
        Self {
            store,
            urls,
            owner,
            fingerprint,
            blob: Some(blob),
            dirty: false,
        }
    }

    /// Finalize the publish.
    ///
    /// - never written: releases the leases, commits nothing, returns `Ok`;
    /// - lease stolen while writing: discards the staged bytes and fails
    ///   with [`StoreError::UpdateConflict`];
    /// - otherwise: commits the blob and appends the shared revision across
    ///   the URL set, consuming the leases.
    ///
    /// A second call fails with [`StoreError::Closed`].
    pub fn close(&mut self) -> Result<(), StoreError> {
        let blob = self.blob.take().ok_or(StoreError::Closed)?;

        if !self.dirty {
            blob.abort();
            self.store.registry().release(&self.urls, self.owner)?;
            return Ok(());
        }

        // Cheap pre-check so the common stolen-lease case commits no blob.
        if !self.store.registry().verify(&self.urls, self.owner)? {
            blob.abort();
            let _ = self.store.registry().release(&self.urls, self.owner);
            debug!("lease lost during write, publish abandoned");
            return Err(StoreError::UpdateConflict);
        }

        let (hash, size) = blob.finish()?;
        let sha256 = hash_to_hex(&hash);
        let entry = NewRevision {
            blob_id: sha256.clone(),
            fingerprint: self.fingerprint.clone(),
            sha256,
            size,
        };

        match self.store.registry().append_owned(&self.urls, self.owner, &entry) {
            Ok(revision) => {
                debug!(revision, size, "publish finalized");
                Ok(())
            }
            Err(e @ RegistryError::LeaseLost { .. }) => {
                // The blob stays orphaned for an out-of-band sweeper; any
                // leases still ours are dropped so contenders move on.
                let _ = self.store.registry().release(&self.urls, self.owner);
                debug!(error = %e, "lease lost at finalize");
                Err(StoreError::UpdateConflict)
            }
            Err(e) => {
                let _ = self.store.registry().release(&self.urls, self.owner);
                Err(e.into())
            }
        }
    }

    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.blob.as_ref().map_or(0, BlobWriter::bytes_written)
    }
}

impl Write for CharmWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let blob = self
            .blob
            .as_mut()
            .ok_or_else(|| io::Error::other(StoreError::Closed))?;
        self.dirty = true;
        blob.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.blob.as_mut() {
            Some(blob) => blob.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for CharmWriter {
    fn drop(&mut self) {
        if let Some(blob) = self.blob.take() {
            blob.abort();
            if let Err(e) = self.store.registry().release(&self.urls, self.owner) {
                warn!(error = %e, "failed to release publish leases on drop");
            }
        }
    }
}
