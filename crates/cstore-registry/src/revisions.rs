//! Append-only revision index.
//!
//! Revision promotion across a URL set is a single write transaction that
//! re-verifies lease ownership, computes one shared revision number, appends
//! an entry to every record, and deletes the leases. A thief's `acquire`
//! and a victim's `append_owned` serialize on the LMDB write lock, so the
//! ownership check cannot race the theft.

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{NewRevision, Registry, RegistryError, RevisionEntry, Result};

impl Registry {
    /// Latest revision entry for each URL in `urls` (`None` if unpublished).
    pub fn peek(&self, urls: &[String]) -> Result<Vec<Option<RevisionEntry>>> {
        let rtxn = self.env.read_txn()?;
        urls.iter()
            .map(|url| {
                Ok(self
                    .charms
                    .get(&rtxn, url)?
                    .and_then(|record| record.revisions.last().cloned()))
            })
            .collect()
    }

    /// Look up one revision of a URL; `None` revision means latest.
    ///
    /// Returns `Ok(None)` when the URL was never published or the requested
    /// revision does not exist for it.
    pub fn lookup(&self, url: &str, revision: Option<u32>) -> Result<Option<RevisionEntry>> {
        let rtxn = self.env.read_txn()?;
        let Some(record) = self.charms.get(&rtxn, url)? else {
            return Ok(None);
        };
        Ok(match revision {
            None => record.revisions.last().cloned(),
            Some(rev) => record
                .revisions
                .binary_search_by_key(&rev, |e| e.revision)
                .ok()
                .map(|i| record.revisions[i].clone()),
        })
    }

    /// Promote `entry` to a new revision across every URL in `urls`.
    ///
    /// The shared revision number is `1 + max(latest across urls)`, or 0
    /// when none of them was ever published: a URL lagging behind the set
    /// jumps forward so the whole set exposes the same number. The caller's
    /// leases are re-checked and consumed in the same transaction; if any
    /// was stolen, nothing is appended.
    #[instrument(skip(self, urls, entry), level = "debug")]
    pub fn append_owned(&self, urls: &[String], owner: Uuid, entry: &NewRevision) -> Result<u32> {
        let mut wtxn = self.env.write_txn()?;

        for url in urls {
            match self.locks.get(&wtxn, url)? {
                Some(record) if record.owner == *owner.as_bytes() => {}
                _ => {
                    debug!(url = %url, "lease lost before append");
                    return Err(RegistryError::LeaseLost { url: url.clone() });
                }
            }
        }

        let mut records = Vec::with_capacity(urls.len());
        let mut max: Option<u32> = None;
        for url in urls {
            let record = self.charms.get(&wtxn, url)?.unwrap_or_default();
            if let Some(last) = record.revisions.last() {
                max = Some(max.map_or(last.revision, |m| m.max(last.revision)));
            }
            records.push(record);
        }
        let revision = max.map_or(0, |m| m + 1);

        for (url, mut record) in urls.iter().zip(records) {
            record.revisions.push(RevisionEntry {
                revision,
                blob_id: entry.blob_id.clone(),
                fingerprint: entry.fingerprint.clone(),
                sha256: entry.sha256.clone(),
                size: entry.size,
            });
            self.charms.put(&mut wtxn, url, &record)?;
            self.locks.delete(&mut wtxn, url)?;
        }

        wtxn.commit()?;
        debug!(revision, "revision promoted");
        Ok(revision)
    }
}
