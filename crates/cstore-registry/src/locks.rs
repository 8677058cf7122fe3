//! Per-URL publish leases with wall-clock expiration.
//!
//! A lease is a conditional insert: it succeeds iff no record exists for
//! the URL, or the existing record has outlived the update timeout (the
//! stale record is then overwritten). Acquisition of a URL set is
//! all-or-nothing: every conditional insert runs in one write transaction,
//! and any conflict aborts the transaction, so a partial acquisition never
//! leaves zombie leases behind.

use std::time::Duration;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{now_ns, LockRecord, Registry, RegistryError, Result};

impl Registry {
    /// Acquire leases on every URL in `urls` for `owner`, atomically.
    ///
    /// Fails with [`RegistryError::LeaseHeld`] if any URL carries a live
    /// lease; in that case no lease in the set is taken.
    #[instrument(skip(self, urls), level = "debug")]
    pub fn acquire(&self, urls: &[String], owner: Uuid) -> Result<()> {
        let now = now_ns();
        let mut wtxn = self.env.write_txn()?;

        for url in urls {
            if let Some(existing) = self.locks.get(&wtxn, url)? {
                let expires_at = existing.acquired_at.saturating_add(self.update_timeout_ns);
                if now < expires_at {
                    // Dropping the transaction rolls back leases taken so
                    // far in this call.
                    debug!(url = %url, "lease conflict");
                    return Err(RegistryError::LeaseHeld { url: url.clone() });
                }
                debug!(url = %url, "reclaiming abandoned lease");
            }
            let record = LockRecord {
                owner: *owner.as_bytes(),
                acquired_at: now,
            };
            self.locks.put(&mut wtxn, url, &record)?;
        }

        wtxn.commit()?;
        Ok(())
    }

    /// Release the leases in `urls` that are still owned by `owner`.
    ///
    /// Leases stolen via expiration are silently skipped.
    pub fn release(&self, urls: &[String], owner: Uuid) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        for url in urls {
            match self.locks.get(&wtxn, url)? {
                Some(record) if record.owner == *owner.as_bytes() => {
                    self.locks.delete(&mut wtxn, url)?;
                }
                _ => {}
            }
        }
        wtxn.commit()?;
        Ok(())
    }

    /// True iff every URL in `urls` still shows `owner`'s lease.
    pub fn verify(&self, urls: &[String], owner: Uuid) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        for url in urls {
            match self.locks.get(&rtxn, url)? {
                Some(record) if record.owner == *owner.as_bytes() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Rewind a lease's acquisition time by `delta`.
    ///
    /// Test hook for forcing expiration without waiting out the timeout;
    /// a no-op if the URL carries no lease.
    pub fn backdate(&self, url: &str, delta: Duration) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        if let Some(mut record) = self.locks.get(&wtxn, url)? {
            record.acquired_at = record
                .acquired_at
                .saturating_sub(delta.as_nanos() as u64);
            self.locks.put(&mut wtxn, url, &record)?;
        }
        wtxn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_UPDATE_TIMEOUT;
    use tempfile::TempDir;

    fn registry(temp: &TempDir) -> Registry {
        Registry::open(temp.path().join("registry"), DEFAULT_UPDATE_TIMEOUT).unwrap()
    }

    fn urls(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        let owner = Uuid::new_v4();
        let set = urls(&["cs:oneiric/a", "cs:oneiric/b"]);

        reg.acquire(&set, owner).unwrap();
        assert!(reg.verify(&set, owner).unwrap());

        reg.release(&set, owner).unwrap();
        assert!(!reg.verify(&set, owner).unwrap());

        // Released URLs are immediately reacquirable.
        reg.acquire(&set, Uuid::new_v4()).unwrap();
    }

    #[test]
    fn test_overlapping_acquire_conflicts_and_rolls_back() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);

        let holder = Uuid::new_v4();
        reg.acquire(&urls(&["cs:oneiric/b"]), holder).unwrap();

        // {a, b} overlaps on b; the whole set must fail.
        let contender = Uuid::new_v4();
        let err = reg
            .acquire(&urls(&["cs:oneiric/a", "cs:oneiric/b"]), contender)
            .unwrap_err();
        assert!(matches!(err, RegistryError::LeaseHeld { url } if url == "cs:oneiric/b"));

        // The failed call must not have left a lease on a.
        reg.acquire(&urls(&["cs:oneiric/a"]), Uuid::new_v4()).unwrap();
    }

    #[test]
    fn test_expired_lease_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);

        let old = Uuid::new_v4();
        reg.acquire(&urls(&["cs:oneiric/a"]), old).unwrap();
        reg.backdate("cs:oneiric/a", DEFAULT_UPDATE_TIMEOUT + Duration::from_secs(10))
            .unwrap();

        let thief = Uuid::new_v4();
        reg.acquire(&urls(&["cs:oneiric/a"]), thief).unwrap();

        assert!(!reg.verify(&urls(&["cs:oneiric/a"]), old).unwrap());
        assert!(reg.verify(&urls(&["cs:oneiric/a"]), thief).unwrap());
    }

    #[test]
    fn test_release_skips_stolen_lease() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        let set = urls(&["cs:oneiric/a"]);

        let victim = Uuid::new_v4();
        reg.acquire(&set, victim).unwrap();
        reg.backdate("cs:oneiric/a", DEFAULT_UPDATE_TIMEOUT + Duration::from_secs(10))
            .unwrap();

        let thief = Uuid::new_v4();
        reg.acquire(&set, thief).unwrap();

        // The victim's release must not disturb the thief's lease.
        reg.release(&set, victim).unwrap();
        assert!(reg.verify(&set, thief).unwrap());
    }

    #[test]
    fn test_unexpired_lease_is_not_reclaimed() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        let set = urls(&["cs:oneiric/a"]);

        reg.acquire(&set, Uuid::new_v4()).unwrap();
        assert!(reg.acquire(&set, Uuid::new_v4()).is_err());
    }
}
