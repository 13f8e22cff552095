// In-process lock store
//
// Records are kept in their serialized form so every read goes through the
// same codec a remote backend would use.

use super::{lease_key, LockStore};
use crate::{
    lease::Lease,
    time::{Clock, SystemClock},
    Error, Result,
};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use std::time::Duration;

/// Lock store backed by a concurrent map.
///
/// Create-if-absent and owner-checked renew both run under the map's per-key
/// lock, so they are atomic with respect to every other handle sharing the
/// same map. Records are never evicted on expiry; stale records stay visible
/// until somebody clears them.
#[derive(Debug, Clone)]
pub struct MemoryLockStore {
    records: Arc<DashMap<String, String>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLockStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Write a record directly, bypassing ownership rules.
    pub fn insert_record(&self, name: &str, lease: &Lease) -> Result<()> {
        self.records.insert(lease_key(name), lease.to_json()?);
        Ok(())
    }

    /// Raw serialized record, if any.
    pub fn raw_record(&self, name: &str) -> Option<String> {
        self.records.get(&lease_key(name)).map(|v| v.clone())
    }
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get_lease(&self, name: &str) -> Result<Lease> {
        match self.records.get(&lease_key(name)) {
            Some(raw) => Lease::from_json(raw.value()),
            None => Err(Error::NoLeaseFound),
        }
    }

    async fn obtain_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease> {
        let lease = Lease::new(instance, self.clock.now(), ttl);

        match self.records.entry(lease_key(name)) {
            Entry::Occupied(existing) => {
                let holder = Lease::from_json(existing.get()).ok().map(|l| l.owner);
                Err(Error::LeaseHeldByOther { holder })
            }
            Entry::Vacant(slot) => {
                slot.insert(lease.to_json()?);
                Ok(lease)
            }
        }
    }

    async fn renew_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease> {
        let mut raw = self
            .records
            .get_mut(&lease_key(name))
            .ok_or(Error::NoLeaseFound)?;

        let current = Lease::from_json(raw.value())?;
        if !current.is_owned_by(instance) {
            return Err(Error::NotLeaseOwner {
                owner: current.owner,
            });
        }

        let lease = Lease::new(instance, self.clock.now(), ttl);
        *raw = lease.to_json()?;
        Ok(lease)
    }

    async fn release_lease(&self, name: &str, instance: &str) -> Result<()> {
        self.records.remove_if(&lease_key(name), |_, raw| {
            Lease::from_json(raw).is_ok_and(|l| l.is_owned_by(instance))
        });
        Ok(())
    }

    async fn clear_lease(&self, name: &str) -> Result<()> {
        self.records.remove(&lease_key(name));
        Ok(())
    }

    async fn clear_stale_lease(&self, name: &str, observed: &Lease) -> Result<()> {
        self.records.remove_if(&lease_key(name), |_, raw| {
            Lease::from_json(raw).is_ok_and(|l| l == *observed)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use chrono::{TimeZone, Utc};

    const TTL: Duration = Duration::from_secs(15);

    fn store() -> (MemoryLockStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2023, 11, 21, 15, 4, 5).unwrap(),
        ));
        (MemoryLockStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_get_missing_lease() {
        let (store, _) = store();
        let result = store.get_lease("leader").await;
        assert!(matches!(result, Err(Error::NoLeaseFound)));
    }

    #[tokio::test]
    async fn test_obtain_sets_record() {
        let (store, clock) = store();
        let lease = store.obtain_lease("leader", "bongo", TTL).await.unwrap();

        assert_eq!(lease.owner, "bongo");
        assert_eq!(lease.expires_at, clock.now() + chrono::Duration::seconds(15));
        assert_eq!(
            store.raw_record("leader").unwrap(),
            r#"{"owner":"bongo","expiresAt":"2023-11-21T15:04:20Z"}"#
        );
        assert_eq!(store.get_lease("leader").await.unwrap(), lease);
    }

    #[tokio::test]
    async fn test_obtain_never_overwrites() {
        let (store, clock) = store();
        store.obtain_lease("leader", "a", TTL).await.unwrap();

        let result = store.obtain_lease("leader", "b", TTL).await;
        assert!(matches!(
            result,
            Err(Error::LeaseHeldByOther { holder: Some(ref h) }) if h == "a"
        ));

        // Not even once stale
        clock.advance(Duration::from_secs(60));
        let result = store.obtain_lease("leader", "b", TTL).await;
        assert!(matches!(result, Err(Error::LeaseHeldByOther { .. })));
        assert_eq!(store.get_lease("leader").await.unwrap().owner, "a");
    }

    #[tokio::test]
    async fn test_renew_extends_expiry() {
        let (store, clock) = store();
        let first = store.obtain_lease("leader", "a", TTL).await.unwrap();

        clock.advance(Duration::from_secs(10));
        let renewed = store.renew_lease("leader", "a", TTL).await.unwrap();

        assert!(renewed.expires_at > first.expires_at);
        assert_eq!(store.get_lease("leader").await.unwrap(), renewed);
    }

    #[tokio::test]
    async fn test_renew_someone_elses_lease() {
        let (store, _) = store();
        store.obtain_lease("leader", "bingo", TTL).await.unwrap();

        let result = store.renew_lease("leader", "bongo", TTL).await;
        assert!(matches!(
            result,
            Err(Error::NotLeaseOwner { ref owner }) if owner == "bingo"
        ));
    }

    #[tokio::test]
    async fn test_renew_missing_lease() {
        let (store, _) = store();
        let result = store.renew_lease("leader", "bongo", TTL).await;
        assert!(matches!(result, Err(Error::NoLeaseFound)));
    }

    #[tokio::test]
    async fn test_release_only_own_lease() {
        let (store, _) = store();
        store.obtain_lease("leader", "a", TTL).await.unwrap();

        store.release_lease("leader", "b").await.unwrap();
        store.release_lease("leader", "b").await.unwrap();
        assert_eq!(store.get_lease("leader").await.unwrap().owner, "a");

        store.release_lease("leader", "a").await.unwrap();
        assert!(matches!(
            store.get_lease("leader").await,
            Err(Error::NoLeaseFound)
        ));

        // Missing record is fine too
        store.release_lease("leader", "a").await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let (store, _) = store();
        store.obtain_lease("leader", "a", TTL).await.unwrap();

        store.clear_lease("leader").await.unwrap();
        store.clear_lease("leader").await.unwrap();
        assert!(store.raw_record("leader").is_none());
    }

    #[tokio::test]
    async fn test_clear_stale_only_removes_the_observed_record() {
        let (store, clock) = store();
        let stale = store.obtain_lease("leader", "c", TTL).await.unwrap();
        clock.advance(Duration::from_secs(20));

        store.clear_stale_lease("leader", &stale).await.unwrap();
        assert!(store.raw_record("leader").is_none());

        // A second taker still holding the old read must not touch the new lease
        let fresh = store.obtain_lease("leader", "b", TTL).await.unwrap();
        store.clear_stale_lease("leader", &stale).await.unwrap();
        assert_eq!(store.get_lease("leader").await.unwrap(), fresh);

        // Missing record is fine too
        store.clear_lease("leader").await.unwrap();
        store.clear_stale_lease("leader", &stale).await.unwrap();
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let (store, _) = store();
        store.obtain_lease("alpha", "a", TTL).await.unwrap();
        store.obtain_lease("beta", "b", TTL).await.unwrap();

        assert_eq!(store.get_lease("alpha").await.unwrap().owner, "a");
        assert_eq!(store.get_lease("beta").await.unwrap().owner, "b");
    }

    #[tokio::test]
    async fn test_concurrent_obtain_has_one_winner() {
        let (store, _) = store();
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.obtain_lease("leader", &format!("node{i}"), TTL).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
