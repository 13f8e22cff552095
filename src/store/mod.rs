// Lock store capability and backend adapters
//
// Every backend must offer an atomic create-if-absent write. Mutual
// exclusion between instances rests entirely on it.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryLockStore;
pub use self::redis::RedisLockStore;

use crate::{lease::Lease, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Backend key for an election namespace.
///
/// Must stay stable across every process sharing the namespace.
pub fn lease_key(name: &str) -> String {
    format!("{name}-leader")
}

/// Five operations the election engine drives against a backing store.
///
/// Expected outcomes are reported through [`crate::Error`]:
/// `NoLeaseFound`, `LeaseHeldByOther` and `NotLeaseOwner`. Anything else is a
/// backend failure.
#[async_trait]
pub trait LockStore: Send + Sync + std::fmt::Debug {
    /// Read the current record without mutating it.
    async fn get_lease(&self, name: &str) -> Result<Lease>;

    /// Create the record only if absent. Never overwrites, even a stale record.
    async fn obtain_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease>;

    /// Overwrite the record with a fresh expiry if `instance` is the owner.
    async fn renew_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease>;

    /// Delete the record if `instance` owns it; otherwise a no-op.
    async fn release_lease(&self, name: &str, instance: &str) -> Result<()>;

    /// Unconditional, idempotent delete.
    async fn clear_lease(&self, name: &str) -> Result<()>;

    /// Delete the record only if it is still exactly `observed`; otherwise a
    /// no-op. A lease written by someone else after `observed` was read
    /// survives.
    async fn clear_stale_lease(&self, name: &str, observed: &Lease) -> Result<()>;
}
