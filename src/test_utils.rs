// Test doubles for driving the election engine through races and failures

use crate::{
    hooks::Hooks,
    lease::Lease,
    store::{LockStore, MemoryLockStore},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A hook invocation as seen by [`EventLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Elected,
    Renewing,
    Ousted,
    Error(String),
    NewLeader(String),
}

/// Records every hook invocation in order.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks that append to this log.
    pub fn hooks(&self) -> Hooks {
        let elected = self.events.clone();
        let renewing = self.events.clone();
        let ousted = self.events.clone();
        let error = self.events.clone();
        let new_leader = self.events.clone();

        Hooks::new()
            .on_elected(move |_| elected.lock().push(Event::Elected))
            .on_renewing(move |_| renewing.lock().push(Event::Renewing))
            .on_ousted(move |_| ousted.lock().push(Event::Ousted))
            .on_error(move |_, err| error.lock().push(Event::Error(err.to_string())))
            .on_new_leader(move |_, leader| {
                new_leader.lock().push(Event::NewLeader(leader.to_string()))
            })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Store operations that can be intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Obtain,
    Renew,
    Release,
    Clear,
}

/// Wraps a store and fails chosen operations with `BackendUnavailable`.
#[derive(Debug, Clone)]
pub struct FaultyLockStore<S> {
    inner: S,
    pending: Arc<Mutex<HashMap<Op, usize>>>,
}

impl<S: LockStore> FaultyLockStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fail the next call of `op`.
    pub fn fail_next(&self, op: Op) {
        self.fail_times(op, 1);
    }

    pub fn fail_times(&self, op: Op, times: usize) {
        *self.pending.lock().entry(op).or_insert(0) += times;
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self, op: Op) -> Result<()> {
        let mut pending = self.pending.lock();
        match pending.get_mut(&op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(Error::BackendUnavailable(format!("injected {op:?} failure")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<S: LockStore> LockStore for FaultyLockStore<S> {
    async fn get_lease(&self, name: &str) -> Result<Lease> {
        self.check(Op::Get)?;
        self.inner.get_lease(name).await
    }

    async fn obtain_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease> {
        self.check(Op::Obtain)?;
        self.inner.obtain_lease(name, instance, ttl).await
    }

    async fn renew_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease> {
        self.check(Op::Renew)?;
        self.inner.renew_lease(name, instance, ttl).await
    }

    async fn release_lease(&self, name: &str, instance: &str) -> Result<()> {
        self.check(Op::Release)?;
        self.inner.release_lease(name, instance).await
    }

    async fn clear_lease(&self, name: &str) -> Result<()> {
        self.check(Op::Clear)?;
        self.inner.clear_lease(name).await
    }

    async fn clear_stale_lease(&self, name: &str, observed: &Lease) -> Result<()> {
        self.check(Op::Clear)?;
        self.inner.clear_stale_lease(name, observed).await
    }
}

/// Memory store that lets another instance's write land just before a
/// chosen operation, simulating a lost race between read and write.
#[derive(Debug, Clone)]
pub struct RacingLockStore {
    inner: MemoryLockStore,
    races: Arc<Mutex<HashMap<Op, Lease>>>,
}

impl RacingLockStore {
    pub fn new(inner: MemoryLockStore) -> Self {
        Self {
            inner,
            races: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Before the next `op`, overwrite the record with `lease`.
    pub fn race_before(&self, op: Op, lease: Lease) {
        self.races.lock().insert(op, lease);
    }

    pub fn inner(&self) -> &MemoryLockStore {
        &self.inner
    }

    fn interleave(&self, name: &str, op: Op) -> Result<()> {
        let lease = self.races.lock().remove(&op);
        match lease {
            Some(lease) => self.inner.insert_record(name, &lease),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LockStore for RacingLockStore {
    async fn get_lease(&self, name: &str) -> Result<Lease> {
        self.interleave(name, Op::Get)?;
        self.inner.get_lease(name).await
    }

    async fn obtain_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease> {
        self.interleave(name, Op::Obtain)?;
        self.inner.obtain_lease(name, instance, ttl).await
    }

    async fn renew_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease> {
        self.interleave(name, Op::Renew)?;
        self.inner.renew_lease(name, instance, ttl).await
    }

    async fn release_lease(&self, name: &str, instance: &str) -> Result<()> {
        self.interleave(name, Op::Release)?;
        self.inner.release_lease(name, instance).await
    }

    async fn clear_lease(&self, name: &str) -> Result<()> {
        self.interleave(name, Op::Clear)?;
        self.inner.clear_lease(name).await
    }

    async fn clear_stale_lease(&self, name: &str, observed: &Lease) -> Result<()> {
        self.interleave(name, Op::Clear)?;
        self.inner.clear_stale_lease(name, observed).await
    }
}

/// Wraps a store and parks chosen operations forever, so a caller can be
/// cancelled while the call is in flight.
#[derive(Debug, Clone)]
pub struct StallingLockStore<S> {
    inner: S,
    stalls: Arc<Mutex<HashSet<Op>>>,
    calls: Arc<Mutex<HashMap<Op, usize>>>,
    entered: Arc<Notify>,
}

impl<S: LockStore> StallingLockStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            stalls: Arc::new(Mutex::new(HashSet::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            entered: Arc::new(Notify::new()),
        }
    }

    /// Park the next call of `op`.
    pub fn stall_next(&self, op: Op) {
        self.stalls.lock().insert(op);
    }

    /// Resolves once a parked call has been entered.
    pub async fn stalled(&self) {
        self.entered.notified().await;
    }

    /// How many times `op` was called, parked or not.
    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn gate(&self, op: Op) {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        let stall = self.stalls.lock().remove(&op);
        if stall {
            self.entered.notify_one();
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl<S: LockStore> LockStore for StallingLockStore<S> {
    async fn get_lease(&self, name: &str) -> Result<Lease> {
        self.gate(Op::Get).await;
        self.inner.get_lease(name).await
    }

    async fn obtain_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease> {
        self.gate(Op::Obtain).await;
        self.inner.obtain_lease(name, instance, ttl).await
    }

    async fn renew_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease> {
        self.gate(Op::Renew).await;
        self.inner.renew_lease(name, instance, ttl).await
    }

    async fn release_lease(&self, name: &str, instance: &str) -> Result<()> {
        self.gate(Op::Release).await;
        self.inner.release_lease(name, instance).await
    }

    async fn clear_lease(&self, name: &str) -> Result<()> {
        self.gate(Op::Clear).await;
        self.inner.clear_lease(name).await
    }

    async fn clear_stale_lease(&self, name: &str, observed: &Lease) -> Result<()> {
        self.gate(Op::Clear).await;
        self.inner.clear_stale_lease(name, observed).await
    }
}
