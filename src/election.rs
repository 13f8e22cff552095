// Election engine: one tick reads the shared lease and decides whether to
// renew, contend or defer.

use crate::{
    config::ElectionConfig,
    hooks::Hooks,
    lease::Lease,
    store::LockStore,
    time::{Clock, SystemClock},
    Error, Result,
};
use parking_lot::Mutex;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a single tick decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Won an absent or stale lease
    Elected,
    /// Extended our own lease
    Renewed,
    /// A live lease is held by `leader`
    Deferred { leader: String },
    /// Another instance won the create-if-absent race
    LostRace,
    /// Our lease changed hands or vanished between read and renew
    LostLease,
    /// Unexpected store failure; leadership flag left as it was
    Failed,
    /// A store call was abandoned on cancellation
    Cancelled,
}

/// What the tick learned about the lease, for cross-tick comparison.
#[derive(Debug)]
enum Observation {
    Lease(Lease),
    /// Lost the create race; the winner may or may not be known
    HeldBy(Option<String>),
    /// Our lease was gone or taken at renewal; ousting is judged next tick
    Lost(Option<String>),
    /// Nothing definite
    Nothing,
}

#[derive(Debug, Default)]
struct LastObserved {
    /// Owner as of the last definite observation; drives ousting detection
    owner: Option<String>,
    lease: Option<Lease>,
    /// Holder learned without reading its record
    holder: Option<String>,
}

/// Single-leader election participant.
///
/// Ticks are serialized internally, but the engine is meant to be driven by
/// one loop per instance: either [`LeaderElection::run`] or manual calls to
/// [`LeaderElection::run_once`].
#[derive(Debug)]
pub struct LeaderElection {
    name: String,
    instance: String,
    lease_ttl: Duration,
    renew_interval: Duration,
    renew_jitter: Duration,
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    hooks: Hooks,
    is_leader: AtomicBool,
    last_observed: Mutex<LastObserved>,
    tick_guard: tokio::sync::Mutex<()>,
}

impl LeaderElection {
    /// Validates `config` and binds the engine to `store`.
    pub fn new(config: ElectionConfig, store: Arc<dyn LockStore>) -> Result<Self> {
        let config = config.validate()?;
        let instance = config
            .instance
            .ok_or_else(|| Error::InvalidConfig("instance id was not resolved".into()))?;

        Ok(Self {
            name: config.name,
            instance,
            lease_ttl: config.lease_ttl,
            renew_interval: config.renew_interval,
            renew_jitter: config.renew_jitter,
            store,
            clock: Arc::new(SystemClock),
            hooks: Hooks::default(),
            is_leader: AtomicBool::new(false),
            last_observed: Mutex::new(LastObserved::default()),
            tick_guard: tokio::sync::Mutex::new(()),
        })
    }

    /// Time source used for liveness checks. Should match the store's.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance
    }

    pub fn namespace(&self) -> &str {
        &self.name
    }

    /// Decision of the most recent completed tick. Never touches the store.
    ///
    /// Also false once our own cached lease has expired by the local clock,
    /// even if no tick has run since.
    pub fn is_leader(&self) -> bool {
        if !self.is_leader.load(Ordering::SeqCst) {
            return false;
        }
        let now = self.clock.now();
        self.last_observed
            .lock()
            .lease
            .as_ref()
            .is_some_and(|lease| lease.is_owned_by(&self.instance) && lease.is_live(now))
    }

    /// Owner of the last observed lease, if that lease is still live.
    ///
    /// When the last tick learned who holds the lease without reading the
    /// record (a lost create race or a lost renewal), that holder is reported
    /// until the next tick.
    pub fn current_leader(&self) -> Option<String> {
        let now = self.clock.now();
        let last = self.last_observed.lock();
        match &last.lease {
            Some(lease) => lease.is_live(now).then(|| lease.owner.clone()),
            None => last.holder.clone(),
        }
    }

    /// Most recent lease read or written by this engine.
    pub fn observed_lease(&self) -> Option<Lease> {
        self.last_observed.lock().lease.clone()
    }

    /// Run exactly one tick.
    pub async fn run_once(&self) -> TickOutcome {
        self.tick(&CancellationToken::new()).await
    }

    /// Tick every `renew_interval` until `cancel` fires, then release the
    /// lease (best effort, not retried).
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            namespace = %self.name,
            instance = %self.instance,
            interval_ms = u64::try_from(self.renew_interval.as_millis()).unwrap_or(u64::MAX),
            "Joining election"
        );

        while !cancel.is_cancelled() {
            self.tick(&cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.next_wait()) => {}
            }
        }

        if let Err(e) = self.release().await {
            warn!(
                namespace = %self.name,
                instance = %self.instance,
                error = %e,
                "Failed to release lease on shutdown"
            );
        }
    }

    /// Give up the lease if we own it and drop to non-leader.
    pub async fn release(&self) -> Result<()> {
        let _serial = self.tick_guard.lock().await;
        self.is_leader.store(false, Ordering::SeqCst);
        *self.last_observed.lock() = LastObserved::default();

        match self.store.release_lease(&self.name, &self.instance).await {
            Ok(()) => {
                info!(namespace = %self.name, instance = %self.instance, "Released lease");
                Ok(())
            }
            Err(e) => {
                self.hooks.error(&self.instance, &e);
                Err(e)
            }
        }
    }

    fn next_wait(&self) -> Duration {
        let jitter_ms = u64::try_from(self.renew_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.renew_interval;
        }
        self.renew_interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    #[tracing::instrument(skip_all, fields(namespace = %self.name, instance = %self.instance))]
    async fn tick(&self, cancel: &CancellationToken) -> TickOutcome {
        let _serial = self.tick_guard.lock().await;

        let (outcome, observation) = match call(cancel, self.store.get_lease(&self.name)).await {
            Err(Error::NoLeaseFound) => {
                debug!("No lease exists, contending");
                self.contend(cancel).await
            }
            Ok(lease) if lease.is_owned_by(&self.instance) => self.renew(cancel).await,
            Ok(lease) if lease.is_live(self.clock.now()) => {
                debug!(leader = %lease.owner, "Lease held by another instance");
                self.is_leader.store(false, Ordering::SeqCst);
                (
                    TickOutcome::Deferred {
                        leader: lease.owner.clone(),
                    },
                    Observation::Lease(lease),
                )
            }
            Ok(stale) => {
                debug!(owner = %stale.owner, expires_at = %stale.expires_at, "Clearing stale lease");
                match call(cancel, self.store.clear_stale_lease(&self.name, &stale)).await {
                    Ok(()) => self.contend(cancel).await,
                    Err(e) => self.fail(e),
                }
            }
            Err(e) => self.fail(e),
        };

        self.observe(observation);
        if outcome == TickOutcome::Elected {
            self.hooks.elected(&self.instance);
        }
        outcome
    }

    async fn contend(&self, cancel: &CancellationToken) -> (TickOutcome, Observation) {
        let obtained = call(
            cancel,
            self.store.obtain_lease(&self.name, &self.instance, self.lease_ttl),
        )
        .await;

        match obtained {
            Ok(lease) => {
                self.is_leader.store(true, Ordering::SeqCst);
                info!(expires_at = %lease.expires_at, "Elected leader");
                (TickOutcome::Elected, Observation::Lease(lease))
            }
            Err(Error::LeaseHeldByOther { holder }) => {
                self.is_leader.store(false, Ordering::SeqCst);
                debug!(?holder, "Lost lease race");
                (TickOutcome::LostRace, Observation::HeldBy(holder))
            }
            Err(e) => self.fail(e),
        }
    }

    async fn renew(&self, cancel: &CancellationToken) -> (TickOutcome, Observation) {
        self.hooks.renewing(&self.instance);

        let renewed = call(
            cancel,
            self.store.renew_lease(&self.name, &self.instance, self.lease_ttl),
        )
        .await;

        match renewed {
            Ok(lease) => {
                self.is_leader.store(true, Ordering::SeqCst);
                debug!(expires_at = %lease.expires_at, "Renewed lease");
                (TickOutcome::Renewed, Observation::Lease(lease))
            }
            Err(e @ (Error::NotLeaseOwner { .. } | Error::NoLeaseFound)) => {
                // Ousting itself is detected on the next read.
                self.is_leader.store(false, Ordering::SeqCst);
                warn!(error = %e, "Lease lost before renewal");
                self.hooks.error(&self.instance, &e);
                let holder = match e {
                    Error::NotLeaseOwner { owner } => Some(owner),
                    _ => None,
                };
                (TickOutcome::LostLease, Observation::Lost(holder))
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&self, err: Error) -> (TickOutcome, Observation) {
        if matches!(err, Error::Cancelled) {
            debug!("Tick cancelled");
            return (TickOutcome::Cancelled, Observation::Nothing);
        }
        warn!(error = %err, "Election tick failed");
        self.hooks.error(&self.instance, &err);
        (TickOutcome::Failed, Observation::Nothing)
    }

    /// Compare against the previous tick and record what was seen.
    fn observe(&self, observation: Observation) {
        let (owner, lease, holder) = match observation {
            Observation::Nothing => return,
            Observation::Lost(holder) => {
                let mut last = self.last_observed.lock();
                last.lease = None;
                last.holder = holder;
                return;
            }
            Observation::Lease(lease) => (Some(lease.owner.clone()), Some(lease), None),
            Observation::HeldBy(holder) => (holder.clone(), None, holder),
        };

        let me = self.instance.as_str();
        let previous_owner = {
            let mut last = self.last_observed.lock();
            let previous = last.owner.take();
            *last = LastObserved {
                owner: owner.clone(),
                lease,
                holder,
            };
            previous
        };

        let held_before = previous_owner.as_deref() == Some(me);
        let held_now = owner.as_deref() == Some(me);

        if held_before && !held_now {
            info!(new_owner = ?owner, "Ousted from leadership");
            self.hooks.ousted(me);
        }

        if let Some(new_leader) = owner.as_deref() {
            if !held_now && previous_owner.as_deref() != Some(new_leader) {
                info!(leader = %new_leader, "New leader observed");
                self.hooks.new_leader(me, new_leader);
            }
        }
    }
}

/// Race a store call against cancellation.
async fn call<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}
