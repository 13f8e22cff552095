// Lifecycle notifications fired by the election engine

use crate::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

type InstanceHook = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&str, &Error) + Send + Sync>;
type NewLeaderHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Optional observers for election outcomes.
///
/// Hooks run synchronously on the engine's tick and must return promptly.
/// The tick holds the engine's serialization lock while they run, so a hook
/// must not wait on [`LeaderElection::run_once`] or
/// [`LeaderElection::release`] of the same engine: that deadlocks. Spawn such
/// work instead. A panicking hook is caught and logged; it never changes what
/// the engine decided.
///
/// [`LeaderElection::run_once`]: crate::LeaderElection::run_once
/// [`LeaderElection::release`]: crate::LeaderElection::release
#[derive(Clone, Default)]
pub struct Hooks {
    on_elected: Option<InstanceHook>,
    on_renewing: Option<InstanceHook>,
    on_ousted: Option<InstanceHook>,
    on_error: Option<ErrorHook>,
    on_new_leader: Option<NewLeaderHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with this instance's id after it wins an absent or stale lease.
    pub fn on_elected(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_elected = Some(Arc::new(f));
        self
    }

    /// Called before an owned lease is renewed, whether or not the renew succeeds.
    pub fn on_renewing(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_renewing = Some(Arc::new(f));
        self
    }

    /// Called once when a lease this instance held is seen owned by another.
    pub fn on_ousted(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_ousted = Some(Arc::new(f));
        self
    }

    /// Called for every unexpected failure during a tick.
    pub fn on_error(mut self, f: impl Fn(&str, &Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called with `(instance, new_leader)` when another instance is seen
    /// holding a live lease and it differs from the previously observed owner.
    pub fn on_new_leader(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_new_leader = Some(Arc::new(f));
        self
    }

    pub(crate) fn elected(&self, instance: &str) {
        if let Some(hook) = &self.on_elected {
            guarded("elected", || hook(instance));
        }
    }

    pub(crate) fn renewing(&self, instance: &str) {
        if let Some(hook) = &self.on_renewing {
            guarded("renewing", || hook(instance));
        }
    }

    pub(crate) fn ousted(&self, instance: &str) {
        if let Some(hook) = &self.on_ousted {
            guarded("ousted", || hook(instance));
        }
    }

    pub(crate) fn error(&self, instance: &str, err: &Error) {
        if let Some(hook) = &self.on_error {
            guarded("error", || hook(instance, err));
        }
    }

    pub(crate) fn new_leader(&self, instance: &str, leader: &str) {
        if let Some(hook) = &self.on_new_leader {
            guarded("new_leader", || hook(instance, leader));
        }
    }
}

fn guarded(hook: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(hook, "Lifecycle hook panicked");
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_elected", &self.on_elected.is_some())
            .field("on_renewing", &self.on_renewing.is_some())
            .field("on_ousted", &self.on_ousted.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_new_leader", &self.on_new_leader.is_some())
            .finish()
    }
}
