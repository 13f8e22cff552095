//! Single-leader election over a shared lease record.
//!
//! Instances never talk to each other. Each one periodically reads a lease
//! from a [`store::LockStore`], renews it if it owns it, contends for it if it
//! is absent or stale, and otherwise defers. Mutual exclusion is exactly as
//! strong as the store's atomic create-if-absent.
//!
//! ```no_run
//! use leadership::{ElectionConfig, Hooks, LeaderElection, store::RedisLockStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> leadership::Result<()> {
//! let store = RedisLockStore::connect("redis://127.0.0.1:6379").await?;
//! let election = LeaderElection::new(ElectionConfig::new("bongo"), Arc::new(store))?
//!     .with_hooks(Hooks::new().on_elected(|id| println!("{id} elected")));
//!
//! let cancel = CancellationToken::new();
//! election.run(cancel).await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod election;
pub mod error;
pub mod hooks;
pub mod lease;
pub mod store;
pub mod time;

pub mod test_utils;

pub use config::ElectionConfig;
pub use election::{LeaderElection, TickOutcome};
pub use error::{Error, Result};
pub use hooks::Hooks;
pub use lease::Lease;
