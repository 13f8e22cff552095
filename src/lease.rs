// Lease record shared through the backing store

use crate::time::{to_chrono, Timestamp};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lease TTL (15 seconds)
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15);

/// Ownership record for one election namespace.
///
/// Serialized as `{"owner": "...", "expiresAt": "<RFC 3339>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Instance currently holding, or last having held, the lease
    pub owner: String,

    /// Absolute instant after which the lease confers nothing
    pub expires_at: Timestamp,
}

impl Lease {
    /// Create a lease for `owner` expiring `ttl` after `now`
    pub fn new(owner: impl Into<String>, now: Timestamp, ttl: Duration) -> Self {
        let expires_at = now
            .checked_add_signed(to_chrono(ttl))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);

        Self {
            owner: owner.into(),
            expires_at,
        }
    }

    /// Live iff the expiry is strictly after `now`
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at > now
    }

    pub fn is_stale(&self, now: Timestamp) -> bool {
        !self.is_live(now)
    }

    pub fn is_owned_by(&self, instance: &str) -> bool {
        self.owner == instance
    }

    /// Time remaining until expiration
    pub fn time_remaining(&self, now: Timestamp) -> Option<Duration> {
        self.expires_at.signed_duration_since(now).to_std().ok()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}
