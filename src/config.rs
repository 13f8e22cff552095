use crate::lease::DEFAULT_LEASE_TTL;
use crate::{Error, Result};
use std::time::Duration;

/// Default interval between ticks (10 seconds)
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for one election participant.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Shared name of the election; maps to the backend key
    pub name: String,
    /// Identity written into leases; a fresh UUID when unset
    pub instance: Option<String>,
    /// How long an obtained or renewed lease stays live
    pub lease_ttl: Duration,
    /// Wait between ticks. Must be shorter than `lease_ttl`.
    pub renew_interval: Duration,
    /// Upper bound of random extra wait added to each tick interval
    pub renew_jitter: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            instance: None,
            lease_ttl: DEFAULT_LEASE_TTL,
            renew_interval: DEFAULT_RENEW_INTERVAL,
            renew_jitter: Duration::ZERO,
        }
    }
}

impl ElectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn with_renew_jitter(mut self, jitter: Duration) -> Self {
        self.renew_jitter = jitter;
        self
    }

    /// Check the config and fill in a generated instance id if needed.
    pub fn validate(mut self) -> Result<Self> {
        if self.name.trim().is_empty() {
            return Err(Error::NamespaceMissing);
        }
        if self.instance.as_deref().map_or(true, str::is_empty) {
            self.instance = Some(uuid::Uuid::new_v4().to_string());
        }
        if self.lease_ttl.is_zero() {
            return Err(Error::InvalidConfig("lease_ttl must be non-zero".into()));
        }
        if self.renew_interval.is_zero() {
            return Err(Error::InvalidConfig("renew_interval must be non-zero".into()));
        }
        if self.renew_interval + self.renew_jitter >= self.lease_ttl {
            return Err(Error::InvalidConfig(format!(
                "renew_interval ({:?}) plus jitter ({:?}) must be shorter than lease_ttl ({:?})",
                self.renew_interval, self.renew_jitter, self.lease_ttl
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_just_name_set() {
        let cfg = ElectionConfig::new("bongo").validate().unwrap();
        assert_eq!(cfg.name, "bongo");
        assert_eq!(cfg.lease_ttl, Duration::from_secs(15));
        assert_eq!(cfg.renew_interval, Duration::from_secs(10));
        assert_eq!(cfg.renew_jitter, Duration::ZERO);
        assert!(!cfg.instance.unwrap().is_empty());
    }

    #[test]
    fn test_no_name_set() {
        let result = ElectionConfig::default().validate();
        assert!(matches!(result, Err(Error::NamespaceMissing)));

        let result = ElectionConfig::new("   ").validate();
        assert!(matches!(result, Err(Error::NamespaceMissing)));
    }

    #[test]
    fn test_generated_instances_are_unique() {
        let a = ElectionConfig::new("bongo").validate().unwrap();
        let b = ElectionConfig::new("bongo").with_instance("").validate().unwrap();
        assert_ne!(a.instance, b.instance);
    }

    #[test]
    fn test_explicit_instance_kept() {
        let cfg = ElectionConfig::new("bongo")
            .with_instance("1")
            .validate()
            .unwrap();
        assert_eq!(cfg.instance.as_deref(), Some("1"));
    }

    #[test]
    fn test_interval_must_be_shorter_than_ttl() {
        let result = ElectionConfig::new("bongo")
            .with_lease_ttl(Duration::from_secs(10))
            .with_renew_interval(Duration::from_secs(10))
            .validate();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let result = ElectionConfig::new("bongo")
            .with_renew_interval(Duration::from_secs(10))
            .with_renew_jitter(Duration::from_secs(5))
            .validate();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let result = ElectionConfig::new("bongo")
            .with_lease_ttl(Duration::ZERO)
            .validate();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let result = ElectionConfig::new("bongo")
            .with_renew_interval(Duration::ZERO)
            .validate();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
