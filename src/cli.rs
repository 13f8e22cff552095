use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "leaderd", version, about = "Join a leader election backed by Redis")]
pub struct Cli {
    /// Redis connection URL
    #[arg(long, env = "LEADER_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Election namespace shared by all participants
    #[arg(long, env = "LEADER_NAME")]
    pub name: String,

    /// Instance id (random if unset)
    #[arg(long, env = "LEADER_INSTANCE")]
    pub instance: Option<String>,

    /// Lease TTL in seconds
    #[arg(long, env = "LEADER_TTL_SECS", default_value_t = 15)]
    pub ttl_secs: u64,

    /// Seconds between ticks
    #[arg(long, env = "LEADER_INTERVAL_SECS", default_value_t = 10)]
    pub interval_secs: u64,

    /// Max random extra wait per tick, in milliseconds
    #[arg(long, env = "LEADER_JITTER_MS", default_value_t = 0)]
    pub jitter_ms: u64,

    /// Prefix for Redis keys
    #[arg(long, env = "LEADER_KEY_PREFIX", default_value = "")]
    pub key_prefix: String,
}

impl Cli {
    pub fn election_config(&self) -> leadership::ElectionConfig {
        let mut config = leadership::ElectionConfig::new(self.name.clone())
            .with_lease_ttl(Duration::from_secs(self.ttl_secs))
            .with_renew_interval(Duration::from_secs(self.interval_secs))
            .with_renew_jitter(Duration::from_millis(self.jitter_ms));
        if let Some(instance) = &self.instance {
            config = config.with_instance(instance.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["leaderd", "--name", "bongo"]);
        let config = cli.election_config();
        assert_eq!(config.name, "bongo");
        assert_eq!(config.lease_ttl, Duration::from_secs(15));
        assert_eq!(config.renew_interval, Duration::from_secs(10));
        assert!(config.instance.is_none());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "leaderd",
            "--name",
            "bongo",
            "--instance",
            "node-1",
            "--ttl-secs",
            "30",
            "--interval-secs",
            "5",
        ]);
        let config = cli.election_config();
        assert_eq!(config.instance.as_deref(), Some("node-1"));
        assert_eq!(config.lease_ttl, Duration::from_secs(30));
        assert_eq!(config.renew_interval, Duration::from_secs(5));
    }
}
