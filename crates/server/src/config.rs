//! Process configuration, read from environment variables with defaults.

use std::time::Duration;

/// Runtime configuration for one waystone process.
#[derive(Clone, Debug)]
pub struct Config {
    /// This process's name on the network. Filters inbound teleport intents
    /// and scopes the presence keys this process is responsible for.
    pub server_name: String,
    /// Broker connection URL. `None` runs the process on the in-memory
    /// loopback (single-server deployments, tests).
    pub broker_url: Option<String>,
    /// Delay between a teleport request and its execution.
    pub warmup: Duration,
    /// Cadence of the movement check while a warmup is armed.
    pub check_interval: Duration,
    /// Distance in blocks from the armed start position that cancels a warmup.
    pub movement_threshold: f64,
    /// Permission that skips the warmup, consulted only when a player's game
    /// mode is unknown.
    pub bypass_permission: String,
    /// Worlds where every teleport is instant (holding cells and the like).
    pub instant_worlds: Vec<String>,
    /// Liveness lease TTL; a process whose lease lapses is presumed crashed
    /// and its presence entries are swept.
    pub lease_ttl: Duration,
    /// How often the lease is refreshed. Keep well under `lease_ttl`.
    pub heartbeat_interval: Duration,
    /// Ceiling on a single broker round trip before callers degrade to
    /// local-only behavior.
    pub broker_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "server-1".into(),
            broker_url: None,
            warmup: Duration::from_secs(3),
            check_interval: Duration::from_millis(500),
            movement_threshold: 0.5,
            bypass_permission: "waystone.warmup.bypass".into(),
            instant_worlds: Vec::new(),
            lease_ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            broker_timeout: Duration::from_secs(2),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_name: env_or("WAYSTONE_SERVER_NAME", defaults.server_name),
            broker_url: std::env::var("WAYSTONE_BROKER_URL").ok(),
            warmup: Duration::from_secs(env_parsed("WAYSTONE_WARMUP_SECS", 3)),
            check_interval: Duration::from_millis(env_parsed("WAYSTONE_CHECK_INTERVAL_MS", 500)),
            movement_threshold: env_parsed("WAYSTONE_MOVE_THRESHOLD", 0.5),
            bypass_permission: env_or("WAYSTONE_BYPASS_PERMISSION", defaults.bypass_permission),
            instant_worlds: env_list("WAYSTONE_INSTANT_WORLDS"),
            lease_ttl: Duration::from_secs(env_parsed("WAYSTONE_LEASE_TTL_SECS", 30)),
            heartbeat_interval: Duration::from_secs(env_parsed("WAYSTONE_HEARTBEAT_SECS", 10)),
            broker_timeout: Duration::from_secs(env_parsed("WAYSTONE_BROKER_TIMEOUT_SECS", 2)),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list; empty entries are dropped.
fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|value| {
            value
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
