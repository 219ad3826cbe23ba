//! Node configuration loaded from environment variables.
//!
//! Every setting has a default, so `agito-node` starts against the public
//! relay set with zero configuration.

use std::time::Duration;

use agito_relay::{AggregatorConfig, ReconnectPolicy};
use agito_shared::constants::{RECONNECT_BASE_SECS, RECONNECT_MAX_SECS};
use agito_shared::{resolve_identity_key, IdentityKey};

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Settings handed to the aggregator.
    /// Env: `RELAYS` (comma-separated), `INIT_LIMIT`, `RECONNECT`,
    /// `RECONNECT_BASE_SECS`, `RECONNECT_MAX_SECS`, `VERIFY_SIGNATURES`
    pub aggregator: AggregatorConfig,

    /// Identity keys whose profiles are fetched on startup.
    /// Env: `WATCH_KEYS` (comma-separated, hex or `npub`/`nsec` form)
    /// Default: none.
    pub watch_keys: Vec<IdentityKey>,

    /// How often the endpoint summary is logged.
    /// Env: `STATUS_INTERVAL_SECS`
    /// Default: `60`
    pub status_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            aggregator: AggregatorConfig::default(),
            watch_keys: Vec::new(),
            status_interval: Duration::from_secs(60),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(list) = var("RELAYS") {
            let relays: Vec<String> = split_list(&list).map(str::to_string).collect();
            if relays.is_empty() {
                tracing::warn!("RELAYS is empty, using the default relay set");
            } else {
                config.aggregator.relays = relays;
            }
        }

        if let Some(val) = var("INIT_LIMIT") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.aggregator.init_limit = n,
                _ => tracing::warn!(value = %val, "Invalid INIT_LIMIT, using default"),
            }
        }

        // -- Reconnection --

        let mut base = RECONNECT_BASE_SECS;
        let mut max = RECONNECT_MAX_SECS;

        if let Some(val) = var("RECONNECT_BASE_SECS") {
            match val.trim().parse::<u64>() {
                Ok(n) if n > 0 => base = n,
                _ => tracing::warn!(value = %val, "Invalid RECONNECT_BASE_SECS, using default"),
            }
        }

        if let Some(val) = var("RECONNECT_MAX_SECS") {
            match val.trim().parse::<u64>() {
                Ok(n) if n > 0 => max = n,
                _ => tracing::warn!(value = %val, "Invalid RECONNECT_MAX_SECS, using default"),
            }
        }

        let reconnect = var("RECONNECT").map_or(true, |val| is_enabled(&val));
        config.aggregator.reconnect = if reconnect {
            ReconnectPolicy::exponential(base, max)
        } else {
            ReconnectPolicy::Never
        };

        if let Some(val) = var("VERIFY_SIGNATURES") {
            config.aggregator.verify_signatures = is_enabled(&val);
        }

        // -- Node behaviour --

        if let Some(list) = var("WATCH_KEYS") {
            for entry in split_list(&list) {
                match resolve_identity_key(entry) {
                    Ok(key) => config.watch_keys.push(key),
                    Err(e) => tracing::warn!(value = %entry, error = %e, "Skipping invalid WATCH_KEYS entry"),
                }
            }
        }

        if let Some(val) = var("STATUS_INTERVAL_SECS") {
            match val.trim().parse::<u64>() {
                Ok(n) if n > 0 => config.status_interval = Duration::from_secs(n),
                _ => tracing::warn!(value = %val, "Invalid STATUS_INTERVAL_SECS, using default"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn is_enabled(val: &str) -> bool {
    let val = val.trim();
    val != "false" && val != "0"
}
