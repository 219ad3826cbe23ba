use agito_shared::constants::{COMMAND_CHANNEL_CAPACITY, DEFAULT_INIT_LIMIT, DEFAULT_RELAYS};

use crate::backoff::ReconnectPolicy;

/// Configuration for one aggregator instance.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Relay endpoint URLs (`ws://` or `wss://`).
    pub relays: Vec<String>,
    /// Result count of the standing metadata query sent to each relay on connect.
    pub init_limit: usize,
    /// What to do when a relay connection is lost or refused.
    pub reconnect: ReconnectPolicy,
    /// Discard metadata events whose id or signature does not check out.
    pub verify_signatures: bool,
    /// Capacity of the aggregator command channel.
    pub command_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            init_limit: DEFAULT_INIT_LIMIT,
            reconnect: ReconnectPolicy::default(),
            verify_signatures: false,
            command_capacity: COMMAND_CHANNEL_CAPACITY,
        }
    }
}
