//! Reconnection policy for relay endpoints.

use std::time::Duration;

use agito_shared::constants::{RECONNECT_BASE_SECS, RECONNECT_MAX_SECS};

/// What to do after an endpoint's connection is lost or refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Drop the endpoint permanently.
    Never,
    /// Retry after `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl ReconnectPolicy {
    pub fn exponential(base_secs: u64, max_secs: u64) -> Self {
        ReconnectPolicy::Exponential {
            base: Duration::from_secs(base_secs),
            max: Duration::from_secs(max_secs.max(base_secs)),
        }
    }

    /// Delay before reconnection attempt number `attempt` (1-based), or
    /// `None` when the endpoint must not be retried.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::Exponential { base, max } => {
                let exp = attempt.saturating_sub(1).min(31);
                let delay = base.saturating_mul(1u32 << exp);
                Some(delay.min(max))
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::exponential(RECONNECT_BASE_SECS, RECONNECT_MAX_SECS)
    }
}
