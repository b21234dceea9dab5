//! Reconnect delay schedule.

use crate::config::ReconnectConfig;

use std::time::Duration;

/// Delay before reconnect attempt `attempt` (zero-based): `base * 2^attempt`, capped.
pub fn reconnect_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_ms = 2u64
        .checked_pow(attempt)
        .map(|factor| config.base_delay_ms.saturating_mul(factor))
        .unwrap_or(u64::MAX)
        .min(config.max_delay_ms);
    Duration::from_millis(delay_ms)
}
