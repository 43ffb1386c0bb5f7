//! Retry delay computation.

use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Unfuzzed delay in milliseconds: `min(max, base * exponent^retry_count)`.
pub fn base_delay_ms(config: &ReconnectConfig, retry_count: u32) -> f64 {
    let grown = config.retry_base_ms as f64 * config.retry_exponent.powf(retry_count as f64);
    grown.min(config.retry_max_ms as f64)
}

/// Multiplicative jitter band `[1 - fuzz/2, 1 + fuzz/2]`.
pub fn jitter_band(config: &ReconnectConfig) -> (f64, f64) {
    (1.0 - config.retry_fuzz / 2.0, 1.0 + config.retry_fuzz / 2.0)
}

/// Delay before the next retry, jittered to avoid reconnect storms.
pub fn retry_delay<R: Rng + ?Sized>(
    config: &ReconnectConfig,
    retry_count: u32,
    rng: &mut R,
) -> Duration {
    let (low, _) = jitter_band(config);
    let factor = rng.gen::<f64>() * config.retry_fuzz + low;
    let millis = base_delay_ms(config, retry_count) * factor;
    Duration::from_millis(millis.round() as u64)
}
