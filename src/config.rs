//! Configuration for the reconnecting stream and the store facade.

use crate::error::{LiveError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the store URL.
pub const STORE_URL_ENV: &str = "LIVEDATA_STORE_URL";

/// Reconnect tuning for a logical stream.
///
/// All durations are milliseconds so the struct maps directly onto JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// How long a physical attempt may take before the transport gives up.
    /// Default: 10s
    pub connect_timeout_ms: u64,

    /// Extra time before the guard timer forces the attempt to fail, so it
    /// does not race the transport's own timeout.
    /// Default: 1s
    pub connect_timeout_slop_ms: u64,

    /// Delay before the first retry.
    /// Default: 3s
    pub retry_base_ms: u64,

    /// Growth factor applied per failed retry.
    /// Default: 2.2
    pub retry_exponent: f64,

    /// Upper bound on the unfuzzed retry delay.
    /// Default: 30min
    pub retry_max_ms: u64,

    /// Width of the multiplicative jitter band (0.5 = ±25%).
    /// Default: 0.5
    pub retry_fuzz: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            connect_timeout_slop_ms: 1_000,
            retry_base_ms: 3_000,
            retry_exponent: 2.2,
            retry_max_ms: 1_800_000,
            retry_fuzz: 0.5,
        }
    }
}

impl ReconnectConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LiveError::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the backoff arithmetic meaningless.
    pub fn validate(&self) -> Result<()> {
        if !(self.retry_exponent.is_finite() && self.retry_exponent >= 1.0) {
            return Err(LiveError::Deserialization(format!(
                "retry_exponent must be >= 1, got {}",
                self.retry_exponent
            )));
        }
        if !(self.retry_fuzz.is_finite() && (0.0..2.0).contains(&self.retry_fuzz)) {
            return Err(LiveError::Deserialization(format!(
                "retry_fuzz must be in [0, 2), got {}",
                self.retry_fuzz
            )));
        }
        Ok(())
    }

    /// Guard timer armed for each physical attempt.
    pub fn guard_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms + self.connect_timeout_slop_ms)
    }
}

/// Where the store facade connects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
}

impl StoreConfig {
    /// Read the store URL from `LIVEDATA_STORE_URL`. The facade refuses to
    /// start without one.
    pub fn from_env() -> Result<Self> {
        match std::env::var(STORE_URL_ENV) {
            Ok(url) if !url.is_empty() => Ok(Self { url }),
            _ => Err(LiveError::StoreUnavailable(format!(
                "{} must be set in environment",
                STORE_URL_ENV
            ))),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "memory://default".to_string(),
        }
    }
}

/// Aggregate configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub reconnect: ReconnectConfig,
    pub store: StoreConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = ReconnectConfig::default();
        assert_eq!(config.guard_timeout(), Duration::from_millis(11_000));
        assert_eq!(config.retry_base_ms, 3_000);
        assert_eq!(config.retry_max_ms, 1_800_000);
        assert!((config.retry_exponent - 2.2).abs() < f64::EPSILON);
        assert!((config.retry_fuzz - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ReconnectConfig::from_json(r#"{"retry_base_ms": 500}"#).unwrap();
        assert_eq!(config.retry_base_ms, 500);
        assert_eq!(config.connect_timeout_ms, 10_000);
    }

    #[test]
    fn test_rejects_shrinking_exponent() {
        let result = ReconnectConfig::from_json(r#"{"retry_exponent": 0.5}"#);
        assert!(matches!(result, Err(LiveError::Deserialization(_))));
    }

    #[test]
    fn test_aggregate_from_json() {
        let config: LiveConfig =
            serde_json::from_str(r#"{"store": {"url": "memory://x"}}"#).unwrap();
        assert_eq!(config.store.url, "memory://x");
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }
}
