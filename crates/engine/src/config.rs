use std::time::Duration;

use crate::error::EngineError;

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the deadline sweeper runs.
    pub sweep_interval: Duration,
    /// How often the digest dispatcher flushes due notifications.
    pub digest_interval: Duration,
    /// Absolute site URL used in message links. Links are relative when unset.
    pub base_url: Option<String>,
    /// Prefix for message subjects.
    pub site_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            digest_interval: Duration::from_secs(DEFAULT_DIGEST_INTERVAL_SECS),
            base_url: None,
            site_name: DEFAULT_SITE_NAME.to_string(),
        }
    }
}

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 900;
const DEFAULT_DIGEST_INTERVAL_SECS: u64 = 3600;
const DEFAULT_SITE_NAME: &str = "Forms";

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default |
    /// |-----------------------|---------|
    /// | `SWEEP_INTERVAL_SECS` | `900`   |
    /// | `DIGEST_INTERVAL_SECS`| `3600`  |
    /// | `FORMFLOW_BASE_URL`   | unset   |
    /// | `SITE_NAME`           | `Forms` |
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let secs = |key: &str, default: u64| -> Result<Duration, EngineError> {
            let value = match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| {
                        EngineError::Config(format!("{key} must be a positive integer, got '{raw}'"))
                    })?,
                None => default,
            };
            Ok(Duration::from_secs(value))
        };

        Ok(Self {
            sweep_interval: secs("SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?,
            digest_interval: secs("DIGEST_INTERVAL_SECS", DEFAULT_DIGEST_INTERVAL_SECS)?,
            base_url: lookup("FORMFLOW_BASE_URL").filter(|u| !u.trim().is_empty()),
            site_name: lookup("SITE_NAME").unwrap_or_else(|| DEFAULT_SITE_NAME.to_string()),
        })
    }
}
