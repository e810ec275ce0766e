use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::fs;

const DEFAULT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1_500;

/// Tunables for the dispatch core.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Per-attempt transport timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Additional attempts after the first one.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Sleep between attempts in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Rewrite EVAL into EVALSHA backed by the process-wide digest table.
    #[serde(default)]
    pub use_script_cache: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            use_script_cache: false,
        }
    }
}

impl DispatchConfig {
    /// Load configuration from a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let cfg: DispatchConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        cfg.ensure_valid()?;
        Ok(cfg)
    }

    /// Ensure configuration correctness.
    pub fn ensure_valid(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.retry_interval_ms == 0 {
            bail!("retry_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Budget for subscription establishment, distinct from the per-command
    /// timeout: one attempt plus every possible retry interval.
    pub fn subscription_timeout_ms(&self) -> u64 {
        self.timeout_ms + self.retry_interval_ms * u64::from(self.retry_attempts)
    }

    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_millis(self.subscription_timeout_ms())
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied_to_missing_fields() {
        let cfg: DispatchConfig = toml::from_str("use_script_cache = true").expect("parse");
        assert_eq!(cfg.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(cfg.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(cfg.retry_interval_ms, DEFAULT_RETRY_INTERVAL_MS);
        assert!(cfg.use_script_cache);
    }

    #[test]
    fn zero_retry_interval_is_rejected() {
        let cfg = DispatchConfig {
            retry_interval_ms: 0,
            ..DispatchConfig::default()
        };
        assert!(cfg.ensure_valid().is_err());
    }

    #[test]
    fn subscription_budget_spans_all_retries() {
        let cfg = DispatchConfig {
            timeout_ms: 1_000,
            retry_attempts: 3,
            retry_interval_ms: 500,
            use_script_cache: false,
        };
        assert_eq!(cfg.subscription_timeout_ms(), 2_500);
    }
}
