//! Screener configuration.
//!
//! All knobs in one serde struct, loadable from TOML. Defaults are the
//! shipped product limits; a config file may override any subset.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    /// Runs allowed per calendar day.
    pub max_daily_runs: usize,
    /// Largest manual candidate list accepted; longer lists are truncated.
    pub max_universe_size: usize,
    /// Successful scores required before a run consumes quota.
    pub min_success_to_charge: usize,
    /// Wall-clock budget for one run, in seconds.
    pub runtime_budget_seconds: u64,
    /// Total upstream attempts per call (including the first).
    pub fetch_retries: u32,
    /// Retry backoff base, in seconds.
    pub retry_base_wait_seconds: f64,
    /// Minimum successful results before auto-fill stops supplementing.
    pub auto_fill_target: usize,
    /// Size of the supplemental pool drawn during auto-fill.
    pub auto_fill_pool_size: usize,
    /// Bars required for a history to be usable.
    pub min_history_bars: usize,
    /// Bars kept per history (most recent).
    pub history_lookback_days: usize,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            max_daily_runs: 3,
            max_universe_size: 30,
            min_success_to_charge: 3,
            runtime_budget_seconds: 35,
            fetch_retries: 2,
            retry_base_wait_seconds: 0.8,
            auto_fill_target: 3,
            auto_fill_pool_size: 50,
            min_history_bars: 120,
            history_lookback_days: 260,
        }
    }
}

impl ScreenerConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("read config file: {e}"))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("parse config TOML: {e}"))
    }

    pub fn runtime_budget(&self) -> Duration {
        Duration::from_secs(self.runtime_budget_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch_retries,
            Duration::from_secs_f64(self.retry_base_wait_seconds),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_limits() {
        let cfg = ScreenerConfig::default();
        assert_eq!(cfg.max_daily_runs, 3);
        assert_eq!(cfg.max_universe_size, 30);
        assert_eq!(cfg.min_history_bars, 120);
        assert_eq!(cfg.history_lookback_days, 260);
        assert_eq!(cfg.retry_policy().attempts, 2);
    }

    #[test]
    fn toml_overrides_subset() {
        let cfg = ScreenerConfig::from_toml(
            "max_daily_runs = 10\nruntime_budget_seconds = 5\n",
        )
        .unwrap();
        assert_eq!(cfg.max_daily_runs, 10);
        assert_eq!(cfg.runtime_budget(), Duration::from_secs(5));
        assert_eq!(cfg.max_universe_size, 30);
    }
}
