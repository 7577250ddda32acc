//! Runtime tuning for the tracker, verifier, and notifier.

use std::{env, fs, path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level tracker settings. Use these to tune how aggressively the
/// fallback verifier reconciles stalled entities and how much buffering
/// subscribers get before they are forced onto a fresh snapshot.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub verifier: VerifierConfig,
    pub notifier: NotifierConfig,
}

/// Fallback verifier tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Seconds between reconciliation cycles.
    pub cycle_interval_secs: u64,
    /// How long an entity may sit unchanged in an awaiting-confirmation
    /// state before the verifier checks on it.
    pub stall_threshold_secs: u64,
    /// Upper bound on a single external availability check. A stuck index
    /// call must not starve the rest of the cycle.
    pub check_timeout_secs: u64,
    /// Delay before re-checking after an index refresh was triggered.
    pub recheck_delay_secs: u64,
    /// Base for the exponential backoff applied across cycles.
    pub backoff_base_secs: u64,
    /// Backoff ceiling; retries never wait longer than this.
    pub backoff_cap_secs: u64,
    /// Verification attempts before an entity is surfaced as stuck and
    /// left for manual attention.
    pub max_retries: u32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 30,
            stall_threshold_secs: 3_600,
            check_timeout_secs: 30,
            recheck_delay_secs: 15,
            backoff_base_secs: 30,
            backoff_cap_secs: 1_800,
            max_retries: 5,
        }
    }
}

impl VerifierConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn stall_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stall_threshold_secs as i64)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn recheck_delay(&self) -> Duration {
        Duration::from_secs(self.recheck_delay_secs)
    }

    /// Backoff for the given attempt count, doubling per attempt up to the
    /// configured cap.
    pub fn backoff(&self, attempts: u32) -> chrono::Duration {
        let exp = attempts.min(16);
        let secs = self
            .backoff_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_secs);
        chrono::Duration::seconds(secs as i64)
    }
}

/// Change notifier tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Ring-buffer depth per subscriber. A subscriber that falls further
    /// behind than this loses the oldest deltas and is handed a fresh
    /// snapshot instead.
    pub queue_capacity: usize,
    /// Seconds between keep-alive heartbeats, independent of business
    /// events.
    pub heartbeat_interval_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            heartbeat_interval_secs: 15,
        }
    }
}

impl NotifierConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl TrackerConfig {
    /// Load configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `$FETCHARR_CONFIG_PATH` (JSON file),
    /// 2) `$FETCHARR_CONFIG_JSON` (inline JSON),
    /// 3) defaults if neither is set.
    pub fn load_from_env() -> anyhow::Result<Self> {
        if let Ok(path_str) = env::var("FETCHARR_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            return Self::load_from_file(Path::new(&path_str));
        }

        if let Ok(raw) = env::var("FETCHARR_CONFIG_JSON")
            && !raw.trim().is_empty()
        {
            return serde_json::from_str(&raw)
                .context("failed to parse FETCHARR_CONFIG_JSON");
        }

        Ok(Self::default())
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| {
            format!("failed to read config file {}", path.display())
        })?;
        serde_json::from_str(&raw).with_context(|| {
            format!("failed to parse config file {}", path.display())
        })
    }
}
