//! Shared configuration for the reconciliation engine.
//!
//! Settings resolve in three layers: compiled defaults, an optional TOML
//! settings file, then environment variable overrides. The defaults match
//! the operational baseline: an 8 hour anomaly-evaluation horizon on top
//! of a 48 hour cache retention per telemetry domain.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Engine configuration.
///
/// Horizons are in whole hours; the reconciliation window for a domain is
/// `eval_horizon_hours + <domain>_cache_hours` wide, ending at "now".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Shared anomaly-evaluation lookback, added to every domain's cache
    /// horizon when deriving the reconciliation window.
    pub eval_horizon_hours: i64,
    /// Cache retention for breaker/status events.
    pub breaker_cache_hours: i64,
    /// Cache retention for meter events.
    pub meter_cache_hours: i64,
    /// Cache retention for high-frequency electrical readings.
    pub hf_cache_hours: i64,
    /// Cache retention for outage tickets.
    pub tickets_cache_hours: i64,
    /// Page size for cursor-paginated sorted-set scans.
    pub scan_page_size: usize,
    /// Maximum number of domain passes running concurrently.
    pub domain_workers: usize,
    /// Hard deadline for a single domain pass, in seconds.
    pub domain_deadline_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            eval_horizon_hours: 8,
            breaker_cache_hours: 48,
            meter_cache_hours: 48,
            hf_cache_hours: 48,
            tickets_cache_hours: 48,
            scan_page_size: 1000,
            domain_workers: 4,
            domain_deadline_secs: 120,
        }
    }
}

impl SyncSettings {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env();
        settings
    }

    /// Load settings from a TOML file. Missing keys fall back to defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        Ok(settings)
    }

    /// Apply `GRIDWATCH_*` environment overrides on top of the current values.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_i64("GRIDWATCH_EVAL_HORIZON_HRS") {
            self.eval_horizon_hours = v;
        }
        if let Some(v) = env_i64("GRIDWATCH_BREAKER_CACHE_HRS") {
            self.breaker_cache_hours = v;
        }
        if let Some(v) = env_i64("GRIDWATCH_METER_CACHE_HRS") {
            self.meter_cache_hours = v;
        }
        if let Some(v) = env_i64("GRIDWATCH_HF_CACHE_HRS") {
            self.hf_cache_hours = v;
        }
        if let Some(v) = env_i64("GRIDWATCH_TICKETS_CACHE_HRS") {
            self.tickets_cache_hours = v;
        }
        if let Some(v) = env_usize("GRIDWATCH_SCAN_PAGE_SIZE") {
            self.scan_page_size = v;
        }
        if let Some(v) = env_usize("GRIDWATCH_DOMAIN_WORKERS") {
            self.domain_workers = v;
        }
        if let Ok(v) = env::var("GRIDWATCH_DOMAIN_DEADLINE_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                if secs > 0 {
                    self.domain_deadline_secs = secs;
                }
            }
        }
    }
}

fn env_i64(name: &str) -> Option<i64> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|&v| v > 0)
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_operational_baseline() {
        let s = SyncSettings::default();
        assert_eq!(s.eval_horizon_hours, 8);
        assert_eq!(s.breaker_cache_hours, 48);
        assert_eq!(s.scan_page_size, 1000);
    }

    #[test]
    fn toml_file_overrides_subset_of_keys() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "eval_horizon_hours = 4\nhf_cache_hours = 24").expect("write");

        let s = SyncSettings::from_toml_file(file.path()).expect("parse");
        assert_eq!(s.eval_horizon_hours, 4);
        assert_eq!(s.hf_cache_hours, 24);
        // Untouched keys keep their defaults.
        assert_eq!(s.breaker_cache_hours, 48);
        assert_eq!(s.domain_deadline_secs, 120);
    }
}
