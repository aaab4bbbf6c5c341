//! Reconciliation window derivation.
//!
//! Windows are expressed directly as epoch-second scores because the
//! cache's ordering key is an integer epoch second and the durable store
//! records the same value in its `score` column. Both bounds are
//! inclusive when filtering either store.

use crate::models::SyncSettings;
use crate::recon::domain::Domain;
use chrono::{DateTime, Utc};

const SECONDS_IN_HOUR: i64 = 3600;

/// The time bound a single domain pass reconciles over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconWindow {
    pub start_score: i64,
    pub end_score: i64,
}

impl ReconWindow {
    /// Derive the window for a domain: `[now - (eval + cache), now]`,
    /// truncated to whole seconds.
    pub fn for_domain(domain: Domain, now: DateTime<Utc>, settings: &SyncSettings) -> Self {
        let hours = settings.eval_horizon_hours + domain.cache_horizon_hours(settings);
        let end_score = now.timestamp();
        Self {
            start_score: end_score - hours * SECONDS_IN_HOUR,
            end_score,
        }
    }

    #[inline]
    pub fn contains(&self, score: i64) -> bool {
        score >= self.start_score && score <= self.end_score
    }

    /// Window width in seconds.
    #[inline]
    pub fn width_secs(&self) -> i64 {
        self.end_score - self.start_score
    }
}
