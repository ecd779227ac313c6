//! Cache configuration.
//!
//! Controls how long cached consent and catalog data is trusted before a read
//! triggers an inline refresh.

use std::time::{Duration, Instant};

const DEFAULT_STALENESS_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Age after which a cache reports `needs_update()`.
    pub staleness_threshold_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: DEFAULT_STALENESS_SECS,
        }
    }
}

impl From<&crate::config::SyncSettings> for CacheConfig {
    fn from(settings: &crate::config::SyncSettings) -> Self {
        Self {
            staleness_threshold_secs: settings.staleness.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }
}

/// Staleness rule shared by the consent and catalog caches: stale when never
/// filled, or when the last fill is older than the threshold.
pub(crate) fn is_stale(last_update: Option<Instant>, now: Instant, threshold: Duration) -> bool {
    match last_update {
        None => true,
        Some(at) => now.saturating_duration_since(at) > threshold,
    }
}
