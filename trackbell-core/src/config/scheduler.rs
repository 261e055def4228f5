//! Polling schedule configuration.

use std::time::Duration;

/// One policy for every tracked parcel; there is no per-carrier tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between two polls of the same parcel.
    pub interval: Duration,
    /// Upper bound on a single carrier fetch.
    pub fetch_timeout: Duration,
}

impl SchedulerConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            fetch_timeout: Self::DEFAULT_FETCH_TIMEOUT,
        }
    }
}
