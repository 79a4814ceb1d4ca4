//! Registry configuration

use std::time::Duration;

/// Shortest reaper interval; `tokio::time::interval` rejects zero
pub const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// Stream registry configuration options
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a node may sit in `PendingDetach` before the reaper revokes
    /// its descriptor and frees it (`None` = never reap)
    pub pending_detach_timeout: Option<Duration>,

    /// How often the reaper task runs
    pub reap_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pending_detach_timeout: None,
            reap_interval: Duration::from_secs(5),
        }
    }
}

impl RegistryConfig {
    /// Reap nodes left in `PendingDetach` for longer than `timeout`
    pub fn pending_detach_timeout(mut self, timeout: Duration) -> Self {
        self.pending_detach_timeout = Some(timeout);
        self
    }

    /// Set the reaper interval (clamped to at least [`MIN_REAP_INTERVAL`])
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval.max(MIN_REAP_INTERVAL);
        self
    }
}
