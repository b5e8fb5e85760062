//! Coordinator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the downlink queue coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Cap on pending requests per endpoint.
    pub max_pending_per_endpoint: usize,
    /// How long shutdown waits for outstanding delivery tasks to drain.
    pub drain_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_pending_per_endpoint: 1000,
            drain_timeout_ms: 5000,
        }
    }
}

impl CoordinatorConfig {
    /// Drain timeout as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
