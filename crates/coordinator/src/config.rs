//! Coordinator configuration loaded from environment variables.

use std::time::Duration;

/// Coordination tunables with sensible defaults.
///
/// Reads from environment variables:
/// - `COMPENSATION_RETRIES` — default compensation retry budget, used when
///   a participant does not request one (default: `5`)
/// - `COMPENSATION_RETRY_DELAY_SECS` — fixed delay between compensation
///   retries, in seconds (default: `3`)
/// - `TIMEOUT_SCAN_INTERVAL_SECS` — how often the timeout scanner runs,
///   in seconds (default: `5`)
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub default_retry_budget: i32,
    pub retry_delay: Duration,
    pub timeout_scan_interval: Duration,
}

impl CoordinatorConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            default_retry_budget: std::env::var("COMPENSATION_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            retry_delay: Duration::from_secs(
                std::env::var("COMPENSATION_RETRY_DELAY_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3),
            ),
            timeout_scan_interval: Duration::from_secs(
                std::env::var("TIMEOUT_SCAN_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_retry_budget: 5,
            retry_delay: Duration::from_secs(3),
            timeout_scan_interval: Duration::from_secs(5),
        }
    }
}
