//! Monitor configuration
//!
//! Polling cadence, staleness, transport timeouts and the reference alert
//! policy. Persisted as the `monitor` section of the settings document.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::services::quota::QuotaStatus;

// ============================================================================
// Constants
// ============================================================================

/// Minimum polling interval in seconds
pub const MIN_INTERVAL_SECS: u64 = 30;

/// Default polling interval in seconds
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Default snapshot staleness threshold in seconds
pub const DEFAULT_STALE_AFTER_SECS: u64 = 300;

/// Default timeout for a single CLI execution
pub const DEFAULT_CLI_TIMEOUT_SECS: u64 = 20;

/// Default timeout for a single HTTP round-trip
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Lower bound applied to both transport timeouts
const MIN_TIMEOUT_SECS: u64 = 1;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the quota monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Polling interval in seconds (minimum 30)
    pub interval_secs: u64,
    /// Age after which a snapshot is shown as stale
    pub stale_after_secs: u64,
    /// Timeout for one CLI probe execution
    pub cli_timeout_secs: u64,
    /// Timeout for one HTTP round-trip
    pub http_timeout_secs: u64,
    /// Lowest status that produces an alert
    pub alert_floor: QuotaStatus,
    /// Only alert when a status gets worse
    pub degrade_only: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            cli_timeout_secs: DEFAULT_CLI_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            alert_floor: QuotaStatus::Warning,
            degrade_only: true,
        }
    }
}

impl MonitorConfig {
    /// Create a new configuration with the specified interval
    pub fn with_interval(interval_secs: u64) -> Self {
        Self {
            interval_secs: interval_secs.max(MIN_INTERVAL_SECS),
            ..Default::default()
        }
    }

    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        Self {
            interval_secs: self.interval_secs.max(MIN_INTERVAL_SECS),
            stale_after_secs: self.stale_after_secs.max(1),
            cli_timeout_secs: self.cli_timeout_secs.max(MIN_TIMEOUT_SECS),
            http_timeout_secs: self.http_timeout_secs.max(MIN_TIMEOUT_SECS),
            alert_floor: self.alert_floor,
            degrade_only: self.degrade_only,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(MIN_INTERVAL_SECS))
    }

    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout_secs.max(MIN_TIMEOUT_SECS))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(MIN_TIMEOUT_SECS))
    }
}
