//! Bounded retry for enrichment lookups
//!
//! Lookups that only improve a probe's accuracy (project ids, port discovery)
//! are retried with a linearly growing delay. Authorization failures abort at
//! once since retrying cannot fix them. When attempts run out the lookup
//! yields `None` and the caller carries on in degraded mode.

use std::future::Future;
use std::time::Duration;

use crate::services::quota::ProbeError;

/// Retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Run `op` until it succeeds, fails with an authorization error, or the
/// attempts are exhausted
pub async fn retry_lookup<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Some(value),
            Err(ProbeError::AuthenticationRequired) => {
                log::warn!("[quota:retry] {} rejected credentials, not retrying", label);
                return None;
            }
            Err(e) => {
                log::debug!(
                    "[quota:retry] {} attempt {}/{} failed: {}",
                    label,
                    attempt,
                    attempts,
                    e
                );
                if attempt < attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }

    log::warn!("[quota:retry] {} failed after {} attempts", label, attempts);
    None
}
