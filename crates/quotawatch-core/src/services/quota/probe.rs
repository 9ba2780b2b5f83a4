//! Probe trait and error taxonomy
//!
//! A probe knows how to reach one provider's data and turn it into a
//! `UsageSnapshot`. Probes never mutate shared state; the provider that owns a
//! probe records the outcome.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

use super::credentials::TokenRefresher;
use super::types::UsageSnapshot;

// ============================================================================
// Error Types
// ============================================================================

/// Why a probe did not produce a snapshot
///
/// Carried as a value so callers can branch on the kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The tool's binary could not be found
    #[error("CLI not found: {0}")]
    CliNotFound(String),

    /// Not logged in, or the stored credential was rejected
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Output did not contain recognizable quota data
    #[error("Failed to parse output: {0}")]
    ParseFailed(String),

    /// The transport call did not finish in time
    #[error("Timed out")]
    Timeout,

    /// The tool has no usage data yet
    #[error("No usage data available")]
    NoData,

    /// The installed tool is too old
    #[error("Update required")]
    UpdateRequired,

    /// The tool is waiting for the user to trust the working folder
    #[error("Folder trust required")]
    FolderTrustRequired,

    /// The tool or API reports rate limiting
    #[error("Rate limited")]
    RateLimited,

    /// Launch failure, transport failure or unexpected status
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl ProbeError {
    /// Only authentication failures warrant the one remediation attempt
    pub fn is_retryable_with_remediation(&self) -> bool {
        matches!(self, ProbeError::AuthenticationRequired)
    }

    /// Short machine-friendly kind name
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::CliNotFound(_) => "cli_not_found",
            ProbeError::AuthenticationRequired => "authentication_required",
            ProbeError::ParseFailed(_) => "parse_failed",
            ProbeError::Timeout => "timeout",
            ProbeError::NoData => "no_data",
            ProbeError::UpdateRequired => "update_required",
            ProbeError::FolderTrustRequired => "folder_trust_required",
            ProbeError::RateLimited => "rate_limited",
            ProbeError::ExecutionFailed(_) => "execution_failed",
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else if err.is_connect() {
            ProbeError::ExecutionFailed("Connection failed".to_string())
        } else if err.is_status() {
            match err.status().map(|s| s.as_u16()) {
                Some(401) | Some(403) => ProbeError::AuthenticationRequired,
                Some(429) => ProbeError::RateLimited,
                Some(status) => ProbeError::ExecutionFailed(format!("HTTP {}", status)),
                None => ProbeError::ExecutionFailed(err.to_string()),
            }
        } else {
            ProbeError::ExecutionFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::ParseFailed(err.to_string())
    }
}

// ============================================================================
// Probe Trait
// ============================================================================

/// Adapter that reads one provider's quotas
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
/// use quotawatch_core::services::quota::{Probe, ProbeError, UsageSnapshot};
///
/// struct MyProbe;
///
/// #[async_trait]
/// impl Probe for MyProbe {
///     async fn is_available(&self) -> bool {
///         // Binary present, credential file present, process reachable...
///         true
///     }
///
///     async fn probe(&self) -> Result<UsageSnapshot, ProbeError> {
///         // Run the transport, hand the raw output to a parser
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait Probe: Send + Sync {
    /// Side-effect-free feasibility check
    async fn is_available(&self) -> bool;

    /// Read the current quotas
    async fn probe(&self) -> Result<UsageSnapshot, ProbeError>;
}

/// Run `attempt`, and on an authentication failure refresh the token once and
/// run it again
///
/// When the refresh itself fails the original error is returned unchanged.
pub async fn probe_with_remediation<T, F, Fut>(
    refresher: &dyn TokenRefresher,
    label: &str,
    mut attempt: F,
) -> Result<T, ProbeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    match attempt().await {
        Err(err) if err.is_retryable_with_remediation() => {
            log::info!("[quota:{}] {}; refreshing token and retrying once", label, err);
            if let Err(refresh_err) = refresher.refresh().await {
                log::warn!("[quota:{}] Token refresh unavailable: {}", label, refresh_err);
                return Err(err);
            }
            attempt().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeRefresher {
        result: Result<(), ProbeError>,
        calls: AtomicU32,
    }

    impl FakeRefresher {
        fn new(result: Result<(), ProbeError>) -> Self {
            Self {
                result,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ProbeError::CliNotFound("claude".into()).to_string(),
            "CLI not found: claude"
        );
        assert_eq!(ProbeError::Timeout.to_string(), "Timed out");
    }

    #[test]
    fn test_only_auth_is_remediable() {
        assert!(ProbeError::AuthenticationRequired.is_retryable_with_remediation());
        assert!(!ProbeError::Timeout.is_retryable_with_remediation());
        assert!(!ProbeError::RateLimited.is_retryable_with_remediation());
        assert!(!ProbeError::ParseFailed("x".into()).is_retryable_with_remediation());
    }

    #[test]
    fn test_from_serde_error() {
        let err: ProbeError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, ProbeError::ParseFailed(_)));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ProbeError::NoData.kind(), "no_data");
        assert_eq!(ProbeError::FolderTrustRequired.kind(), "folder_trust_required");
    }

    #[tokio::test]
    async fn test_remediation_retries_once_after_refresh() {
        let refresher = FakeRefresher::new(Ok(()));
        let attempts = AtomicU32::new(0);
        let result = probe_with_remediation(&refresher, "test", || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(ProbeError::AuthenticationRequired)
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remediation_does_not_loop() {
        let refresher = FakeRefresher::new(Ok(()));
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = probe_with_remediation(&refresher, "test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ProbeError::AuthenticationRequired)
        })
        .await;
        assert_eq!(result, Err(ProbeError::AuthenticationRequired));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_original_error() {
        let refresher = FakeRefresher::new(Err(ProbeError::CliNotFound("claude".into())));
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = probe_with_remediation(&refresher, "test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ProbeError::AuthenticationRequired)
        })
        .await;
        assert_eq!(result, Err(ProbeError::AuthenticationRequired));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_errors_skip_remediation() {
        let refresher = FakeRefresher::new(Ok(()));
        let result: Result<(), _> =
            probe_with_remediation(&refresher, "test", || async { Err(ProbeError::Timeout) }).await;
        assert_eq!(result, Err(ProbeError::Timeout));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }
}
