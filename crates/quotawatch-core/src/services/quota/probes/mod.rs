//! One probe per data source
//!
//! Each probe pairs a single transport (CLI executor, HTTP client or local
//! RPC) with its parser from `parsers`. Probes hold no mutable state.

pub mod antigravity;
pub mod claude;
pub mod claude_api;
pub mod codex;
pub mod copilot;
pub mod gemini;
pub mod zai;

pub use antigravity::AntigravityProbe;
pub use claude::ClaudeCliProbe;
pub use claude_api::ClaudeApiProbe;
pub use codex::{CodexCliProbe, CodexRpcProbe};
pub use copilot::CopilotProbe;
pub use gemini::GeminiProbe;
pub use zai::ZaiProbe;

use std::future::Future;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::credentials::{CredentialSource, OAuthCredential, TokenRefresher};
use super::probe::{probe_with_remediation, ProbeError};

/// Saves credentials handed back by a refresher and keeps the latest one for
/// the next attempt
struct WriteBackRefresher<'a> {
    inner: &'a dyn TokenRefresher,
    credentials: &'a dyn CredentialSource,
    label: &'a str,
    issued: Mutex<Option<OAuthCredential>>,
}

impl WriteBackRefresher<'_> {
    /// The credential issued by the last refresh, else the stored one
    fn current(&self) -> Result<OAuthCredential, ProbeError> {
        match self.issued.lock().take() {
            Some(credential) => Ok(credential),
            None => self.credentials.load(),
        }
    }
}

#[async_trait]
impl TokenRefresher for WriteBackRefresher<'_> {
    async fn refresh(&self) -> Result<(), ProbeError> {
        if let Some(credential) = self.inner.refresh_credential().await? {
            if let Err(e) = self.credentials.save(&credential) {
                log::warn!("[quota:{}] Could not save refreshed token: {}", self.label, e);
            }
            *self.issued.lock() = Some(credential);
        }
        Ok(())
    }
}

/// Run an authenticated call with at most one token refresh
///
/// A credential that is already due for refresh is renewed before the call
/// and the call runs once. Otherwise an authentication failure triggers one
/// refresh and one retry. Credentials returned by the refresher are saved
/// back to `credentials`.
pub(crate) async fn with_token_refresh<T, F, Fut>(
    credentials: &dyn CredentialSource,
    refresher: &dyn TokenRefresher,
    label: &str,
    mut attempt: F,
) -> Result<T, ProbeError>
where
    F: FnMut(OAuthCredential) -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    let credential = credentials.load()?;
    let refresher = WriteBackRefresher {
        inner: refresher,
        credentials,
        label,
        issued: Mutex::new(None),
    };

    if credential.needs_refresh() {
        log::info!("[quota:{}] Token expires soon, refreshing first", label);
        if let Err(e) = refresher.refresh().await {
            log::warn!("[quota:{}] Proactive token refresh failed: {}", label, e);
        }
        return attempt(refresher.current()?).await;
    }

    let mut first = Some(credential);
    probe_with_remediation(&refresher, label, || {
        // First attempt reuses the loaded credential, the retry takes the
        // renewed one
        let credential = match first.take() {
            Some(credential) => Ok(credential),
            None => refresher.current(),
        };
        let fut = credential.map(&mut attempt);
        async move {
            match fut {
                Ok(fut) => fut.await,
                Err(e) => Err(e),
            }
        }
    })
    .await
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Scripted transports for probe tests

    use std::collections::VecDeque;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::services::quota::ProbeError;
    use crate::transport::{CliExecutor, CliOutput, CliRequest, HttpRequest, HttpResponse, NetworkClient};

    /// Answers requests from a queue, recording what was asked
    #[derive(Default)]
    pub struct FakeNetwork {
        responses: Mutex<VecDeque<Result<HttpResponse, ProbeError>>>,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, status: u16, body: &str) -> Self {
            self.responses
                .lock()
                .push_back(Ok(HttpResponse::new(status, body)));
            self
        }

        pub fn fail(self, error: ProbeError) -> Self {
            self.responses.lock().push_back(Err(error));
            self
        }

        pub fn urls(&self) -> Vec<String> {
            self.requests.lock().iter().map(|r| r.url.clone()).collect()
        }
    }

    #[async_trait]
    impl NetworkClient for FakeNetwork {
        async fn request(&self, request: HttpRequest) -> Result<HttpResponse, ProbeError> {
            self.requests.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ProbeError::ExecutionFailed("no scripted response".into())))
        }
    }

    /// Pretends the listed binaries are installed and replays outputs
    #[derive(Default)]
    pub struct FakeExecutor {
        installed: Vec<String>,
        outputs: Mutex<VecDeque<Result<CliOutput, ProbeError>>>,
        pub requests: Mutex<Vec<CliRequest>>,
    }

    impl FakeExecutor {
        pub fn with_binaries(binaries: &[&str]) -> Self {
            Self {
                installed: binaries.iter().map(|b| b.to_string()).collect(),
                ..Default::default()
            }
        }

        pub fn output(self, exit_code: i32, output: &str) -> Self {
            self.outputs.lock().push_back(Ok(CliOutput {
                output: output.to_string(),
                exit_code,
            }));
            self
        }

        pub fn fail(self, error: ProbeError) -> Self {
            self.outputs.lock().push_back(Err(error));
            self
        }

        pub fn commands(&self) -> Vec<String> {
            self.requests
                .lock()
                .iter()
                .map(|r| format!("{} {}", r.binary, r.args.join(" ")).trim().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl CliExecutor for FakeExecutor {
        fn locate(&self, binary: &str) -> Option<PathBuf> {
            self.installed
                .iter()
                .any(|b| b == binary)
                .then(|| PathBuf::from(format!("/usr/bin/{}", binary)))
        }

        async fn execute(&self, request: CliRequest) -> Result<CliOutput, ProbeError> {
            self.requests.lock().push(request);
            self.outputs.lock().pop_front().unwrap_or_else(|| {
                Ok(CliOutput {
                    output: String::new(),
                    exit_code: 0,
                })
            })
        }
    }
}
