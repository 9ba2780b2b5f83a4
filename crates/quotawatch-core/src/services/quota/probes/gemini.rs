//! Gemini CLI quota probe (Code Assist API)
//!
//! Uses the OAuth token the Gemini CLI stores in `~/.gemini/oauth_creds.json`.
//! The Code Assist project id is looked up first; that lookup is best-effort
//! and the quota call still runs without it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::with_token_refresh;
use crate::services::quota::credentials::{CredentialSource, OAuthCredential, TokenRefresher};
use crate::services::quota::parsers::gemini::{
    parse_load_code_assist, parse_quota_buckets, CodeAssistInfo,
};
use crate::services::quota::{Probe, ProbeError, UsageSnapshot};
use crate::transport::{retry_lookup, HttpRequest, NetworkClient, RetryPolicy};
use crate::utils::home_dir;

pub const PROVIDER_ID: &str = "gemini";

const CODE_ASSIST_BASE_URL: &str = "https://cloudcode-pa.googleapis.com/v1internal";

/// `~/.gemini/oauth_creds.json`
pub fn default_credentials_path() -> PathBuf {
    home_dir().join(".gemini").join("oauth_creds.json")
}

pub struct GeminiProbe {
    network: Arc<dyn NetworkClient>,
    credentials: Arc<dyn CredentialSource>,
    refresher: Arc<dyn TokenRefresher>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl GeminiProbe {
    pub fn new(
        network: Arc<dyn NetworkClient>,
        credentials: Arc<dyn CredentialSource>,
        refresher: Arc<dyn TokenRefresher>,
        timeout: Duration,
    ) -> Self {
        Self {
            network,
            credentials,
            refresher,
            retry: RetryPolicy::default(),
            timeout,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn load_code_assist(&self, token: &str) -> Result<CodeAssistInfo, ProbeError> {
        let request = HttpRequest::post(format!("{}:loadCodeAssist", CODE_ASSIST_BASE_URL))
            .bearer(token)
            .json_body(&json!({
                "metadata": {
                    "ideType": "IDE_UNSPECIFIED",
                    "platform": "PLATFORM_UNSPECIFIED",
                    "pluginType": "GEMINI",
                }
            }))
            .timeout(self.timeout);

        let response = self.network.request(request).await?.error_for_status()?;
        parse_load_code_assist(&response.body)
    }

    async fn fetch(&self, credential: OAuthCredential) -> Result<UsageSnapshot, ProbeError> {
        let token = credential.access_token.as_str();
        let info = retry_lookup(&self.retry, "gemini loadCodeAssist", || {
            self.load_code_assist(token)
        })
        .await
        .unwrap_or_default();

        let body = match &info.project_id {
            Some(project) => json!({ "project": project }),
            None => {
                log::debug!("[quota:gemini] No Code Assist project, querying without one");
                json!({})
            }
        };

        let request = HttpRequest::post(format!("{}:retrieveUserQuota", CODE_ASSIST_BASE_URL))
            .bearer(token)
            .json_body(&body)
            .timeout(self.timeout);
        let response = self.network.request(request).await?.error_for_status()?;

        let mut snapshot = parse_quota_buckets(PROVIDER_ID, &response.body, Utc::now())?;
        if let Some(account) = info.account() {
            snapshot = snapshot.with_account(account);
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl Probe for GeminiProbe {
    async fn is_available(&self) -> bool {
        self.credentials.exists()
    }

    async fn probe(&self) -> Result<UsageSnapshot, ProbeError> {
        with_token_refresh(
            self.credentials.as_ref(),
            self.refresher.as_ref(),
            PROVIDER_ID,
            |credential| self.fetch(credential),
        )
        .await
    }
}
