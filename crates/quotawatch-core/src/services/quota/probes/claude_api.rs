//! Claude Code quota probe (OAuth usage API)
//!
//! Uses the OAuth token Claude Code keeps in `~/.claude/.credentials.json`.
//! Anthropic's OAuth has no refresh endpoint we can call; instead the
//! `claude` CLI is run headlessly so it renews its own token.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::claude::PROVIDER_ID;
use super::with_token_refresh;
use crate::services::quota::credentials::{CredentialSource, OAuthCredential, TokenRefresher};
use crate::services::quota::parsers::claude_api::parse_oauth_usage;
use crate::services::quota::{Probe, ProbeError, UsageSnapshot};
use crate::transport::{HttpRequest, NetworkClient};
use crate::utils::home_dir;

/// Anthropic OAuth usage API endpoint
const USAGE_API_URL: &str = "https://api.anthropic.com/api/oauth/usage";

/// OAuth beta header value for API access
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";

/// `~/.claude/.credentials.json`
pub fn default_credentials_path() -> PathBuf {
    home_dir().join(".claude").join(".credentials.json")
}

pub struct ClaudeApiProbe {
    network: Arc<dyn NetworkClient>,
    credentials: Arc<dyn CredentialSource>,
    refresher: Arc<dyn TokenRefresher>,
    timeout: Duration,
}

impl ClaudeApiProbe {
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
            timeout,
        }
    }

    async fn fetch(&self, credential: OAuthCredential) -> Result<UsageSnapshot, ProbeError> {
        let request = HttpRequest::get(USAGE_API_URL)
            .bearer(&credential.access_token)
            .header("anthropic-beta", OAUTH_BETA_HEADER)
            .header("Accept", "application/json")
            .timeout(self.timeout);

        let response = self.network.request(request).await?;
        if response.is_auth_failure() {
            log::warn!("[quota:claude] Usage API rejected the token ({})", response.status);
        }
        let response = response.error_for_status()?;

        parse_oauth_usage(
            PROVIDER_ID,
            &response.body,
            credential.plan.as_deref(),
            Utc::now(),
        )
    }
}

#[async_trait]
impl Probe for ClaudeApiProbe {
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
