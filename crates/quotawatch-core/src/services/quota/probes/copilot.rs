//! GitHub Copilot quota probe
//!
//! Reads a GitHub token from an environment variable (configurable per
//! provider, `GITHUB_TOKEN` by default) and queries Copilot's internal user
//! endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::services::quota::parsers::copilot::parse_copilot_user;
use crate::services::quota::{Probe, ProbeError, UsageSnapshot};
use crate::transport::{HttpRequest, NetworkClient};

pub const PROVIDER_ID: &str = "copilot";

pub const DEFAULT_TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

const COPILOT_USER_URL: &str = "https://api.github.com/copilot_internal/user";

pub struct CopilotProbe {
    network: Arc<dyn NetworkClient>,
    token_env_var: String,
    timeout: Duration,
}

impl CopilotProbe {
    pub fn new(network: Arc<dyn NetworkClient>, token_env_var: impl Into<String>, timeout: Duration) -> Self {
        Self {
            network,
            token_env_var: token_env_var.into(),
            timeout,
        }
    }

    fn token(&self) -> Option<String> {
        std::env::var(&self.token_env_var)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

#[async_trait]
impl Probe for CopilotProbe {
    async fn is_available(&self) -> bool {
        self.token().is_some()
    }

    async fn probe(&self) -> Result<UsageSnapshot, ProbeError> {
        let Some(token) = self.token() else {
            log::debug!("[quota:copilot] ${} is not set", self.token_env_var);
            return Err(ProbeError::AuthenticationRequired);
        };

        let request = HttpRequest::get(COPILOT_USER_URL)
            .header("Authorization", format!("token {}", token))
            .header("Accept", "application/json")
            .header("User-Agent", concat!("quotawatch/", env!("CARGO_PKG_VERSION")))
            .header("Editor-Version", "vscode/1.96.2")
            .timeout(self.timeout);

        let response = self.network.request(request).await?.error_for_status()?;
        parse_copilot_user(PROVIDER_ID, &response.body, Utc::now())
    }
}
