//! Z.ai coding-plan quota probe
//!
//! Z.ai is used by pointing Claude Code at it, so both the platform and the
//! fallback token come from `~/.claude/settings.json`. An endpoint override
//! and the name of the API key variable are provider settings.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::services::quota::parsers::zai::{
    detect_platform, extract_auth_token, parse_quota_limits, quota_url,
};
use crate::services::quota::{Probe, ProbeError, UsageSnapshot};
use crate::transport::{HttpRequest, NetworkClient};
use crate::utils::home_dir;

pub const PROVIDER_ID: &str = "zai";

pub const DEFAULT_TOKEN_ENV_VAR: &str = "ZAI_API_KEY";

/// `~/.claude/settings.json`
pub fn default_settings_path() -> PathBuf {
    home_dir().join(".claude").join("settings.json")
}

pub struct ZaiProbe {
    network: Arc<dyn NetworkClient>,
    settings_path: PathBuf,
    endpoint_override: Option<String>,
    token_env_var: String,
    timeout: Duration,
}

impl ZaiProbe {
    pub fn new(network: Arc<dyn NetworkClient>, timeout: Duration) -> Self {
        Self {
            network,
            settings_path: default_settings_path(),
            endpoint_override: None,
            token_env_var: DEFAULT_TOKEN_ENV_VAR.to_string(),
            timeout,
        }
    }

    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = path.into();
        self
    }

    /// Base URL used instead of the detected platform
    pub fn with_endpoint_override(mut self, endpoint: Option<String>) -> Self {
        self.endpoint_override = endpoint.filter(|e| !e.trim().is_empty());
        self
    }

    pub fn with_token_env_var(mut self, name: impl Into<String>) -> Self {
        self.token_env_var = name.into();
        self
    }

    fn claude_settings(&self) -> Option<String> {
        std::fs::read_to_string(&self.settings_path).ok()
    }

    fn base_url(&self, settings: Option<&str>) -> Option<String> {
        if let Some(endpoint) = &self.endpoint_override {
            return Some(endpoint.clone());
        }
        detect_platform(settings?).map(|platform| platform.base_url().to_string())
    }

    fn token(&self, settings: Option<&str>) -> Option<String> {
        std::env::var(&self.token_env_var)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| settings.and_then(extract_auth_token))
    }
}

#[async_trait]
impl Probe for ZaiProbe {
    async fn is_available(&self) -> bool {
        let settings = self.claude_settings();
        self.base_url(settings.as_deref()).is_some() && self.token(settings.as_deref()).is_some()
    }

    async fn probe(&self) -> Result<UsageSnapshot, ProbeError> {
        let settings = self.claude_settings();
        let base_url = self.base_url(settings.as_deref()).ok_or(ProbeError::NoData)?;
        let token = self
            .token(settings.as_deref())
            .ok_or(ProbeError::AuthenticationRequired)?;

        let request = HttpRequest::get(quota_url(&base_url))
            .bearer(&token)
            .header("Accept", "application/json")
            .header("Accept-Language", "en-US,en")
            .timeout(self.timeout);

        let response = self.network.request(request).await?.error_for_status()?;
        parse_quota_limits(PROVIDER_ID, &response.body, Utc::now())
    }
}
