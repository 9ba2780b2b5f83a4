//! Provider Registry
//!
//! Holds the set of monitored providers in a stable order and builds the
//! default set from settings.

use std::sync::Arc;

use parking_lot::RwLock;

use super::credentials::{CliTokenRefresher, CredentialFormat, FileCredentialSource};
use super::probe::Probe;
use super::probes::{
    antigravity, claude, claude_api, codex, copilot, gemini, zai, AntigravityProbe,
    ClaudeApiProbe, ClaudeCliProbe, CodexCliProbe, CodexRpcProbe, CopilotProbe, GeminiProbe,
    ZaiProbe,
};
use super::provider::{Provider, ProviderInfo};
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::settings::{SettingsRepository, KEY_AUTH_ENV_VAR, KEY_ENDPOINT_OVERRIDE, KEY_PROBE_MODE};
use crate::transport::{CliExecutor, NetworkClient, ProcessCliExecutor, ReqwestNetworkClient};

/// Ordered collection of providers, unique by id
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; ids must be unique
    pub fn add(&self, provider: Provider) -> Result<Arc<Provider>> {
        let mut providers = self.providers.write();
        if providers.iter().any(|p| p.id() == provider.id()) {
            return Err(Error::config(format!(
                "Provider '{}' is already registered",
                provider.id()
            )));
        }
        let provider = Arc::new(provider);
        providers.push(provider.clone());
        Ok(provider)
    }

    /// Remove a provider by id, returning it if it was registered
    pub fn remove(&self, id: &str) -> Option<Arc<Provider>> {
        let mut providers = self.providers.write();
        let index = providers.iter().position(|p| p.id() == id)?;
        Some(providers.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<Arc<Provider>> {
        self.providers.read().iter().find(|p| p.id() == id).cloned()
    }

    /// All providers in registration order
    pub fn all(&self) -> Vec<Arc<Provider>> {
        self.providers.read().clone()
    }

    /// Enabled providers in registration order
    pub fn enabled(&self) -> Vec<Arc<Provider>> {
        self.providers
            .read()
            .iter()
            .filter(|p| p.is_enabled())
            .cloned()
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.read().iter().map(|p| p.id().to_string()).collect()
    }

    /// Enable or disable a provider and persist the flag
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let provider = self
            .get(id)
            .ok_or_else(|| Error::not_found(format!("Unknown provider '{}'", id)))?;
        provider.set_enabled(enabled)
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}

/// Build the registry of every supported provider
///
/// Probe variants and per-provider options come from `settings`; timeouts
/// come from `config`. Claude, Codex and Gemini are enabled unless the
/// settings say otherwise, the rest are opt-in.
pub fn default_registry(settings: Arc<dyn SettingsRepository>, config: &MonitorConfig) -> ProviderRegistry {
    let executor: Arc<dyn CliExecutor> = Arc::new(ProcessCliExecutor::new());
    let network: Arc<dyn NetworkClient> = Arc::new(ReqwestNetworkClient::new());
    let cli_timeout = config.cli_timeout();
    let http_timeout = config.http_timeout();
    let registry = ProviderRegistry::new();

    let register = |info: ProviderInfo, probe: Arc<dyn Probe>, enabled_by_default: bool| {
        if let Err(e) = registry.add(Provider::new(info, probe, settings.clone(), enabled_by_default)) {
            log::warn!("[quota] {}", e);
        }
    };

    // Claude: interactive CLI by default, OAuth usage API on request
    let claude_probe: Arc<dyn Probe> = match probe_mode(settings.as_ref(), claude::PROVIDER_ID).as_deref() {
        Some("api") => Arc::new(ClaudeApiProbe::new(
            network.clone(),
            Arc::new(FileCredentialSource::new(
                claude_api::default_credentials_path(),
                CredentialFormat::ClaudeCode,
            )),
            Arc::new(CliTokenRefresher::claude(executor.clone(), cli_timeout)),
            http_timeout,
        )),
        _ => Arc::new(ClaudeCliProbe::new(executor.clone(), cli_timeout)),
    };
    register(
        ProviderInfo::new(claude::PROVIDER_ID, "Claude Code", "claude")
            .with_dashboard_url("https://console.anthropic.com/settings/billing")
            .with_status_url("https://status.anthropic.com"),
        claude_probe,
        true,
    );

    // Codex: app-server RPC by default, interactive /status on request
    let codex_probe: Arc<dyn Probe> = match probe_mode(settings.as_ref(), codex::PROVIDER_ID).as_deref() {
        Some("cli") => Arc::new(CodexCliProbe::new(executor.clone(), cli_timeout)),
        _ => Arc::new(CodexRpcProbe::new(executor.clone(), cli_timeout)),
    };
    register(
        ProviderInfo::new(codex::PROVIDER_ID, "Codex", "codex")
            .with_dashboard_url("https://chatgpt.com/codex/settings/usage")
            .with_status_url("https://status.openai.com"),
        codex_probe,
        true,
    );

    register(
        ProviderInfo::new(gemini::PROVIDER_ID, "Gemini", "gemini")
            .with_dashboard_url("https://aistudio.google.com")
            .with_status_url("https://www.google.com/appsstatus/dashboard"),
        Arc::new(GeminiProbe::new(
            network.clone(),
            Arc::new(FileCredentialSource::new(
                gemini::default_credentials_path(),
                CredentialFormat::GeminiCli,
            )),
            Arc::new(CliTokenRefresher::gemini(executor.clone(), cli_timeout)),
            http_timeout,
        )),
        true,
    );

    let copilot_env = settings
        .provider_string(copilot::PROVIDER_ID, KEY_AUTH_ENV_VAR)
        .unwrap_or_else(|| copilot::DEFAULT_TOKEN_ENV_VAR.to_string());
    register(
        ProviderInfo::new(copilot::PROVIDER_ID, "GitHub Copilot", "gh")
            .with_dashboard_url("https://github.com/settings/copilot")
            .with_status_url("https://www.githubstatus.com"),
        Arc::new(CopilotProbe::new(network.clone(), copilot_env, http_timeout)),
        false,
    );

    let local_network: Arc<dyn NetworkClient> = match ReqwestNetworkClient::accepting_self_signed() {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::warn!("[quota:antigravity] {}, falling back to the default client", e);
            network.clone()
        }
    };
    register(
        ProviderInfo::new(antigravity::PROVIDER_ID, "Antigravity", "antigravity"),
        Arc::new(AntigravityProbe::new(executor.clone(), local_network, cli_timeout)),
        false,
    );

    let mut zai_probe = ZaiProbe::new(network.clone(), http_timeout).with_endpoint_override(
        settings.provider_string(zai::PROVIDER_ID, KEY_ENDPOINT_OVERRIDE),
    );
    if let Some(env_var) = settings.provider_string(zai::PROVIDER_ID, KEY_AUTH_ENV_VAR) {
        zai_probe = zai_probe.with_token_env_var(env_var);
    }
    register(
        ProviderInfo::new(zai::PROVIDER_ID, "Z.ai", "claude")
            .with_dashboard_url("https://z.ai/manage-apikey/subscription"),
        Arc::new(zai_probe),
        false,
    );

    log::debug!("[quota] Registered providers: {:?}", registry.ids());
    registry
}

fn probe_mode(settings: &dyn SettingsRepository, provider_id: &str) -> Option<String> {
    settings
        .provider_string(provider_id, KEY_PROBE_MODE)
        .map(|mode| mode.trim().to_ascii_lowercase())
}
