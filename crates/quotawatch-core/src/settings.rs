//! Settings persistence
//!
//! The core only needs read access to per-provider settings when probes are
//! built, and write access when a provider is toggled. `JsonSettingsStore`
//! keeps everything in one JSON document:
//!
//! ```json
//! {
//!   "providers": {
//!     "claude": { "enabled": true, "probe_mode": "api" },
//!     "zai": { "enabled": false, "auth_env_var": "ZAI_TOKEN" }
//!   },
//!   "monitor": { "interval_secs": 300 }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::error::{Error, Result};

/// Environment variable overriding the settings file location
pub const CONFIG_ENV_VAR: &str = "QUOTAWATCH_CONFIG";

/// Setting key selecting how a provider is probed (e.g. "cli" or "api")
pub const KEY_PROBE_MODE: &str = "probe_mode";

/// Setting key overriding a provider's API endpoint
pub const KEY_ENDPOINT_OVERRIDE: &str = "endpoint_override";

/// Setting key naming the environment variable that holds an API token
pub const KEY_AUTH_ENV_VAR: &str = "auth_env_var";

// ============================================================================
// Repository Trait
// ============================================================================

/// Read/write access to persisted settings
pub trait SettingsRepository: Send + Sync {
    /// Whether a provider is enabled, `default` when never set
    fn is_enabled(&self, provider_id: &str, default: bool) -> bool;

    /// Persist a provider's enabled flag
    fn set_enabled(&self, provider_id: &str, enabled: bool) -> Result<()>;

    /// Provider-specific string setting
    fn provider_string(&self, provider_id: &str, key: &str) -> Option<String>;

    /// Set or clear (`None`) a provider-specific string setting
    fn set_provider_string(&self, provider_id: &str, key: &str, value: Option<&str>) -> Result<()>;

    /// Monitor configuration, validated
    fn monitor_config(&self) -> MonitorConfig;
}

// ============================================================================
// Document
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(flatten)]
    values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    providers: BTreeMap<String, ProviderSettings>,
    #[serde(default)]
    monitor: MonitorConfig,
}

// ============================================================================
// JSON Store
// ============================================================================

/// Settings kept in a JSON file, or in memory only
pub struct JsonSettingsStore {
    path: Option<PathBuf>,
    doc: RwLock<SettingsDocument>,
}

impl JsonSettingsStore {
    /// Open the store at `path`; a missing file yields default settings
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                SettingsDocument::default()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    Error::settings(format!("Invalid settings file {}: {}", path.display(), e))
                })?
            }
        } else {
            SettingsDocument::default()
        };

        log::debug!("[quota:settings] Loaded settings from {}", path.display());

        Ok(Self {
            path: Some(path),
            doc: RwLock::new(doc),
        })
    }

    /// Open the store at the default location
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    /// A store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: RwLock::new(SettingsDocument::default()),
        }
    }

    /// Settings file path
    /// Priority: QUOTAWATCH_CONFIG env var > platform config directory
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        let dirs = directories::ProjectDirs::from("com", "quotawatch", "quotawatch")
            .ok_or_else(|| Error::config("Could not determine project directories"))?;

        Ok(dirs.config_dir().join("settings.json"))
    }

    /// Backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the monitor section
    pub fn set_monitor_config(&self, config: MonitorConfig) -> Result<()> {
        self.update(|doc| doc.monitor = config.validate())
    }

    /// Apply `mutate` and persist; the document is left unchanged on failure
    fn update(&self, mutate: impl FnOnce(&mut SettingsDocument)) -> Result<()> {
        let mut doc = self.doc.write();
        let previous = doc.clone();
        mutate(&mut doc);
        if let Err(err) = self.persist(&doc) {
            *doc = previous;
            return Err(err);
        }
        Ok(())
    }

    fn persist(&self, doc: &SettingsDocument) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(doc)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl SettingsRepository for JsonSettingsStore {
    fn is_enabled(&self, provider_id: &str, default: bool) -> bool {
        self.doc
            .read()
            .providers
            .get(provider_id)
            .and_then(|p| p.enabled)
            .unwrap_or(default)
    }

    fn set_enabled(&self, provider_id: &str, enabled: bool) -> Result<()> {
        log::info!(
            "[quota:settings] {} provider {}",
            if enabled { "Enabling" } else { "Disabling" },
            provider_id
        );
        self.update(|doc| {
            doc.providers
                .entry(provider_id.to_string())
                .or_default()
                .enabled = Some(enabled);
        })
    }

    fn provider_string(&self, provider_id: &str, key: &str) -> Option<String> {
        self.doc
            .read()
            .providers
            .get(provider_id)
            .and_then(|p| p.values.get(key))
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }

    fn set_provider_string(&self, provider_id: &str, key: &str, value: Option<&str>) -> Result<()> {
        if key == "enabled" {
            return Err(Error::settings("Use set_enabled to change the enabled flag"));
        }
        self.update(|doc| {
            let entry = doc.providers.entry(provider_id.to_string()).or_default();
            match value {
                Some(v) => {
                    entry.values.insert(key.to_string(), v.to_string());
                }
                None => {
                    entry.values.remove(key);
                }
            }
        })
    }

    fn monitor_config(&self) -> MonitorConfig {
        self.doc.read().monitor.validate()
    }
}
