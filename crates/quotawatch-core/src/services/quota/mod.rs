//! Quota monitoring module
//!
//! Periodically checks the usage quotas of several AI coding assistants and
//! raises an alert when a provider's health status changes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ QuotaMonitor (orchestrator)                             │
//! │   - refresh_all() / refresh() / refresh_others()        │
//! │   - status transitions -> Alerter                       │
//! │   - selection, continuous polling, MonitorEvent stream  │
//! └─────────────────────────────────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │ ProviderRegistry -> Provider (snapshot, last error,     │
//! │                     syncing flag, enabled flag)         │
//! └─────────────────────────────────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │ trait Probe                                             │
//! │   - is_available() -> bool                              │
//! │   - probe() -> UsageSnapshot                            │
//! └─────────────────────────────────────────────────────────┘
//!          │
//!     ┌────┴─────┬──────────┬─────────┬─────────┬────────┐
//!     ▼          ▼          ▼         ▼         ▼        ▼
//! ┌──────┐   ┌──────┐   ┌──────┐  ┌───────┐ ┌──────┐ ┌─────┐
//! │Claude│   │Codex │   │Gemini│  │Copilot│ │Antig.│ │Z.ai │
//! │CLI/  │   │RPC / │   │REST  │  │REST   │ │local │ │REST │
//! │OAuth │   │CLI   │   │      │  │       │ │RPC   │ │     │
//! └──────┘   └──────┘   └──────┘  └───────┘ └──────┘ └─────┘
//! ```
//!
//! Parsers (`parsers`) are pure functions over raw text or JSON; probes
//! (`probes`) pair one transport with one parser.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use quotawatch_core::{default_registry, JsonSettingsStore, LogAlerter, QuotaMonitor};
//!
//! let settings = Arc::new(JsonSettingsStore::open_default()?);
//! let config = settings.monitor_config();
//! let registry = Arc::new(default_registry(settings, &config));
//! let monitor = QuotaMonitor::new(registry, Arc::new(LogAlerter));
//!
//! monitor.refresh_all().await;
//! println!("overall: {}", monitor.overall_status());
//! ```

pub mod alert;
pub mod credentials;
pub mod monitor;
pub mod parsers;
pub mod probe;
pub mod probes;
pub mod provider;
pub mod registry;
pub mod types;

// Re-export main types
pub use types::{AccountInfo, CostUsage, Quota, QuotaStatus, QuotaType, UsageSnapshot};

// Re-export probe trait and error
pub use probe::{probe_with_remediation, Probe, ProbeError};

pub use alert::{AlertError, Alerter, ChannelAlerter, DegradationAlerter, LogAlerter, StatusTransition};
pub use credentials::{
    CliTokenRefresher, CredentialFormat, CredentialSource, FileCredentialSource, OAuthCredential,
    TokenRefresher,
};
pub use monitor::{MonitorEvent, QuotaMonitor};
pub use provider::{Provider, ProviderInfo};
pub use registry::{default_registry, ProviderRegistry};
