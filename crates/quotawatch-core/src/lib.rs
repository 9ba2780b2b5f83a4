//! # quotawatch-core
//!
//! Core quota monitoring logic - shared between the CLI and any UI shell.
//!
//! This crate provides:
//! - Quota data model and pure parsers (`services::quota::types`, `services::quota::parsers`)
//! - One probe per AI coding assistant (`services::quota::probes`)
//! - Per-source provider state, the provider registry and the quota monitor
//! - Transports the probes are built on (`transport` module)
//! - Settings persistence and monitor configuration (`settings`, `config` modules)
//! - Unified error handling (`error` module)

pub mod config;
pub mod error;
pub mod services;
pub mod settings;
pub mod transport;
pub mod utils;

// Re-export utils for convenience
pub use utils::create_command;

// Re-exports for convenience
pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use settings::{JsonSettingsStore, SettingsRepository};

// Re-export commonly used types from services
pub use services::quota::{
    default_registry, Alerter, AlertError, DegradationAlerter, LogAlerter, MonitorEvent, Probe,
    ProbeError, Provider, ProviderInfo, ProviderRegistry, Quota, QuotaMonitor, QuotaStatus,
    QuotaType, UsageSnapshot,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
