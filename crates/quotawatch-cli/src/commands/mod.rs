//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod providers;
pub mod status;
pub mod watch;

use std::sync::Arc;

use crate::output::OutputFormat;
use quotawatch_core::{
    default_registry, DegradationAlerter, JsonSettingsStore, LogAlerter, MonitorConfig,
    ProviderRegistry, QuotaMonitor,
};

/// Shared context for all commands
pub struct Context {
    pub settings: Arc<JsonSettingsStore>,
    pub config: MonitorConfig,
    pub format: OutputFormat,
    pub quiet: bool,
}

impl Context {
    pub fn registry(&self) -> Arc<ProviderRegistry> {
        Arc::new(default_registry(self.settings.clone(), &self.config))
    }

    /// Monitor over the default registry, alerting through the log
    pub fn monitor(&self) -> Arc<QuotaMonitor> {
        let alerter = DegradationAlerter::from_config(LogAlerter, &self.config);
        Arc::new(QuotaMonitor::new(self.registry(), Arc::new(alerter)))
    }
}
