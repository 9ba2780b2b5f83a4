//! Provider: one monitored tool with its probe and runtime state
//!
//! A provider owns the only mutable state tied to a data source: the last
//! snapshot, the last error, the syncing flag and the enabled flag. All of
//! it lives behind one lock so readers never see a half-applied refresh.

use std::sync::Arc;

use parking_lot::RwLock;

use super::probe::{Probe, ProbeError};
use super::types::UsageSnapshot;
use crate::settings::SettingsRepository;

/// Static identity of a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Stable id used in settings and alerts (e.g. "claude")
    pub id: String,
    /// Human-readable name (e.g. "Claude Code")
    pub name: String,
    /// CLI binary the tool ships with
    pub cli_command: String,
    pub dashboard_url: Option<String>,
    pub status_url: Option<String>,
}

impl ProviderInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        cli_command: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cli_command: cli_command.into(),
            dashboard_url: None,
            status_url: None,
        }
    }

    pub fn with_dashboard_url(mut self, url: impl Into<String>) -> Self {
        self.dashboard_url = Some(url.into());
        self
    }

    pub fn with_status_url(mut self, url: impl Into<String>) -> Self {
        self.status_url = Some(url.into());
        self
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    is_syncing: bool,
    snapshot: Option<UsageSnapshot>,
    last_error: Option<ProbeError>,
    is_enabled: bool,
}

/// Clears the syncing flag however the refresh ends, cancellation included
struct SyncingGuard<'a> {
    state: &'a RwLock<ProviderState>,
}

impl<'a> SyncingGuard<'a> {
    fn begin(state: &'a RwLock<ProviderState>) -> Self {
        state.write().is_syncing = true;
        Self { state }
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.state.write().is_syncing = false;
    }
}

pub struct Provider {
    info: ProviderInfo,
    probe: Arc<dyn Probe>,
    settings: Arc<dyn SettingsRepository>,
    state: RwLock<ProviderState>,
    /// Held for the duration of a refresh
    refresh_gate: tokio::sync::Mutex<()>,
}

impl Provider {
    /// Create a provider; the enabled flag is read from settings
    pub fn new(
        info: ProviderInfo,
        probe: Arc<dyn Probe>,
        settings: Arc<dyn SettingsRepository>,
        enabled_by_default: bool,
    ) -> Self {
        let is_enabled = settings.is_enabled(&info.id, enabled_by_default);
        Self {
            info,
            probe,
            settings,
            state: RwLock::new(ProviderState {
                is_enabled,
                ..Default::default()
            }),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &ProviderInfo {
        &self.info
    }

    /// Whether the probe can run on this machine
    pub async fn is_available(&self) -> bool {
        self.probe.is_available().await
    }

    /// Probe the source and record the outcome
    ///
    /// On success the snapshot is replaced and the error cleared. On failure
    /// the error is recorded and the previous snapshot kept. A call made while
    /// another refresh is in flight waits for it and returns its outcome
    /// instead of probing again.
    pub async fn refresh(&self) -> Result<UsageSnapshot, ProbeError> {
        let _gate = match self.refresh_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                log::debug!("[quota:{}] Refresh in flight, waiting for it", self.info.id);
                let _finished = self.refresh_gate.lock().await;
                return self.current_outcome();
            }
        };

        let _syncing = SyncingGuard::begin(&self.state);
        log::debug!("[quota:{}] Refreshing", self.info.id);

        match self.probe.probe().await {
            Ok(snapshot) => {
                let mut state = self.state.write();
                state.snapshot = Some(snapshot.clone());
                state.last_error = None;
                log::info!(
                    "[quota:{}] Refreshed {} quotas, status {}",
                    self.info.id,
                    snapshot.quotas.len(),
                    snapshot.overall_status()
                );
                Ok(snapshot)
            }
            Err(e) => {
                log::warn!("[quota:{}] Refresh failed: {}", self.info.id, e);
                self.state.write().last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn current_outcome(&self) -> Result<UsageSnapshot, ProbeError> {
        let state = self.state.read();
        match (&state.last_error, &state.snapshot) {
            (Some(error), _) => Err(error.clone()),
            (None, Some(snapshot)) => Ok(snapshot.clone()),
            (None, None) => Err(ProbeError::NoData),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.state.read().is_syncing
    }

    pub fn snapshot(&self) -> Option<UsageSnapshot> {
        self.state.read().snapshot.clone()
    }

    pub fn last_error(&self) -> Option<ProbeError> {
        self.state.read().last_error.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.read().is_enabled
    }

    /// Set and persist the enabled flag
    ///
    /// The in-memory flag is restored when persisting fails. Reselection and
    /// other follow-ups are the monitor's job.
    pub fn set_enabled(&self, enabled: bool) -> crate::Result<()> {
        let previous = std::mem::replace(&mut self.state.write().is_enabled, enabled);
        if let Err(err) = self.settings.set_enabled(&self.info.id, enabled) {
            log::warn!(
                "[quota:{}] Could not persist enabled={}: {}",
                self.info.id,
                enabled,
                err
            );
            self.state.write().is_enabled = previous;
            return Err(err);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Provider")
            .field("id", &self.info.id)
            .field("is_enabled", &state.is_enabled)
            .field("is_syncing", &state.is_syncing)
            .field("has_snapshot", &state.snapshot.is_some())
            .field("last_error", &state.last_error)
            .finish()
    }
}
