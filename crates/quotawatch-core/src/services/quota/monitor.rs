//! Quota Monitor
//!
//! Orchestrates refreshes across the registry: one concurrent task per
//! enabled provider, status-transition detection after each success,
//! provider selection, and an optional polling loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::alert::Alerter;
use super::probe::ProbeError;
use super::provider::Provider;
use super::registry::ProviderRegistry;
use super::types::{Quota, QuotaStatus};
use crate::error::Result;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Change notifications for UI layers
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    ProviderRefreshed {
        provider_id: String,
        status: QuotaStatus,
    },
    ProviderFailed {
        provider_id: String,
        error: ProbeError,
    },
    StatusChanged {
        provider_id: String,
        previous: QuotaStatus,
        current: QuotaStatus,
    },
    SelectionChanged {
        provider_id: Option<String>,
    },
    RefreshAllCompleted,
}

struct PollingHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Resets the fan-out flag when `refresh_all` ends or is dropped
struct RefreshAllGuard<'a>(&'a AtomicBool);

impl Drop for RefreshAllGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct QuotaMonitor {
    registry: Arc<ProviderRegistry>,
    alerter: Arc<dyn Alerter>,
    /// Last seen overall status per provider
    previous_statuses: Mutex<HashMap<String, QuotaStatus>>,
    /// Always an enabled provider, or None when nothing is enabled
    selected_provider_id: RwLock<Option<String>>,
    refreshing_all: AtomicBool,
    polling: Mutex<Option<PollingHandle>>,
    events: broadcast::Sender<MonitorEvent>,
}

impl QuotaMonitor {
    pub fn new(registry: Arc<ProviderRegistry>, alerter: Arc<dyn Alerter>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let monitor = Self {
            registry,
            alerter,
            previous_statuses: Mutex::new(HashMap::new()),
            selected_provider_id: RwLock::new(None),
            refreshing_all: AtomicBool::new(false),
            polling: Mutex::new(None),
            events,
        };
        monitor.ensure_valid_selection();
        monitor
    }

    /// Providers under watch
    ///
    /// Use [`QuotaMonitor::remove_provider`] and
    /// [`QuotaMonitor::set_provider_enabled`] rather than mutating the
    /// registry directly, so the selection stays valid.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Receive change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refresh every enabled provider concurrently
    ///
    /// Never fails: errors are recorded on the provider that raised them.
    /// A call made while another fan-out is running returns immediately.
    pub async fn refresh_all(&self) {
        if self.refreshing_all.swap(true, Ordering::SeqCst) {
            log::debug!("[quota:monitor] Refresh already running, skipping");
            return;
        }
        let _guard = RefreshAllGuard(&self.refreshing_all);

        let providers = self.registry.enabled();
        log::debug!("[quota:monitor] Refreshing {} providers", providers.len());

        let results = join_all(providers.iter().map(|p| self.refresh_provider(p))).await;
        let refreshed = results.iter().filter(|ok| **ok).count();
        log::info!(
            "[quota:monitor] Refresh complete: {}/{} providers updated",
            refreshed,
            providers.len()
        );

        self.emit(MonitorEvent::RefreshAllCompleted);
    }

    /// Refresh one enabled provider; true when it produced a snapshot
    pub async fn refresh(&self, provider_id: &str) -> bool {
        match self.registry.get(provider_id) {
            Some(provider) if provider.is_enabled() => self.refresh_provider(&provider).await,
            Some(_) => {
                log::debug!("[quota:monitor] {} is disabled, not refreshing", provider_id);
                false
            }
            None => {
                log::warn!("[quota:monitor] Unknown provider '{}'", provider_id);
                false
            }
        }
    }

    /// Refresh every enabled provider except one
    pub async fn refresh_others(&self, except_provider_id: &str) {
        let providers: Vec<_> = self
            .registry
            .enabled()
            .into_iter()
            .filter(|p| p.id() != except_provider_id)
            .collect();
        join_all(providers.iter().map(|p| self.refresh_provider(p))).await;
    }

    async fn refresh_provider(&self, provider: &Arc<Provider>) -> bool {
        if !provider.is_available().await {
            log::debug!("[quota:{}] Not available, skipping", provider.id());
            return false;
        }

        match provider.refresh().await {
            Ok(snapshot) => {
                let status = snapshot.overall_status();
                self.record_status(provider.id(), status).await;
                self.emit(MonitorEvent::ProviderRefreshed {
                    provider_id: provider.id().to_string(),
                    status,
                });
                true
            }
            Err(error) => {
                self.emit(MonitorEvent::ProviderFailed {
                    provider_id: provider.id().to_string(),
                    error,
                });
                false
            }
        }
    }

    async fn record_status(&self, provider_id: &str, current: QuotaStatus) {
        let previous = self
            .previous_statuses
            .lock()
            .insert(provider_id.to_string(), current)
            .unwrap_or_default();

        if previous == current {
            return;
        }

        log::info!(
            "[quota:{}] Status changed: {} -> {}",
            provider_id,
            previous,
            current
        );
        self.emit(MonitorEvent::StatusChanged {
            provider_id: provider_id.to_string(),
            previous,
            current,
        });

        if let Err(e) = self.alerter.alert(provider_id, previous, current).await {
            log::warn!("[quota:{}] Failed to deliver alert: {}", provider_id, e);
        }
    }

    /// Last recorded overall status of a provider
    pub fn previous_status(&self, provider_id: &str) -> Option<QuotaStatus> {
        self.previous_statuses.lock().get(provider_id).copied()
    }

    // ========================================================================
    // Selection
    // ========================================================================

    pub fn selected_provider_id(&self) -> Option<String> {
        self.selected_provider_id.read().clone()
    }

    /// Select an enabled provider; false if it is unknown or disabled
    pub fn select_provider(&self, provider_id: &str) -> bool {
        let valid = self
            .registry
            .get(provider_id)
            .is_some_and(|p| p.is_enabled());
        if !valid {
            return false;
        }
        self.set_selection(Some(provider_id.to_string()));
        true
    }

    /// Enable or disable a provider, then repair the selection
    ///
    /// The selection is repaired even when persisting the flag fails.
    pub fn set_provider_enabled(&self, provider_id: &str, enabled: bool) -> Result<()> {
        let result = self.registry.set_enabled(provider_id, enabled);
        self.ensure_valid_selection();
        result
    }

    /// Unregister a provider, forget its last status and repair the selection
    pub fn remove_provider(&self, provider_id: &str) -> Option<Arc<Provider>> {
        let removed = self.registry.remove(provider_id)?;
        self.previous_statuses.lock().remove(provider_id);
        self.ensure_valid_selection();
        log::info!("[quota:monitor] Removed provider {}", provider_id);
        Some(removed)
    }

    /// Reassign the selection to the first enabled provider if it is invalid
    fn ensure_valid_selection(&self) {
        let enabled = self.registry.enabled();
        let current = self.selected_provider_id();
        let still_valid = current
            .as_deref()
            .is_some_and(|id| enabled.iter().any(|p| p.id() == id));
        if still_valid {
            return;
        }
        self.set_selection(enabled.first().map(|p| p.id().to_string()));
    }

    fn set_selection(&self, provider_id: Option<String>) {
        {
            let mut selected = self.selected_provider_id.write();
            if *selected == provider_id {
                return;
            }
            *selected = provider_id.clone();
        }
        log::debug!("[quota:monitor] Selected provider: {:?}", provider_id);
        self.emit(MonitorEvent::SelectionChanged { provider_id });
    }

    // ========================================================================
    // Continuous monitoring
    // ========================================================================

    /// Refresh everything now and then every `interval` until stopped
    ///
    /// Replaces any loop already running. Must be called within a Tokio
    /// runtime.
    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) {
        self.stop_monitoring();

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let monitor: Weak<Self> = Arc::downgrade(self);

        log::info!(
            "[quota:monitor] Starting monitoring with {}s interval",
            interval.as_secs()
        );

        let task = tokio::spawn(async move {
            loop {
                let Some(this) = monitor.upgrade() else {
                    break;
                };
                this.refresh_all().await;
                drop(this);

                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        log::info!("[quota:monitor] Monitoring stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        *self.polling.lock() = Some(PollingHandle { shutdown_tx, task });
    }

    /// Stop the polling loop; an in-flight refresh is allowed to finish
    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.polling.lock().take() {
            let _ = handle.shutdown_tx.send(());
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.polling
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    /// Quota with the least remaining across enabled providers
    pub fn lowest_quota(&self) -> Option<Quota> {
        self.registry
            .enabled()
            .iter()
            .filter_map(|p| p.snapshot())
            .filter_map(|s| s.lowest_quota().cloned())
            .min_by(|a, b| a.percent_remaining().total_cmp(&b.percent_remaining()))
    }

    /// Most severe status across enabled providers, Healthy without data
    pub fn overall_status(&self) -> QuotaStatus {
        self.registry
            .enabled()
            .iter()
            .filter_map(|p| p.snapshot())
            .map(|s| s.overall_status())
            .max()
            .unwrap_or_default()
    }

    /// True while any provider is syncing
    pub fn is_refreshing(&self) -> bool {
        self.registry.all().iter().any(|p| p.is_syncing())
    }
}

impl Drop for QuotaMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quota::{LogAlerter, Probe, ProviderInfo, QuotaType, UsageSnapshot};
    use crate::settings::JsonSettingsStore;
    use async_trait::async_trait;

    struct FixedProbe {
        available: bool,
        percent: f64,
    }

    #[async_trait]
    impl Probe for FixedProbe {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn probe(&self) -> std::result::Result<UsageSnapshot, ProbeError> {
            Ok(UsageSnapshot::new(
                "fixed",
                vec![Quota::new("fixed", QuotaType::Session, self.percent)],
            ))
        }
    }

    fn monitor(entries: &[(&str, bool, bool, f64)]) -> QuotaMonitor {
        let settings = Arc::new(JsonSettingsStore::in_memory());
        let registry = Arc::new(ProviderRegistry::new());
        for (id, enabled, available, percent) in entries {
            let probe = Arc::new(FixedProbe {
                available: *available,
                percent: *percent,
            });
            registry
                .add(Provider::new(
                    ProviderInfo::new(*id, *id, *id),
                    probe,
                    settings.clone(),
                    *enabled,
                ))
                .unwrap();
        }
        QuotaMonitor::new(registry, Arc::new(LogAlerter))
    }

    #[test]
    fn test_initial_selection_is_first_enabled() {
        let monitor = monitor(&[("a", false, true, 90.0), ("b", true, true, 90.0), ("c", true, true, 90.0)]);
        assert_eq!(monitor.selected_provider_id().as_deref(), Some("b"));
    }

    #[test]
    fn test_no_enabled_providers_means_no_selection() {
        let monitor = monitor(&[("a", false, true, 90.0)]);
        assert_eq!(monitor.selected_provider_id(), None);
        assert_eq!(monitor.overall_status(), QuotaStatus::Healthy);
        assert!(monitor.lowest_quota().is_none());
    }

    #[test]
    fn test_select_provider_rejects_disabled() {
        let monitor = monitor(&[("a", true, true, 90.0), ("b", false, true, 90.0)]);
        assert!(!monitor.select_provider("b"));
        assert!(!monitor.select_provider("zzz"));
        assert_eq!(monitor.selected_provider_id().as_deref(), Some("a"));
    }

    #[test]
    fn test_enabling_fills_empty_selection() {
        let monitor = monitor(&[("a", false, true, 90.0)]);
        monitor.set_provider_enabled("a", true).unwrap();
        assert_eq!(monitor.selected_provider_id().as_deref(), Some("a"));
        assert!(monitor.set_provider_enabled("zzz", true).is_err());
    }

    #[test]
    fn test_failed_persist_keeps_flag_and_selection() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("blocker"), "").unwrap();
        let settings = Arc::new(
            JsonSettingsStore::open(dir.path().join("blocker").join("settings.json")).unwrap(),
        );

        let registry = Arc::new(ProviderRegistry::new());
        for id in ["a", "b"] {
            let probe = Arc::new(FixedProbe {
                available: true,
                percent: 90.0,
            });
            registry
                .add(Provider::new(
                    ProviderInfo::new(id, id, id),
                    probe,
                    settings.clone(),
                    true,
                ))
                .unwrap();
        }
        let monitor = QuotaMonitor::new(registry, Arc::new(LogAlerter));
        assert_eq!(monitor.selected_provider_id().as_deref(), Some("a"));

        assert!(monitor.set_provider_enabled("a", false).is_err());
        assert!(monitor.registry().get("a").unwrap().is_enabled());

        let selected = monitor.selected_provider_id().unwrap();
        assert!(monitor.registry().get(&selected).unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_remove_selected_provider_reselects() {
        let monitor = monitor(&[("a", true, true, 40.0), ("b", true, true, 90.0)]);
        monitor.refresh_all().await;
        assert_eq!(monitor.selected_provider_id().as_deref(), Some("a"));
        let mut events = monitor.subscribe();

        let removed = monitor.remove_provider("a").unwrap();
        assert_eq!(removed.id(), "a");
        assert!(monitor.registry().get("a").is_none());
        assert_eq!(monitor.selected_provider_id().as_deref(), Some("b"));
        assert_eq!(monitor.previous_status("a"), None);
        assert_eq!(monitor.previous_status("b"), Some(QuotaStatus::Healthy));
        assert_eq!(
            events.try_recv().unwrap(),
            MonitorEvent::SelectionChanged {
                provider_id: Some("b".to_string())
            }
        );

        assert!(monitor.remove_provider("a").is_none());
        monitor.remove_provider("b");
        assert_eq!(monitor.selected_provider_id(), None);
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_skipped() {
        let monitor = monitor(&[("a", true, false, 10.0), ("b", true, true, 30.0)]);
        monitor.refresh_all().await;

        let registry = monitor.registry();
        assert!(registry.get("a").unwrap().snapshot().is_none());
        assert!(registry.get("a").unwrap().last_error().is_none());
        assert_eq!(monitor.previous_status("a"), None);
        assert_eq!(monitor.previous_status("b"), Some(QuotaStatus::Warning));
    }

    #[tokio::test]
    async fn test_aggregates_ignore_disabled_providers() {
        let monitor = monitor(&[("a", true, true, 60.0), ("b", true, true, 15.0)]);
        monitor.refresh_all().await;
        assert_eq!(monitor.overall_status(), QuotaStatus::Critical);
        assert_eq!(monitor.lowest_quota().unwrap().percent_remaining(), 15.0);

        monitor.set_provider_enabled("b", false).unwrap();
        assert_eq!(monitor.overall_status(), QuotaStatus::Healthy);
        assert_eq!(monitor.lowest_quota().unwrap().percent_remaining(), 60.0);
    }

    #[tokio::test]
    async fn test_refresh_single_and_others() {
        let monitor = monitor(&[("a", true, true, 60.0), ("b", true, true, 40.0), ("c", false, true, 5.0)]);

        assert!(monitor.refresh("a").await);
        assert!(!monitor.refresh("c").await);
        assert!(!monitor.refresh("zzz").await);
        assert!(monitor.registry().get("b").unwrap().snapshot().is_none());

        monitor.refresh_others("a").await;
        assert!(monitor.registry().get("b").unwrap().snapshot().is_some());
        assert!(monitor.registry().get("c").unwrap().snapshot().is_none());
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let monitor = monitor(&[("a", true, true, 40.0)]);
        let mut events = monitor.subscribe();

        monitor.refresh_all().await;

        assert_eq!(
            events.recv().await.unwrap(),
            MonitorEvent::StatusChanged {
                provider_id: "a".into(),
                previous: QuotaStatus::Healthy,
                current: QuotaStatus::Warning,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            MonitorEvent::ProviderRefreshed {
                provider_id: "a".into(),
                status: QuotaStatus::Warning,
            }
        );
        assert_eq!(events.recv().await.unwrap(), MonitorEvent::RefreshAllCompleted);
    }
}
