//! Integration tests for the quota monitor: fan-out, alerting, selection and polling

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use quotawatch_core::services::quota::{Alerter, AlertError, ProbeError, Provider, ProviderInfo};
use quotawatch_core::{
    JsonSettingsStore, Quota, QuotaMonitor, QuotaStatus, QuotaType, SettingsRepository,
    ProviderRegistry, UsageSnapshot,
};

/// Probe that replays scripted results, then repeats the last one
struct ScriptedProbe {
    id: String,
    script: Mutex<VecDeque<Result<f64, ProbeError>>>,
    last: Mutex<Option<Result<f64, ProbeError>>>,
    calls: AtomicU32,
    delay: Duration,
}

impl ScriptedProbe {
    fn new(id: &str, script: Vec<Result<f64, ProbeError>>) -> Self {
        Self {
            id: id.to_string(),
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl quotawatch_core::Probe for ScriptedProbe {
    async fn is_available(&self) -> bool {
        true
    }

    async fn probe(&self) -> Result<UsageSnapshot, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().pop_front();
        let result = match next {
            Some(result) => {
                *self.last.lock() = Some(result.clone());
                result
            }
            None => self.last.lock().clone().unwrap_or(Err(ProbeError::NoData)),
        };

        result.map(|percent| {
            UsageSnapshot::new(
                self.id.clone(),
                vec![Quota::new(self.id.clone(), QuotaType::Session, percent)],
            )
        })
    }
}

/// Alerter that records every call
#[derive(Default)]
struct RecordingAlerter {
    calls: Mutex<Vec<(String, QuotaStatus, QuotaStatus)>>,
    fail: bool,
}

impl RecordingAlerter {
    fn calls(&self) -> Vec<(String, QuotaStatus, QuotaStatus)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn alert(
        &self,
        provider_id: &str,
        previous: QuotaStatus,
        current: QuotaStatus,
    ) -> Result<(), AlertError> {
        self.calls
            .lock()
            .push((provider_id.to_string(), previous, current));
        if self.fail {
            return Err(AlertError::Delivery("notification center unavailable".into()));
        }
        Ok(())
    }
}

struct Fixture {
    settings: Arc<JsonSettingsStore>,
    registry: Arc<ProviderRegistry>,
    alerter: Arc<RecordingAlerter>,
    probes: Vec<Arc<ScriptedProbe>>,
}

impl Fixture {
    fn new(alerter: RecordingAlerter) -> Self {
        Self {
            settings: Arc::new(JsonSettingsStore::in_memory()),
            registry: Arc::new(ProviderRegistry::new()),
            alerter: Arc::new(alerter),
            probes: Vec::new(),
        }
    }

    fn add(&mut self, probe: ScriptedProbe, enabled: bool) -> &mut Self {
        let probe = Arc::new(probe);
        let id = probe.id.clone();
        self.registry
            .add(Provider::new(
                ProviderInfo::new(id.clone(), id.to_uppercase(), id),
                probe.clone(),
                self.settings.clone(),
                enabled,
            ))
            .expect("Failed to register provider");
        self.probes.push(probe);
        self
    }

    fn monitor(&self) -> Arc<QuotaMonitor> {
        Arc::new(QuotaMonitor::new(self.registry.clone(), self.alerter.clone()))
    }
}

#[tokio::test]
async fn test_partial_failure_is_isolated() {
    let mut fixture = Fixture::new(RecordingAlerter::default());
    fixture
        .add(ScriptedProbe::new("a", vec![Ok(80.0)]), true)
        .add(
            ScriptedProbe::new("b", vec![Ok(70.0), Err(ProbeError::Timeout)]),
            true,
        );
    let monitor = fixture.monitor();

    monitor.refresh_all().await;
    monitor.refresh_all().await;

    let a = fixture.registry.get("a").unwrap();
    let b = fixture.registry.get("b").unwrap();
    assert_eq!(a.snapshot().unwrap().quotas[0].percent_remaining(), 80.0);
    assert!(a.last_error().is_none());
    assert_eq!(b.last_error(), Some(ProbeError::Timeout));
    assert_eq!(b.snapshot().unwrap().quotas[0].percent_remaining(), 70.0);
    assert!(!monitor.is_refreshing());
}

#[tokio::test]
async fn test_alert_fires_once_per_transition() {
    let mut fixture = Fixture::new(RecordingAlerter::default());
    fixture.add(
        ScriptedProbe::new("claude", vec![Ok(90.0), Ok(35.0), Ok(30.0)]),
        true,
    );
    let monitor = fixture.monitor();

    monitor.refresh_all().await;
    assert!(fixture.alerter.calls().is_empty());

    monitor.refresh_all().await;
    monitor.refresh_all().await;
    assert_eq!(
        fixture.alerter.calls(),
        vec![("claude".to_string(), QuotaStatus::Healthy, QuotaStatus::Warning)]
    );
    assert_eq!(monitor.previous_status("claude"), Some(QuotaStatus::Warning));
}

#[tokio::test]
async fn test_first_refresh_compares_against_healthy() {
    let mut fixture = Fixture::new(RecordingAlerter::default());
    fixture.add(ScriptedProbe::new("codex", vec![Ok(0.0)]), true);
    let monitor = fixture.monitor();

    monitor.refresh_all().await;
    assert_eq!(
        fixture.alerter.calls(),
        vec![("codex".to_string(), QuotaStatus::Healthy, QuotaStatus::Depleted)]
    );
}

#[tokio::test]
async fn test_failing_alerter_does_not_stop_monitoring() {
    let mut fixture = Fixture::new(RecordingAlerter {
        fail: true,
        ..Default::default()
    });
    fixture.add(ScriptedProbe::new("a", vec![Ok(10.0), Ok(60.0)]), true);
    let monitor = fixture.monitor();

    monitor.refresh_all().await;
    monitor.refresh_all().await;

    assert_eq!(fixture.alerter.calls().len(), 2);
    assert_eq!(monitor.previous_status("a"), Some(QuotaStatus::Healthy));
}

#[tokio::test]
async fn test_failed_refresh_does_not_alert() {
    let mut fixture = Fixture::new(RecordingAlerter::default());
    fixture.add(
        ScriptedProbe::new("a", vec![Ok(40.0), Err(ProbeError::RateLimited)]),
        true,
    );
    let monitor = fixture.monitor();

    monitor.refresh_all().await;
    monitor.refresh_all().await;
    assert_eq!(fixture.alerter.calls().len(), 1);
    assert_eq!(monitor.previous_status("a"), Some(QuotaStatus::Warning));
}

#[tokio::test]
async fn test_disabling_selected_provider_reselects_first_enabled() {
    let mut fixture = Fixture::new(RecordingAlerter::default());
    fixture
        .add(ScriptedProbe::new("a", vec![]), true)
        .add(ScriptedProbe::new("b", vec![]), true)
        .add(ScriptedProbe::new("c", vec![]), true);
    let monitor = fixture.monitor();

    assert!(monitor.select_provider("b"));
    monitor.set_provider_enabled("b", false).unwrap();
    assert_eq!(monitor.selected_provider_id().as_deref(), Some("a"));
    assert!(!fixture.settings.is_enabled("b", true));

    // Disabling a provider that is not selected leaves the selection alone
    monitor.set_provider_enabled("c", false).unwrap();
    assert_eq!(monitor.selected_provider_id().as_deref(), Some("a"));

    monitor.set_provider_enabled("a", false).unwrap();
    assert_eq!(monitor.selected_provider_id(), None);
}

#[tokio::test]
async fn test_disabled_providers_are_not_refreshed() {
    let mut fixture = Fixture::new(RecordingAlerter::default());
    fixture
        .add(ScriptedProbe::new("a", vec![Ok(50.0)]), true)
        .add(ScriptedProbe::new("b", vec![Ok(50.0)]), false);
    let monitor = fixture.monitor();

    monitor.refresh_all().await;
    assert_eq!(fixture.probes[0].calls(), 1);
    assert_eq!(fixture.probes[1].calls(), 0);
}

#[tokio::test]
async fn test_overlapping_refresh_all_coalesces() {
    let mut fixture = Fixture::new(RecordingAlerter::default());
    fixture.add(
        ScriptedProbe::new("a", vec![Ok(50.0)]).with_delay(Duration::from_millis(100)),
        true,
    );
    let monitor = fixture.monitor();

    let background = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.refresh_all().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(monitor.is_refreshing());

    // Returns at once while the first fan-out is still running
    monitor.refresh_all().await;
    assert!(monitor.is_refreshing());

    background.await.unwrap();
    assert_eq!(fixture.probes[0].calls(), 1);
    assert!(!monitor.is_refreshing());
}

#[tokio::test]
async fn test_refresh_selected_then_others() {
    let mut fixture = Fixture::new(RecordingAlerter::default());
    fixture
        .add(ScriptedProbe::new("a", vec![Ok(50.0)]), true)
        .add(
            ScriptedProbe::new("b", vec![Ok(45.0)]).with_delay(Duration::from_millis(50)),
            true,
        );
    let monitor = fixture.monitor();

    // A manual refresh of "b" joins the one already running in the fan-out
    let (single, _) = tokio::join!(monitor.refresh("b"), monitor.refresh_others("a"));
    assert!(single);
    assert_eq!(fixture.probes[0].calls(), 0);
    assert_eq!(fixture.probes[1].calls(), 1);
}

#[tokio::test]
async fn test_polling_refreshes_until_stopped() {
    let mut fixture = Fixture::new(RecordingAlerter::default());
    fixture.add(ScriptedProbe::new("a", vec![Ok(50.0)]), true);
    let monitor = fixture.monitor();

    monitor.start_monitoring(Duration::from_millis(20));
    assert!(monitor.is_monitoring());
    tokio::time::sleep(Duration::from_millis(110)).await;

    monitor.stop_monitoring();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!monitor.is_monitoring());

    let calls = fixture.probes[0].calls();
    assert!(calls >= 2, "expected repeated refreshes, got {}", calls);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fixture.probes[0].calls(), calls);
}

#[tokio::test]
async fn test_restarting_monitoring_replaces_loop() {
    let mut fixture = Fixture::new(RecordingAlerter::default());
    fixture.add(ScriptedProbe::new("a", vec![Ok(50.0)]), true);
    let monitor = fixture.monitor();

    monitor.start_monitoring(Duration::from_secs(3600));
    tokio::time::sleep(Duration::from_millis(20)).await;
    monitor.start_monitoring(Duration::from_secs(3600));
    tokio::time::sleep(Duration::from_millis(20)).await;

    // One immediate refresh per start, and no second loop left behind
    assert_eq!(fixture.probes[0].calls(), 2);
    assert!(monitor.is_monitoring());
    monitor.stop_monitoring();
}
