//! Status-transition alerting
//!
//! The monitor hands every status change to an [`Alerter`]. Whether a change
//! is worth telling a human about is the alerter's decision; the wrappers
//! here implement the common policies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use super::types::QuotaStatus;
use crate::config::MonitorConfig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlertError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    #[error("Alert channel closed")]
    ChannelClosed,
}

/// One provider moving from one status to another
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub provider_id: String,
    pub previous: QuotaStatus,
    pub current: QuotaStatus,
    pub at: DateTime<Utc>,
}

impl StatusTransition {
    pub fn new(provider_id: impl Into<String>, previous: QuotaStatus, current: QuotaStatus) -> Self {
        Self {
            provider_id: provider_id.into(),
            previous,
            current,
            at: Utc::now(),
        }
    }

    pub fn is_degradation(&self) -> bool {
        self.current.is_worse_than(self.previous)
    }
}

/// Receives status transitions from the monitor
///
/// Errors are logged by the caller and never stop monitoring.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(
        &self,
        provider_id: &str,
        previous: QuotaStatus,
        current: QuotaStatus,
    ) -> Result<(), AlertError>;
}

/// Writes every transition to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn alert(
        &self,
        provider_id: &str,
        previous: QuotaStatus,
        current: QuotaStatus,
    ) -> Result<(), AlertError> {
        if current.is_worse_than(previous) {
            log::warn!(
                "[quota:alert] {} quota is now {} (was {})",
                provider_id,
                current.label(),
                previous.label()
            );
        } else {
            log::info!(
                "[quota:alert] {} quota recovered to {} (was {})",
                provider_id,
                current.label(),
                previous.label()
            );
        }
        Ok(())
    }
}

/// Filters transitions by direction and severity before delegating
///
/// Degradations pass when the new status reaches `floor`. Recoveries pass
/// only when `degrade_only` is off and the provider is recovering from a
/// status at or above `floor`.
#[derive(Debug, Clone)]
pub struct DegradationAlerter<A> {
    inner: A,
    floor: QuotaStatus,
    degrade_only: bool,
}

impl<A: Alerter> DegradationAlerter<A> {
    pub fn new(inner: A, floor: QuotaStatus, degrade_only: bool) -> Self {
        Self {
            inner,
            floor,
            degrade_only,
        }
    }

    pub fn from_config(inner: A, config: &MonitorConfig) -> Self {
        Self::new(inner, config.alert_floor, config.degrade_only)
    }

    fn should_forward(&self, previous: QuotaStatus, current: QuotaStatus) -> bool {
        if current.is_worse_than(previous) {
            current >= self.floor
        } else if previous.is_worse_than(current) {
            !self.degrade_only && previous >= self.floor
        } else {
            false
        }
    }
}

#[async_trait]
impl<A: Alerter> Alerter for DegradationAlerter<A> {
    async fn alert(
        &self,
        provider_id: &str,
        previous: QuotaStatus,
        current: QuotaStatus,
    ) -> Result<(), AlertError> {
        if !self.should_forward(previous, current) {
            log::debug!(
                "[quota:alert] Ignoring {} transition {} -> {}",
                provider_id,
                previous,
                current
            );
            return Ok(());
        }
        self.inner.alert(provider_id, previous, current).await
    }
}

/// Forwards transitions into a channel for a UI to deliver
#[derive(Debug, Clone)]
pub struct ChannelAlerter {
    tx: mpsc::UnboundedSender<StatusTransition>,
}

impl ChannelAlerter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusTransition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Alerter for ChannelAlerter {
    async fn alert(
        &self,
        provider_id: &str,
        previous: QuotaStatus,
        current: QuotaStatus,
    ) -> Result<(), AlertError> {
        self.tx
            .send(StatusTransition::new(provider_id, previous, current))
            .map_err(|_| AlertError::ChannelClosed)
    }
}
