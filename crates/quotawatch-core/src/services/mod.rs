//! Services module

pub mod quota;

pub use quota::{
    default_registry, Alerter, DegradationAlerter, LogAlerter, MonitorEvent, Probe, ProbeError,
    Provider, ProviderRegistry, QuotaMonitor,
};
