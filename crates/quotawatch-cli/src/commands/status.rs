//! Status and refresh commands
//!
//! Refresh providers and print one row per quota.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{print_error, print_info, print_output, status_label, OutputFormat};
use quotawatch_core::{Provider, QuotaMonitor, UsageSnapshot};

/// Quota row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct QuotaRow {
    #[tabled(rename = "Provider")]
    pub provider: String,
    #[tabled(rename = "Quota")]
    pub quota: String,
    #[tabled(rename = "Remaining")]
    pub remaining: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Resets")]
    pub resets: String,
    /// Last refresh failure; tables list errors below the rows instead
    #[tabled(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn execute(ctx: &Context) -> Result<()> {
    let monitor = ctx.monitor();
    print_info("Refreshing providers...", ctx.quiet || ctx.format == OutputFormat::Json);
    monitor.refresh_all().await;
    print_status(ctx, &monitor)
}

/// Refresh `provider_id` first, then every other enabled provider
pub async fn refresh(ctx: &Context, provider_id: &str) -> Result<()> {
    let monitor = ctx.monitor();
    let Some(provider) = monitor.registry().get(provider_id) else {
        bail!(
            "Unknown provider '{}'. Known providers: {}",
            provider_id,
            monitor.registry().ids().join(", ")
        );
    };
    if !provider.is_enabled() {
        bail!(
            "Provider '{}' is disabled. Enable it with 'quotawatch providers enable {}'",
            provider_id,
            provider_id
        );
    }

    monitor.select_provider(provider_id);
    if !monitor.refresh(provider_id).await && provider.last_error().is_none() {
        print_info(
            &format!("{} is not available on this machine", provider.name()),
            ctx.quiet,
        );
    }
    monitor.refresh_others(provider_id).await;
    print_status(ctx, &monitor)
}

fn print_status(ctx: &Context, monitor: &QuotaMonitor) -> Result<()> {
    let rows = collect_rows(monitor, ctx.format, ctx.config.stale_after_secs, Utc::now());
    print_output(&rows, ctx.format)?;

    if ctx.format == OutputFormat::Table {
        print_info(
            &format!(
                "Overall: {}",
                status_label(monitor.overall_status(), ctx.format)
            ),
            ctx.quiet,
        );
        for provider in monitor.registry().enabled() {
            if let Some(error) = provider.last_error() {
                print_error(&format!("{}: {}", provider.name(), error));
            }
        }
    }
    Ok(())
}

/// Rows for every enabled provider, selected provider first
pub fn collect_rows(
    monitor: &QuotaMonitor,
    format: OutputFormat,
    stale_after_secs: u64,
    now: DateTime<Utc>,
) -> Vec<QuotaRow> {
    let mut providers = monitor.registry().enabled();
    if let Some(selected) = monitor.selected_provider_id() {
        providers.sort_by_key(|p| p.id() != selected);
    }

    let mut rows = Vec::new();
    for provider in providers {
        let error = provider.last_error().map(|e| e.to_string());
        match provider.snapshot() {
            Some(snapshot) => rows.extend(snapshot_rows(
                &provider,
                &snapshot,
                error,
                format,
                stale_after_secs,
                now,
            )),
            None => {
                if let Some(error) = error {
                    rows.push(QuotaRow {
                        provider: provider.name().to_string(),
                        quota: "-".to_string(),
                        remaining: "-".to_string(),
                        status: format!("error: {}", error),
                        resets: "-".to_string(),
                        error: Some(error),
                    });
                }
            }
        }
    }
    rows
}

fn snapshot_rows(
    provider: &Provider,
    snapshot: &UsageSnapshot,
    error: Option<String>,
    format: OutputFormat,
    stale_after_secs: u64,
    now: DateTime<Utc>,
) -> Vec<QuotaRow> {
    let stale = snapshot.age_at(now).num_seconds() > stale_after_secs as i64;
    let name = if stale {
        format!("{} (stale)", provider.name())
    } else {
        provider.name().to_string()
    };

    snapshot
        .quotas
        .iter()
        .map(|quota| QuotaRow {
            provider: name.clone(),
            quota: quota.quota_type().display_name(),
            remaining: format!("{:.0}%", quota.percent_remaining()),
            status: status_label(quota.status(), format),
            resets: match (quota.resets_at(), quota.reset_text()) {
                (Some(at), _) => format_reset(at, now),
                (None, Some(text)) => text.to_string(),
                (None, None) => "-".to_string(),
            },
            error: error.clone(),
        })
        .collect()
}

/// "in 2h 5m" style countdown
fn format_reset(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = at - now;
    if remaining.num_seconds() <= 0 {
        return "now".to_string();
    }
    let days = remaining.num_days();
    let hours = remaining.num_hours() % 24;
    let minutes = remaining.num_minutes() % 60;
    if days > 0 {
        format!("in {}d {}h", days, hours)
    } else if hours > 0 {
        format!("in {}h {}m", hours, minutes)
    } else {
        format!("in {}m", minutes.max(1))
    }
}
