//! Watch command
//!
//! Runs the monitor's polling loop and prints each cycle until Ctrl-C.

use anyhow::Result;
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;

use super::status::collect_rows;
use super::Context;
use crate::output::{print_error, print_info, print_output, status_label};
use quotawatch_core::{MonitorConfig, MonitorEvent};

pub async fn execute(ctx: &Context, interval_secs: Option<u64>) -> Result<()> {
    let interval = match interval_secs {
        Some(secs) => MonitorConfig::with_interval(secs).interval(),
        None => ctx.config.interval(),
    };

    let monitor = ctx.monitor();
    let mut events = monitor.subscribe();
    monitor.start_monitoring(interval);
    print_info(
        &format!(
            "Watching {} providers every {}s (Ctrl-C to stop)",
            monitor.registry().enabled().len(),
            interval.as_secs()
        ),
        ctx.quiet,
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                print_info("Stopping...", ctx.quiet);
                break;
            }
            event = events.recv() => match event {
                Ok(MonitorEvent::RefreshAllCompleted) => {
                    let rows = collect_rows(&monitor, ctx.format, ctx.config.stale_after_secs, Utc::now());
                    print_output(&rows, ctx.format)?;
                }
                Ok(MonitorEvent::StatusChanged { provider_id, previous, current }) => {
                    print_info(
                        &format!(
                            "{}: {} -> {}",
                            provider_id,
                            status_label(previous, ctx.format),
                            status_label(current, ctx.format)
                        ),
                        ctx.quiet,
                    );
                }
                Ok(MonitorEvent::ProviderFailed { provider_id, error }) => {
                    print_error(&format!("{}: {}", provider_id, error));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("[quota:watch] Skipped {} monitor events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    monitor.stop_monitoring();
    Ok(())
}
