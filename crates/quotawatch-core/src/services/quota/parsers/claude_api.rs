//! Parse Anthropic's OAuth usage API response
//!
//! `GET https://api.anthropic.com/api/oauth/usage`:
//! ```json
//! {
//!   "five_hour": { "utilization": 28.0, "resets_at": "2026-03-01T17:00:00Z" },
//!   "seven_day": { "utilization": 61.0, "resets_at": "2026-03-05T00:00:00Z" },
//!   "seven_day_opus": null,
//!   "extra_usage": { "is_enabled": true, "used_credits": 15.5, "monthly_limit": 100.0 }
//! }
//! ```
//!
//! `utilization` is the percentage already used.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::timestamp::FlexibleTimestamp;
use crate::services::quota::{AccountInfo, CostUsage, ProbeError, Quota, QuotaType, UsageSnapshot};

#[derive(Debug, Deserialize)]
struct OAuthUsageResponse {
    /// 5-hour rolling window
    five_hour: Option<UsageWindow>,
    /// 7-day rolling window (all models)
    seven_day: Option<UsageWindow>,
    seven_day_opus: Option<UsageWindow>,
    seven_day_sonnet: Option<UsageWindow>,
    /// Pay-as-you-go credits
    extra_usage: Option<ExtraUsage>,
}

#[derive(Debug, Deserialize)]
struct UsageWindow {
    utilization: Option<f64>,
    resets_at: Option<FlexibleTimestamp>,
}

#[derive(Debug, Deserialize)]
struct ExtraUsage {
    is_enabled: Option<bool>,
    used_credits: Option<f64>,
    monthly_limit: Option<f64>,
    currency: Option<String>,
}

/// Parse the usage response body
///
/// `plan` is the subscription type recorded next to the OAuth token.
pub fn parse_oauth_usage(
    provider_id: &str,
    body: &str,
    plan: Option<&str>,
    now: DateTime<Utc>,
) -> Result<UsageSnapshot, ProbeError> {
    let response: OAuthUsageResponse = serde_json::from_str(body).map_err(|e| {
        log::error!("[quota:claude] Failed to parse API response: {}", e);
        ProbeError::ParseFailed(format!("Invalid usage response: {}", e))
    })?;

    let windows = [
        (response.five_hour, QuotaType::Session),
        (response.seven_day, QuotaType::Weekly),
        (response.seven_day_opus, QuotaType::ModelSpecific("Opus".to_string())),
        (response.seven_day_sonnet, QuotaType::ModelSpecific("Sonnet".to_string())),
    ];

    let quotas: Vec<Quota> = windows
        .into_iter()
        .filter_map(|(window, quota_type)| {
            let window = window?;
            let used = window.utilization?;
            Some(
                Quota::from_percent_used(provider_id, quota_type, used).with_optional_resets_at(
                    window.resets_at.as_ref().and_then(FlexibleTimestamp::to_datetime),
                ),
            )
        })
        .collect();

    let cost_usage = response
        .extra_usage
        .filter(|extra| extra.is_enabled == Some(true))
        .and_then(|extra| {
            let spent = extra.used_credits?;
            Some(CostUsage {
                spent: Some(spent),
                limit: extra.monthly_limit,
                currency: extra.currency.unwrap_or_else(|| "USD".to_string()),
                ..Default::default()
            })
        });

    if quotas.is_empty() && cost_usage.is_none() {
        return Err(ProbeError::ParseFailed(
            "Usage response contained no utilization windows".to_string(),
        ));
    }

    log::debug!("[quota:claude] Parsed {} usage windows", quotas.len());

    let mut snapshot = UsageSnapshot::new(provider_id, quotas).with_captured_at(now);
    if let Some(plan) = plan {
        snapshot = snapshot.with_account(AccountInfo::with_plan(plan));
    }
    if let Some(cost) = cost_usage {
        snapshot = snapshot.with_cost_usage(cost);
    }
    Ok(snapshot)
}
