//! Parse Codex rate limits
//!
//! Two sources: the `account/rateLimits/read` JSON-RPC result of
//! `codex app-server`, and the `/status` card of the interactive CLI:
//! ```text
//! 5h limit:     [████████████░░░░░░░░] 72% left (resets 14:00)
//! Weekly limit: [██████░░░░░░░░░░░░░░] 31% left (resets 09:00 on 5 Mar)
//! Credits:      120 credits
//! ```

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::text::{
    classify_error, find_label, find_labeled_percent, find_reset_text, label_positions,
    parse_reset_duration, strip_ansi, window_until_next_label,
};
use super::timestamp::FlexibleTimestamp;
use crate::services::quota::{
    AccountInfo, CostUsage, ProbeError, Quota, QuotaType, UsageSnapshot,
};

const LIMIT_LABELS: &[(&str, QuotaType)] = &[
    ("5h limit", QuotaType::Session),
    ("Weekly limit", QuotaType::Weekly),
];

/// Lines that start a new section of the `/status` card
const SECTION_LABELS: &[&str] = &["5h limit", "Weekly limit", "Credits:", "Account:"];

static CREDITS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)credits:\s*([\d,]+(?:\.\d+)?)\s*credits").unwrap());
static ACCOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)account:\s*([^\s()]+@[^\s()]+)(?:\s*\(([^)]+)\))?").unwrap()
});

// ============================================================================
// JSON-RPC
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitsResult {
    rate_limits: Option<RateLimitSnapshot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitSnapshot {
    primary: Option<RateLimitWindow>,
    secondary: Option<RateLimitWindow>,
    credits: Option<CreditsSnapshot>,
    #[serde(alias = "plan_type")]
    plan_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitWindow {
    #[serde(alias = "used_percent")]
    used_percent: Option<f64>,
    #[serde(alias = "window_minutes", alias = "windowMinutes")]
    window_duration_mins: Option<i64>,
    #[serde(alias = "resets_at")]
    resets_at: Option<FlexibleTimestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreditsSnapshot {
    #[serde(alias = "has_credits")]
    has_credits: Option<bool>,
    unlimited: Option<bool>,
    /// Sent as a string
    balance: Option<Value>,
}

/// Unwrap a JSON-RPC response into its `result`, mapping `error` objects
pub fn parse_rpc_response(response: &Value) -> Result<&Value, ProbeError> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        log::warn!("[quota:codex] RPC error: {}", message);
        return Err(match classify_error(&message) {
            Some(ProbeError::AuthenticationRequired) => ProbeError::AuthenticationRequired,
            Some(ProbeError::UpdateRequired) => ProbeError::UpdateRequired,
            _ if message.to_lowercase().contains("login") => ProbeError::AuthenticationRequired,
            Some(other) => other,
            None => ProbeError::ExecutionFailed(message),
        });
    }

    response
        .get("result")
        .ok_or_else(|| ProbeError::ParseFailed("RPC response has no result".to_string()))
}

/// Parse an `account/rateLimits/read` result
pub fn parse_rate_limits(
    provider_id: &str,
    result: &Value,
    now: DateTime<Utc>,
) -> Result<UsageSnapshot, ProbeError> {
    let wrapped: RateLimitsResult = serde_json::from_value(result.clone())?;
    let snapshot: RateLimitSnapshot = match wrapped.rate_limits {
        Some(inner) => inner,
        None => serde_json::from_value(result.clone())?,
    };

    let mut quotas = Vec::new();
    for (window, quota_type) in [
        (&snapshot.primary, QuotaType::Session),
        (&snapshot.secondary, QuotaType::Weekly),
    ] {
        let Some(window) = window else { continue };
        let Some(used) = window.used_percent else { continue };
        let resets_at = window.resets_at.as_ref().and_then(FlexibleTimestamp::to_datetime);
        quotas.push(
            Quota::from_percent_used(provider_id, quota_type, used)
                .with_optional_resets_at(resets_at)
                .with_reset_text(window_label(window.window_duration_mins).unwrap_or_default()),
        );
    }

    let cost_usage = snapshot.credits.as_ref().and_then(credits_to_cost);

    if quotas.is_empty() && cost_usage.is_none() {
        return Err(ProbeError::ParseFailed(
            "Rate limit snapshot has no windows".to_string(),
        ));
    }

    let mut usage = UsageSnapshot::new(provider_id, quotas).with_captured_at(now);
    if let Some(plan) = snapshot.plan_type {
        usage = usage.with_account(AccountInfo::with_plan(plan));
    }
    if let Some(cost) = cost_usage {
        usage = usage.with_cost_usage(cost);
    }
    Ok(usage)
}

fn credits_to_cost(credits: &CreditsSnapshot) -> Option<CostUsage> {
    if credits.has_credits != Some(true) || credits.unlimited == Some(true) {
        return None;
    }
    let balance = match credits.balance.as_ref()? {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    Some(CostUsage {
        balance: Some(balance),
        currency: "credits".to_string(),
        ..Default::default()
    })
}

/// "5h window" / "7d window" description of a window length
fn window_label(minutes: Option<i64>) -> Option<String> {
    let minutes = minutes.filter(|m| *m > 0)?;
    let text = if minutes % 1440 == 0 {
        format!("{}d window", minutes / 1440)
    } else if minutes % 60 == 0 {
        format!("{}h window", minutes / 60)
    } else {
        format!("{}m window", minutes)
    };
    Some(text)
}

// ============================================================================
// /status text
// ============================================================================

/// Parse the `/status` card of the interactive CLI
pub fn parse_status_output(
    provider_id: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Result<UsageSnapshot, ProbeError> {
    let clean = strip_ansi(text);
    if let Some(err) = classify_error(&clean) {
        return Err(err);
    }

    let lines: Vec<&str> = clean.lines().collect();
    let mut quotas = Vec::new();

    let label_lines = label_positions(&lines, SECTION_LABELS.iter().copied());

    // Narrow terminals wrap the bar onto the lines below its label
    for (label, quota_type) in LIMIT_LABELS {
        let Some(start) = find_label(&lines, label) else {
            continue;
        };
        let window = window_until_next_label(&label_lines, start);
        let Some(found) = find_labeled_percent(&lines[start..], label, window) else {
            log::debug!("[quota:codex] '{}' has no percentage", label);
            continue;
        };
        let mut quota = Quota::new(provider_id, quota_type.clone(), found.percent_remaining);
        if let Some(reset) = find_reset_text(&lines, start + found.line, window - found.line) {
            quota = quota
                .with_optional_resets_at(parse_reset_duration(&reset, now))
                .with_reset_text(reset);
        }
        quotas.push(quota);
    }

    if quotas.is_empty() {
        return Err(ProbeError::ParseFailed(
            "No rate limits found in /status output".to_string(),
        ));
    }

    let mut snapshot = UsageSnapshot::new(provider_id, quotas).with_captured_at(now);

    if let Some(caps) = ACCOUNT_RE.captures(&clean) {
        snapshot = snapshot.with_account(AccountInfo {
            email: caps.get(1).map(|m| m.as_str().to_string()),
            plan: caps.get(2).map(|m| m.as_str().trim().to_string()),
            ..Default::default()
        });
    }

    if let Some(balance) = CREDITS_RE
        .captures(&clean)
        .and_then(|caps| caps.get(1)?.as_str().replace(',', "").parse::<f64>().ok())
    {
        snapshot = snapshot.with_cost_usage(CostUsage {
            balance: Some(balance),
            currency: "credits".to_string(),
            ..Default::default()
        });
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_rate_limits() {
        let result = json!({
            "rateLimits": {
                "primary": { "usedPercent": 28.0, "windowDurationMins": 300, "resetsAt": 1772384400 },
                "secondary": { "usedPercent": 69.0, "windowDurationMins": 10080, "resetsAt": "2026-03-05T00:00:00Z" },
                "credits": { "hasCredits": true, "unlimited": false, "balance": "120" },
                "planType": "plus"
            }
        });

        let snapshot = parse_rate_limits("codex", &result, now()).unwrap();
        assert_eq!(snapshot.quotas.len(), 2);

        let session = &snapshot.quotas[0];
        assert_eq!(session.quota_type(), &QuotaType::Session);
        assert_eq!(session.percent_remaining(), 72.0);
        assert_eq!(
            session.resets_at(),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 17, 0, 0).unwrap())
        );
        assert_eq!(session.reset_text(), Some("5h window"));

        let weekly = &snapshot.quotas[1];
        assert_eq!(weekly.quota_type(), &QuotaType::Weekly);
        assert_eq!(weekly.percent_remaining(), 31.0);
        assert_eq!(weekly.reset_text(), Some("7d window"));

        assert_eq!(snapshot.cost_usage.unwrap().balance, Some(120.0));
        assert_eq!(snapshot.account.unwrap().plan.as_deref(), Some("plus"));
    }

    #[test]
    fn test_parse_rate_limits_unwrapped_snake_case() {
        let result = json!({
            "primary": { "used_percent": 10.0, "window_minutes": 300, "resets_at": "1772384400" }
        });
        let snapshot = parse_rate_limits("codex", &result, now()).unwrap();
        assert_eq!(snapshot.quotas.len(), 1);
        assert_eq!(snapshot.quotas[0].percent_remaining(), 90.0);
        assert!(snapshot.quotas[0].resets_at().is_some());
    }

    #[test]
    fn test_unlimited_credits_are_not_cost() {
        let result = json!({
            "rateLimits": {
                "primary": { "usedPercent": 5.0 },
                "credits": { "hasCredits": true, "unlimited": true, "balance": null }
            }
        });
        let snapshot = parse_rate_limits("codex", &result, now()).unwrap();
        assert!(snapshot.cost_usage.is_none());
    }

    #[test]
    fn test_empty_rate_limits_fail() {
        let result = json!({ "rateLimits": {} });
        assert!(matches!(
            parse_rate_limits("codex", &result, now()),
            Err(ProbeError::ParseFailed(_))
        ));
    }

    #[test]
    fn test_rpc_error_mapping() {
        let response = json!({ "id": 2, "error": { "code": -32600, "message": "Not logged in. Run codex login." } });
        assert_eq!(
            parse_rpc_response(&response),
            Err(ProbeError::AuthenticationRequired)
        );

        let response = json!({ "id": 2, "error": { "code": -32601, "message": "method not found" } });
        assert_eq!(
            parse_rpc_response(&response),
            Err(ProbeError::ExecutionFailed("method not found".into()))
        );

        let response = json!({ "id": 2, "error": { "message": "codex login required" } });
        assert_eq!(
            parse_rpc_response(&response),
            Err(ProbeError::AuthenticationRequired)
        );
    }

    #[test]
    fn test_rpc_result() {
        let response = json!({ "id": 2, "result": { "ok": true } });
        assert_eq!(parse_rpc_response(&response).unwrap()["ok"], true);

        let response = json!({ "id": 2 });
        assert!(matches!(
            parse_rpc_response(&response),
            Err(ProbeError::ParseFailed(_))
        ));
    }

    #[test]
    fn test_parse_status_output() {
        let text = "\
  Account:      dev@example.com (Plus)

  5h limit:     [████████████░░░░░░░░] 72% left (resets 14:00)
  Weekly limit: [██████░░░░░░░░░░░░░░] 31% left (resets in 3d 4h)
  Credits:      120 credits
";
        let snapshot = parse_status_output("codex", text, now()).unwrap();
        assert_eq!(snapshot.quotas.len(), 2);
        assert_eq!(snapshot.quotas[0].quota_type(), &QuotaType::Session);
        assert_eq!(snapshot.quotas[0].percent_remaining(), 72.0);
        assert_eq!(snapshot.quotas[0].reset_text(), Some("resets 14:00"));
        assert_eq!(snapshot.quotas[0].resets_at(), None);

        assert_eq!(snapshot.quotas[1].percent_remaining(), 31.0);
        assert_eq!(
            snapshot.quotas[1].resets_at(),
            Some(now() + chrono::Duration::days(3) + chrono::Duration::hours(4))
        );

        let account = snapshot.account.unwrap();
        assert_eq!(account.email.as_deref(), Some("dev@example.com"));
        assert_eq!(account.plan.as_deref(), Some("Plus"));
        assert_eq!(snapshot.cost_usage.unwrap().balance, Some(120.0));
    }

    #[test]
    fn test_parse_wrapped_status_output() {
        let text = "5h limit:\n  [████░░] 72% left\nWeekly limit:\n  [██░░] 72% used\n  resets in 2h\n";
        let snapshot = parse_status_output("codex", text, now()).unwrap();
        assert_eq!(snapshot.quotas.len(), 2);

        assert_eq!(snapshot.quotas[0].quota_type(), &QuotaType::Session);
        assert_eq!(snapshot.quotas[0].percent_remaining(), 72.0);
        assert_eq!(snapshot.quotas[0].reset_text(), None);

        assert_eq!(snapshot.quotas[1].quota_type(), &QuotaType::Weekly);
        assert_eq!(snapshot.quotas[1].percent_remaining(), 28.0);
        assert_eq!(
            snapshot.quotas[1].resets_at(),
            Some(now() + chrono::Duration::hours(2))
        );
    }

    #[test]
    fn test_limit_without_percent_does_not_borrow_next_limit() {
        let text = "5h limit:\n  loading\nWeekly limit: 40% left\n";
        let snapshot = parse_status_output("codex", text, now()).unwrap();
        assert_eq!(snapshot.quotas.len(), 1);
        assert_eq!(snapshot.quotas[0].quota_type(), &QuotaType::Weekly);
        assert_eq!(snapshot.quotas[0].percent_remaining(), 40.0);
    }

    #[test]
    fn test_status_output_errors() {
        assert_eq!(
            parse_status_output("codex", "Not logged in", now()),
            Err(ProbeError::AuthenticationRequired)
        );
        assert!(matches!(
            parse_status_output("codex", "Model: gpt-5", now()),
            Err(ProbeError::ParseFailed(_))
        ));
    }
}
