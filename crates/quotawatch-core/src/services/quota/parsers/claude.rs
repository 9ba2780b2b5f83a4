//! Parse Claude Code `/usage` and `/cost` output.
//!
//! Expected `/usage` format (each meter block):
//! ```text
//!   Current session
//!   ████████████████████████████████████               72% used
//!   Resets 1am (Asia/Tokyo)
//!
//!   Current week (all models)
//!   ███████████▌                                       23% used
//!   Resets Mar 3, 12am (Asia/Tokyo)
//!
//!   Extra usage
//!   ██████████████████████▏                            44% used
//!   $22.22 / $50.00 spent · Resets Mar 1 (Asia/Tokyo)
//! ```
//!
//! API-billed accounts have no `/usage` meters; `/cost` reports spend instead:
//! ```text
//! Total cost:            $0.55
//! Total duration (API):  6m 19.7s
//! Total duration (wall): 6h 33m 10.2s
//! ```

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::text::{
    classify_error, find_label, find_labeled_percent, find_reset_text, label_positions,
    parse_reset_duration, strip_ansi, window_until_next_label,
};
use crate::services::quota::{CostUsage, ProbeError, Quota, QuotaType, UsageSnapshot};

/// Meter labels and the quota type each one produces
const METERS: &[(&str, Meter)] = &[
    ("Current session", Meter::Session),
    ("Current week (all models)", Meter::Weekly),
    ("Current week (Opus", Meter::Model("Opus")),
    ("Current week (Sonnet", Meter::Model("Sonnet")),
];

const EXTRA_USAGE_LABEL: &str = "Extra usage";

const SUBSCRIPTION_ONLY_MARKERS: &[&str] = &[
    "only available for subscription",
    "only available to subscription",
    "only available for claude.ai subscribers",
];

static SPENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\s*([\d,]+(?:\.\d+)?)\s*/\s*\$\s*([\d,]+(?:\.\d+)?)\s*spent").unwrap()
});
static TOTAL_COST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)total cost:\s*\$\s*([\d,]+(?:\.\d+)?)").unwrap());
static API_DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)total duration \(api\):\s*(.+)").unwrap());
static WALL_DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)total duration \(wall\):\s*(.+)").unwrap());

#[derive(Debug, Clone, Copy)]
enum Meter {
    Session,
    Weekly,
    Model(&'static str),
}

impl Meter {
    fn quota_type(&self) -> QuotaType {
        match self {
            Meter::Session => QuotaType::Session,
            Meter::Weekly => QuotaType::Weekly,
            Meter::Model(name) => QuotaType::ModelSpecific((*name).to_string()),
        }
    }
}

/// True when `/usage` refused because the account is not on a subscription
pub fn is_subscription_only_notice(text: &str) -> bool {
    let lower = strip_ansi(text).to_lowercase();
    SUBSCRIPTION_ONLY_MARKERS.iter().any(|m| lower.contains(m))
}

/// Parse `/usage` output into a snapshot
pub fn parse_usage_output(
    provider_id: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Result<UsageSnapshot, ProbeError> {
    let clean = strip_ansi(text);
    if let Some(err) = classify_error(&clean) {
        return Err(err);
    }

    let lines: Vec<&str> = clean.lines().collect();
    let label_lines = meter_label_positions(&lines);
    let mut quotas = Vec::new();

    for (label, meter) in METERS {
        let Some(start) = find_label(&lines, label) else {
            continue;
        };
        let window = window_until_next_label(&label_lines, start);
        let Some(found) = find_labeled_percent(&lines[start..], label, window) else {
            log::debug!("[quota:claude] '{}' has no percentage", label);
            continue;
        };
        let percent_line = start + found.line;

        let mut quota = Quota::new(provider_id, meter.quota_type(), found.percent_remaining);
        if let Some(reset) = find_reset_text(&lines, percent_line, window) {
            quota = quota
                .with_optional_resets_at(parse_reset_duration(&reset, now))
                .with_reset_text(reset);
        }
        quotas.push(quota);
    }

    let cost_usage = parse_extra_usage(&lines, &label_lines);

    if quotas.is_empty() && cost_usage.is_none() {
        return Err(ProbeError::ParseFailed(
            "No quota meters found in /usage output".to_string(),
        ));
    }

    let mut snapshot = UsageSnapshot::new(provider_id, quotas).with_captured_at(now);
    if let Some(cost) = cost_usage {
        snapshot = snapshot.with_cost_usage(cost);
    }
    Ok(snapshot)
}

/// Parse `/cost` output into a snapshot with no quotas and a spend record
pub fn parse_cost_output(
    provider_id: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Result<UsageSnapshot, ProbeError> {
    let clean = strip_ansi(text);
    if let Some(err) = classify_error(&clean) {
        return Err(err);
    }

    let spent = TOTAL_COST_RE
        .captures(&clean)
        .and_then(|caps| parse_amount(caps.get(1)?.as_str()))
        .ok_or_else(|| ProbeError::ParseFailed("No total cost in /cost output".to_string()))?;

    let capture_line = |re: &Regex| {
        re.captures(&clean)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    };

    let cost = CostUsage {
        api_duration: capture_line(&API_DURATION_RE),
        wall_duration: capture_line(&WALL_DURATION_RE),
        ..CostUsage::usd(spent)
    };

    Ok(UsageSnapshot::new(provider_id, Vec::new())
        .with_captured_at(now)
        .with_cost_usage(cost))
}

fn parse_extra_usage(lines: &[&str], label_lines: &[usize]) -> Option<CostUsage> {
    let start = find_label(lines, EXTRA_USAGE_LABEL)?;
    let window = window_until_next_label(label_lines, start);
    let end = (start + window + 1).min(lines.len());

    lines[start..end].iter().find_map(|line| {
        let caps = SPENT_RE.captures(line)?;
        let spent = parse_amount(caps.get(1)?.as_str())?;
        let limit = parse_amount(caps.get(2)?.as_str())?;
        Some(CostUsage {
            limit: Some(limit),
            ..CostUsage::usd(spent)
        })
    })
}

fn parse_amount(text: &str) -> Option<f64> {
    text.replace(',', "").parse().ok()
}

fn meter_label_positions(lines: &[&str]) -> Vec<usize> {
    label_positions(
        lines,
        METERS
            .iter()
            .map(|(label, _)| *label)
            .chain(std::iter::once(EXTRA_USAGE_LABEL)),
    )
}
