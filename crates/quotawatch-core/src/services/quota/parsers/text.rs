//! Shared helpers for parsing CLI text output
//!
//! Every text parser strips terminal control sequences first, classifies
//! known error messages before looking for numbers, and anchors quota
//! extraction on a label followed by a bounded window of lines.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::services::quota::ProbeError;

/// Lines scanned after a label when looking for its percentage
pub const LABEL_WINDOW: usize = 12;

static OSC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").unwrap());
static CSI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());
static ESC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b[@-_]").unwrap());

static PERCENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:\.\d+)?)\s*%\s*(left|used|remaining)").unwrap()
});

static DAYS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:d|days?)\b").unwrap());
static HOURS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:h|hrs?|hours?)\b").unwrap());
static MINUTES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:m|mins?|minutes?)\b").unwrap());

// ============================================================================
// Cleanup
// ============================================================================

/// Remove ANSI escape sequences and normalize line endings
pub fn strip_ansi(input: &str) -> String {
    let without_osc = OSC_RE.replace_all(input, "");
    let without_csi = CSI_RE.replace_all(&without_osc, "");
    let without_esc = ESC_RE.replace_all(&without_csi, "");

    without_esc
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect()
}

/// Drop everything up to and including the last line that shows one of the
/// given prompts, so an already answered prompt is not mistaken for an error
pub fn trim_answered_prompts<'a>(text: &'a str, prompts: &[&str]) -> &'a str {
    let lower = text.to_ascii_lowercase();
    let cut = prompts
        .iter()
        .filter_map(|prompt| lower.rfind(&prompt.to_ascii_lowercase()))
        .max();

    match cut {
        Some(index) => match text[index..].find('\n') {
            Some(newline) => &text[index + newline + 1..],
            None => "",
        },
        None => text,
    }
}

// ============================================================================
// Error Classification
// ============================================================================

const UPDATE_MARKERS: &[&str] = &[
    "update required",
    "please update",
    "needs to be updated",
    "upgrade required",
    "no longer supported",
];

const AUTH_MARKERS: &[&str] = &[
    "not logged in",
    "please log in",
    "please run /login",
    "login required",
    "invalid api key",
    "authentication_error",
    "oauth token has expired",
];

const TRUST_MARKERS: &[&str] = &["do you trust the files in this folder", "trust this folder"];

const RATE_LIMIT_MARKERS: &[&str] = &["rate limited", "rate limit exceeded", "too many requests"];

const NOT_READY_MARKERS: &[&str] = &[
    "no usage data",
    "data not available yet",
    "usage data is not ready",
];

/// Map a known error message in the output to its probe error
///
/// Checked in priority order: update, authentication, folder trust, rate
/// limiting, data not ready.
pub fn classify_error(text: &str) -> Option<ProbeError> {
    let lower = text.to_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if contains_any(UPDATE_MARKERS) {
        Some(ProbeError::UpdateRequired)
    } else if contains_any(AUTH_MARKERS) {
        Some(ProbeError::AuthenticationRequired)
    } else if contains_any(TRUST_MARKERS) {
        Some(ProbeError::FolderTrustRequired)
    } else if contains_any(RATE_LIMIT_MARKERS) {
        Some(ProbeError::RateLimited)
    } else if contains_any(NOT_READY_MARKERS) {
        Some(ProbeError::NoData)
    } else {
        None
    }
}

// ============================================================================
// Percentages
// ============================================================================

/// Remaining percentage from a line like `35% left` or `72% used`
pub fn extract_percent(line: &str) -> Option<f64> {
    let caps = PERCENT_RE.captures(line)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let kind = caps.get(2)?.as_str().to_ascii_lowercase();

    if kind == "used" {
        Some(100.0 - value)
    } else {
        Some(value)
    }
}

/// A percentage found under a label
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledPercent {
    pub percent_remaining: f64,
    /// Index of the line holding the percentage
    pub line: usize,
}

/// Find `label` and return the first percentage within `window` lines of it
pub fn find_labeled_percent(lines: &[&str], label: &str, window: usize) -> Option<LabeledPercent> {
    let needle = label.to_lowercase();
    let start = lines
        .iter()
        .position(|line| line.to_lowercase().contains(&needle))?;
    let end = (start + window + 1).min(lines.len());

    (start..end).find_map(|index| {
        extract_percent(lines[index]).map(|percent_remaining| LabeledPercent {
            percent_remaining,
            line: index,
        })
    })
}

/// Index of the first line containing `label`, case-insensitively
pub fn find_label(lines: &[&str], label: &str) -> Option<usize> {
    let needle = label.to_lowercase();
    lines
        .iter()
        .position(|line| line.to_lowercase().contains(&needle))
}

/// Sorted line indices of every label present in `lines`
pub fn label_positions<'a>(lines: &[&str], labels: impl IntoIterator<Item = &'a str>) -> Vec<usize> {
    let mut positions: Vec<usize> = labels
        .into_iter()
        .filter_map(|label| find_label(lines, label))
        .collect();
    positions.sort_unstable();
    positions
}

/// A block ends where the next label starts, and never spans more than
/// [`LABEL_WINDOW`] lines
pub fn window_until_next_label(label_lines: &[usize], start: usize) -> usize {
    label_lines
        .iter()
        .find(|pos| **pos > start)
        .map(|next| (next - start - 1).min(LABEL_WINDOW))
        .unwrap_or(LABEL_WINDOW)
}

/// First `Resets ...` line after `from`, stopping at the next percentage line
pub fn find_reset_text(lines: &[&str], from: usize, window: usize) -> Option<String> {
    let inline = lines.get(from).and_then(|line| inline_reset(line));
    if inline.is_some() {
        return inline;
    }

    let end = (from + window + 1).min(lines.len());
    for line in lines.iter().take(end).skip(from + 1) {
        if extract_percent(line).is_some() {
            return None;
        }
        if let Some(text) = inline_reset(line) {
            return Some(text);
        }
    }
    None
}

fn inline_reset(line: &str) -> Option<String> {
    let index = line.to_ascii_lowercase().find("resets")?;
    let mut text = line[index..].trim();
    // "(resets 14:00)" closes a parenthesis opened before the match
    if line[..index].trim_end().ends_with('(') {
        text = text.strip_suffix(')').unwrap_or(text);
    }
    Some(text.trim().to_string())
}

// ============================================================================
// Reset Times
// ============================================================================

/// Absolute reset time from relative components (`2d 3h 15m`)
///
/// Returns `None` when no day, hour or minute component is present.
pub fn parse_reset_duration(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let days = sum_components(&DAYS_RE, text);
    let hours = sum_components(&HOURS_RE, text);
    let minutes = sum_components(&MINUTES_RE, text);

    if days.is_none() && hours.is_none() && minutes.is_none() {
        return None;
    }

    // Countdowns too large to represent yield no reset time
    let total = Duration::try_days(days.unwrap_or(Some(0))?)?
        .checked_add(&Duration::try_hours(hours.unwrap_or(Some(0))?)?)?
        .checked_add(&Duration::try_minutes(minutes.unwrap_or(Some(0))?)?)?;
    now.checked_add_signed(total)
}

/// `None` when the component is absent, `Some(None)` when its sum overflows
fn sum_components(re: &Regex, text: &str) -> Option<Option<i64>> {
    let mut matched = false;
    let mut total: Option<i64> = Some(0);
    for caps in re.captures_iter(text) {
        matched = true;
        let value = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok());
        total = match (total, value) {
            (Some(sum), Some(value)) => sum.checked_add(value),
            _ => None,
        };
    }
    matched.then_some(total)
}
