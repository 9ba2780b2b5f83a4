//! Parse Z.ai coding-plan quota limits
//!
//! The platform (international or China mainland) is detected from the
//! Claude settings file that routes Claude Code through Z.ai, then
//! `GET {base}/api/monitor/usage/quota/limit` returns:
//! ```json
//! { "code": 200, "success": true, "data": { "limits": [
//!     { "type": "TOKENS_LIMIT", "percentage": 73, "nextResetTime": 1772384400000 },
//!     { "type": "TIME_LIMIT", "percentage": 10, "currentValue": 100, "usage": 1000 }
//! ] } }
//! ```
//! `percentage` is the share already used.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::timestamp::FlexibleTimestamp;
use crate::services::quota::{ProbeError, Quota, QuotaType, UsageSnapshot};

// Whole host names only, so `biz.ai` is not taken for `z.ai`
static INTERNATIONAL_HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9.-])(?:[a-z0-9-]+\.)*z\.ai(?:[^a-z0-9.-]|$)").unwrap()
});
static CHINA_HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9.-])(?:[a-z0-9-]+\.)*bigmodel\.cn(?:[^a-z0-9.-]|$)").unwrap()
});

/// Which Z.ai deployment serves the account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZaiPlatform {
    International,
    ChinaMainland,
}

impl ZaiPlatform {
    pub fn base_url(&self) -> &'static str {
        match self {
            ZaiPlatform::International => "https://api.z.ai",
            ZaiPlatform::ChinaMainland => "https://open.bigmodel.cn",
        }
    }

    /// Recognise a platform from any URL-ish text
    pub fn from_text(text: &str) -> Option<Self> {
        if INTERNATIONAL_HOST_RE.is_match(text) {
            Some(ZaiPlatform::International)
        } else if CHINA_HOST_RE.is_match(text) {
            Some(ZaiPlatform::ChinaMainland)
        } else {
            None
        }
    }

    pub fn quota_url(&self) -> String {
        quota_url(self.base_url())
    }
}

/// Quota endpoint below a base URL
pub fn quota_url(base_url: &str) -> String {
    format!(
        "{}/api/monitor/usage/quota/limit",
        base_url.trim_end_matches('/')
    )
}

// ============================================================================
// Settings Detection
// ============================================================================

/// Detect the platform from the Claude settings JSON
///
/// Checked in order: `env.ANTHROPIC_BASE_URL`, each `providers[].baseUrl`,
/// then the raw text of the whole file. The first match wins.
pub fn detect_platform(settings_json: &str) -> Option<ZaiPlatform> {
    let parsed: Option<Value> = serde_json::from_str(settings_json).ok();

    if let Some(value) = &parsed {
        let from_env = value
            .get("env")
            .and_then(|env| env.get("ANTHROPIC_BASE_URL"))
            .and_then(Value::as_str)
            .and_then(ZaiPlatform::from_text);
        if from_env.is_some() {
            return from_env;
        }

        let from_providers = value
            .get("providers")
            .and_then(Value::as_array)
            .and_then(|providers| {
                providers.iter().find_map(|provider| {
                    provider
                        .get("baseUrl")
                        .or_else(|| provider.get("base_url"))
                        .and_then(Value::as_str)
                        .and_then(ZaiPlatform::from_text)
                })
            });
        if from_providers.is_some() {
            return from_providers;
        }
    }

    ZaiPlatform::from_text(settings_json)
}

/// `env.ANTHROPIC_AUTH_TOKEN` from the Claude settings JSON
pub fn extract_auth_token(settings_json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(settings_json).ok()?;
    value
        .get("env")?
        .get("ANTHROPIC_AUTH_TOKEN")?
        .as_str()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Quota Limits
// ============================================================================

#[derive(Debug, Deserialize)]
struct QuotaLimitResponse {
    code: Option<i64>,
    msg: Option<String>,
    success: Option<bool>,
    data: Option<QuotaLimitData>,
}

#[derive(Debug, Deserialize)]
struct QuotaLimitData {
    #[serde(default)]
    limits: Vec<LimitRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LimitRecord {
    #[serde(rename = "type")]
    limit_type: String,
    percentage: Option<f64>,
    next_reset_time: Option<FlexibleTimestamp>,
}

/// Parse the quota limit body
pub fn parse_quota_limits(
    provider_id: &str,
    body: &str,
    now: DateTime<Utc>,
) -> Result<UsageSnapshot, ProbeError> {
    let response: QuotaLimitResponse = serde_json::from_str(body)
        .map_err(|e| ProbeError::ParseFailed(format!("Invalid quota response: {}", e)))?;

    if response.success == Some(false) {
        let message = response.msg.unwrap_or_default();
        log::warn!("[quota:zai] API error {:?}: {}", response.code, message);
        return Err(match response.code {
            Some(401) | Some(403) => ProbeError::AuthenticationRequired,
            Some(429) => ProbeError::RateLimited,
            _ => ProbeError::ExecutionFailed(format!("Z.ai API error: {}", message)),
        });
    }

    let limits = response.data.map(|data| data.limits).unwrap_or_default();
    if limits.is_empty() {
        return Err(ProbeError::ParseFailed("Response has no limits".to_string()));
    }

    let mut quotas = Vec::new();
    for record in &limits {
        let quota_type = match record.limit_type.as_str() {
            "TOKENS_LIMIT" => QuotaType::Session,
            "TIME_LIMIT" => QuotaType::TimeLimit("MCP usage".to_string()),
            other => {
                log::debug!("[quota:zai] Skipping unknown limit type {}", other);
                continue;
            }
        };
        let Some(used) = record.percentage else {
            continue;
        };
        let resets_at = record
            .next_reset_time
            .as_ref()
            .and_then(FlexibleTimestamp::to_datetime);
        quotas.push(Quota::from_percent_used(provider_id, quota_type, used).with_optional_resets_at(resets_at));
    }

    if quotas.is_empty() {
        return Err(ProbeError::ParseFailed(format!(
            "No recognised limit among {} records",
            limits.len()
        )));
    }

    Ok(UsageSnapshot::new(provider_id, quotas).with_captured_at(now))
}
