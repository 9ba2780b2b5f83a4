//! Parse the Gemini Code Assist quota API
//!
//! `POST https://cloudcode-pa.googleapis.com/v1internal:retrieveUserQuota`
//! returns one bucket per model and token type:
//! ```json
//! { "buckets": [
//!     { "modelId": "gemini-2.5-pro", "tokenType": "REQUESTS",
//!       "remainingFraction": 0.87, "resetTime": "2026-03-02T00:00:00Z" }
//! ] }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::timestamp::parse_timestamp_str;
use crate::services::quota::{AccountInfo, ProbeError, Quota, QuotaType, UsageSnapshot};

#[derive(Debug, Deserialize)]
struct QuotaResponse {
    #[serde(default)]
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketInfo {
    model_id: Option<String>,
    remaining_fraction: Option<f64>,
    reset_time: Option<String>,
}

/// Result of `v1internal:loadCodeAssist`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeAssistInfo {
    pub project_id: Option<String>,
    pub tier: Option<String>,
}

/// Parse a `retrieveUserQuota` body
///
/// Buckets are grouped by model and the lowest remaining fraction wins.
pub fn parse_quota_buckets(
    provider_id: &str,
    body: &str,
    now: DateTime<Utc>,
) -> Result<UsageSnapshot, ProbeError> {
    let response: QuotaResponse = serde_json::from_str(body)
        .map_err(|e| ProbeError::ParseFailed(format!("Invalid quota response: {}", e)))?;

    // model -> (fraction, reset)
    let mut per_model: BTreeMap<String, (f64, Option<DateTime<Utc>>)> = BTreeMap::new();
    for bucket in response.buckets {
        let (Some(model), Some(fraction)) = (bucket.model_id, bucket.remaining_fraction) else {
            continue;
        };
        let reset = bucket.reset_time.as_deref().and_then(parse_timestamp_str);
        per_model
            .entry(model)
            .and_modify(|entry| {
                if fraction < entry.0 {
                    *entry = (fraction, reset);
                }
            })
            .or_insert((fraction, reset));
    }

    if per_model.is_empty() {
        return Err(ProbeError::ParseFailed(
            "Quota response contained no usable buckets".to_string(),
        ));
    }

    let quotas = per_model
        .into_iter()
        .map(|(model, (fraction, reset))| {
            Quota::new(provider_id, QuotaType::ModelSpecific(model), fraction * 100.0)
                .with_optional_resets_at(reset)
        })
        .collect();

    Ok(UsageSnapshot::new(provider_id, quotas).with_captured_at(now))
}

/// Parse a `loadCodeAssist` body
///
/// `cloudaicompanionProject` arrives either as a plain id or as `{ "id": ... }`.
pub fn parse_load_code_assist(body: &str) -> Result<CodeAssistInfo, ProbeError> {
    let value: Value = serde_json::from_str(body)?;

    let project_id = match value.get("cloudaicompanionProject") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Object(project)) => project
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        _ => None,
    };

    let tier = value
        .get("currentTier")
        .and_then(|tier| tier.get("name").or_else(|| tier.get("id")))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(CodeAssistInfo { project_id, tier })
}

impl CodeAssistInfo {
    /// Account metadata for the snapshot, if a tier is known
    pub fn account(&self) -> Option<AccountInfo> {
        self.tier.as_deref().map(AccountInfo::with_plan)
    }
}
