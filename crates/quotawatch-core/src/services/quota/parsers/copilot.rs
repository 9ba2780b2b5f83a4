//! Parse GitHub Copilot's internal user endpoint
//!
//! `GET https://api.github.com/copilot_internal/user`:
//! ```json
//! {
//!   "copilot_plan": "individual",
//!   "quota_reset_date": "2026-04-01",
//!   "quota_snapshots": {
//!     "premium_interactions": { "entitlement": 300, "remaining": 120, "percent_remaining": 40.0, "unlimited": false },
//!     "chat": { "unlimited": true },
//!     "completions": { "unlimited": true }
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::timestamp::parse_timestamp_str;
use crate::services::quota::{AccountInfo, ProbeError, Quota, QuotaType, UsageSnapshot};

#[derive(Debug, Deserialize)]
struct CopilotUserResponse {
    copilot_plan: Option<String>,
    quota_reset_date: Option<String>,
    quota_snapshots: Option<QuotaSnapshots>,
}

#[derive(Debug, Deserialize)]
struct QuotaSnapshots {
    premium_interactions: Option<QuotaEntry>,
    chat: Option<QuotaEntry>,
    completions: Option<QuotaEntry>,
}

#[derive(Debug, Deserialize)]
struct QuotaEntry {
    entitlement: Option<f64>,
    remaining: Option<f64>,
    percent_remaining: Option<f64>,
    #[serde(default)]
    unlimited: bool,
}

impl QuotaEntry {
    fn percent_remaining(&self) -> Option<f64> {
        if let Some(percent) = self.percent_remaining {
            return Some(percent);
        }
        match (self.remaining, self.entitlement) {
            (Some(remaining), Some(entitlement)) if entitlement > 0.0 => {
                Some(remaining / entitlement * 100.0)
            }
            _ => None,
        }
    }
}

/// Parse the user endpoint body
pub fn parse_copilot_user(
    provider_id: &str,
    body: &str,
    now: DateTime<Utc>,
) -> Result<UsageSnapshot, ProbeError> {
    let response: CopilotUserResponse = serde_json::from_str(body)
        .map_err(|e| ProbeError::ParseFailed(format!("Invalid Copilot response: {}", e)))?;

    let Some(snapshots) = response.quota_snapshots else {
        return Err(ProbeError::ParseFailed(
            "Copilot response has no quota_snapshots".to_string(),
        ));
    };

    let resets_at = response
        .quota_reset_date
        .as_deref()
        .and_then(parse_timestamp_str);

    let entries = [
        (
            snapshots.premium_interactions,
            QuotaType::TimeLimit("Premium requests".to_string()),
        ),
        (snapshots.chat, QuotaType::ModelSpecific("Chat".to_string())),
        (
            snapshots.completions,
            QuotaType::ModelSpecific("Completions".to_string()),
        ),
    ];

    let mut saw_entry = false;
    let mut quotas = Vec::new();
    for (entry, quota_type) in entries {
        let Some(entry) = entry else { continue };
        saw_entry = true;
        if entry.unlimited {
            continue;
        }
        let Some(percent) = entry.percent_remaining() else {
            continue;
        };
        quotas.push(Quota::new(provider_id, quota_type, percent).with_optional_resets_at(resets_at));
    }

    // An all-unlimited plan yields an empty snapshot, not an error
    if !saw_entry {
        return Err(ProbeError::ParseFailed(
            "Copilot response has no recognised quota snapshots".to_string(),
        ));
    }

    let mut snapshot = UsageSnapshot::new(provider_id, quotas).with_captured_at(now);
    if let Some(plan) = response.copilot_plan {
        snapshot = snapshot.with_account(AccountInfo::with_plan(plan));
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quota::QuotaStatus;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_copilot_user() {
        let body = r#"{
            "copilot_plan": "individual",
            "quota_reset_date": "2026-04-01",
            "quota_snapshots": {
                "premium_interactions": { "entitlement": 300, "remaining": 45, "percent_remaining": 15.0, "unlimited": false },
                "chat": { "unlimited": true },
                "completions": { "unlimited": true }
            }
        }"#;

        let snapshot = parse_copilot_user("copilot", body, now()).unwrap();
        assert_eq!(snapshot.quotas.len(), 1);

        let premium = &snapshot.quotas[0];
        assert_eq!(
            premium.quota_type(),
            &QuotaType::TimeLimit("Premium requests".into())
        );
        assert_eq!(premium.percent_remaining(), 15.0);
        assert_eq!(premium.status(), QuotaStatus::Critical);
        assert_eq!(
            premium.resets_at(),
            Some(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(snapshot.account.unwrap().plan.as_deref(), Some("individual"));
    }

    #[test]
    fn test_percent_from_entitlement() {
        let body = r#"{
            "quota_snapshots": {
                "chat": { "entitlement": 50, "remaining": 25 },
                "completions": { "entitlement": 2000, "remaining": 2000 }
            }
        }"#;
        let snapshot = parse_copilot_user("copilot", body, now()).unwrap();
        assert_eq!(snapshot.quotas.len(), 2);
        assert_eq!(snapshot.quotas[0].quota_type(), &QuotaType::ModelSpecific("Chat".into()));
        assert_eq!(snapshot.quotas[0].percent_remaining(), 50.0);
        assert_eq!(snapshot.quotas[1].percent_remaining(), 100.0);
        assert!(snapshot.quotas[0].resets_at().is_none());
    }

    #[test]
    fn test_all_unlimited_is_empty_snapshot() {
        let body = r#"{ "quota_snapshots": { "chat": { "unlimited": true } } }"#;
        let snapshot = parse_copilot_user("copilot", body, now()).unwrap();
        assert!(snapshot.quotas.is_empty());
        assert_eq!(snapshot.overall_status(), QuotaStatus::Healthy);
    }

    #[test]
    fn test_missing_snapshots_fail() {
        assert!(matches!(
            parse_copilot_user("copilot", r#"{ "copilot_plan": "free" }"#, now()),
            Err(ProbeError::ParseFailed(_))
        ));
        assert!(matches!(
            parse_copilot_user("copilot", r#"{ "quota_snapshots": {} }"#, now()),
            Err(ProbeError::ParseFailed(_))
        ));
    }
}
