//! Quota tracking types
//!
//! Value types shared by every parser, probe and the monitor. Derived values
//! (`status`, `overall_status`, `lowest_quota`, staleness) are computed on read,
//! never stored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Age after which a snapshot counts as stale
pub const STALE_AFTER_SECS: i64 = 300;

// ============================================================================
// Status
// ============================================================================

/// Four-level health classification of a quota
///
/// Ordered by severity: `Healthy < Warning < Critical < Depleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaStatus {
    /// 50% or more remaining
    Healthy,
    /// 20% up to 50% remaining
    Warning,
    /// Above 0% and below 20% remaining
    Critical,
    /// Nothing left
    Depleted,
}

impl QuotaStatus {
    /// Classify a remaining percentage
    pub fn from_percent_remaining(percent_remaining: f64) -> Self {
        if percent_remaining <= 0.0 {
            QuotaStatus::Depleted
        } else if percent_remaining < 20.0 {
            QuotaStatus::Critical
        } else if percent_remaining < 50.0 {
            QuotaStatus::Warning
        } else {
            QuotaStatus::Healthy
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            QuotaStatus::Healthy => "Healthy",
            QuotaStatus::Warning => "Warning",
            QuotaStatus::Critical => "Critical",
            QuotaStatus::Depleted => "Depleted",
        }
    }

    /// True when `self` is more severe than `other`
    pub fn is_worse_than(&self, other: QuotaStatus) -> bool {
        *self > other
    }
}

impl Default for QuotaStatus {
    fn default() -> Self {
        QuotaStatus::Healthy
    }
}

impl std::fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaStatus::Healthy => write!(f, "healthy"),
            QuotaStatus::Warning => write!(f, "warning"),
            QuotaStatus::Critical => write!(f, "critical"),
            QuotaStatus::Depleted => write!(f, "depleted"),
        }
    }
}

impl std::str::FromStr for QuotaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "healthy" | "ok" => Ok(QuotaStatus::Healthy),
            "warning" | "warn" => Ok(QuotaStatus::Warning),
            "critical" => Ok(QuotaStatus::Critical),
            "depleted" | "exhausted" => Ok(QuotaStatus::Depleted),
            _ => Err(format!("Unknown quota status: {}", s)),
        }
    }
}

// ============================================================================
// Quota Types
// ============================================================================

/// Kind of limit a quota measures
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum QuotaType {
    /// Short rolling window (e.g. Claude's 5-hour session)
    Session,
    /// Weekly rolling window across all models
    Weekly,
    /// Limit scoped to a single model or model family
    ModelSpecific(String),
    /// Named time-boxed allowance (e.g. monthly premium requests)
    TimeLimit(String),
}

impl QuotaType {
    /// Short display name
    pub fn display_name(&self) -> String {
        match self {
            QuotaType::Session => "Session".to_string(),
            QuotaType::Weekly => "Weekly".to_string(),
            QuotaType::ModelSpecific(name) | QuotaType::TimeLimit(name) => name.clone(),
        }
    }
}

impl std::fmt::Display for QuotaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

// ============================================================================
// Quota
// ============================================================================

/// One measured usage limit
///
/// `percent_remaining` is clamped to `[0, 100]` at construction and the fields
/// are read-only afterwards, so the invariant cannot be broken later.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quota {
    percent_remaining: f64,
    quota_type: QuotaType,
    provider_id: String,
    resets_at: Option<DateTime<Utc>>,
    reset_text: Option<String>,
}

impl Quota {
    /// Create a quota from a remaining percentage
    pub fn new(
        provider_id: impl Into<String>,
        quota_type: QuotaType,
        percent_remaining: f64,
    ) -> Self {
        Self {
            percent_remaining: clamp_percent(percent_remaining),
            quota_type,
            provider_id: provider_id.into(),
            resets_at: None,
            reset_text: None,
        }
    }

    /// Create a quota from a used percentage (`100 - used` remaining)
    pub fn from_percent_used(
        provider_id: impl Into<String>,
        quota_type: QuotaType,
        percent_used: f64,
    ) -> Self {
        Self::new(provider_id, quota_type, 100.0 - percent_used)
    }

    /// Set the absolute reset time
    pub fn with_resets_at(mut self, resets_at: DateTime<Utc>) -> Self {
        self.resets_at = Some(resets_at);
        self
    }

    /// Set an optional absolute reset time
    pub fn with_optional_resets_at(mut self, resets_at: Option<DateTime<Utc>>) -> Self {
        self.resets_at = resets_at;
        self
    }

    /// Set the reset text as shown by the source
    pub fn with_reset_text(mut self, reset_text: impl Into<String>) -> Self {
        let text = reset_text.into();
        self.reset_text = if text.trim().is_empty() {
            None
        } else {
            Some(text.trim().to_string())
        };
        self
    }

    pub fn percent_remaining(&self) -> f64 {
        self.percent_remaining
    }

    pub fn percent_used(&self) -> f64 {
        100.0 - self.percent_remaining
    }

    pub fn quota_type(&self) -> &QuotaType {
        &self.quota_type
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn resets_at(&self) -> Option<DateTime<Utc>> {
        self.resets_at
    }

    pub fn reset_text(&self) -> Option<&str> {
        self.reset_text.as_deref()
    }

    /// Health status derived from the remaining percentage
    pub fn status(&self) -> QuotaStatus {
        QuotaStatus::from_percent_remaining(self.percent_remaining)
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

// ============================================================================
// Account & Cost
// ============================================================================

/// Account information from a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// User email
    pub email: Option<String>,
    /// User display name
    pub display_name: Option<String>,
    /// Plan/tier name (e.g., "pro", "max", "individual")
    pub plan: Option<String>,
    /// Organization or team name
    pub organization: Option<String>,
}

impl AccountInfo {
    /// Account info carrying only a plan name
    pub fn with_plan(plan: impl Into<String>) -> Self {
        Self {
            plan: Some(plan.into()),
            ..Default::default()
        }
    }

    /// True when no field is populated
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.display_name.is_none()
            && self.plan.is_none()
            && self.organization.is_none()
    }
}

/// Spend information for pay-as-you-go usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostUsage {
    /// Amount spent in the current period
    pub spent: Option<f64>,
    /// Spending limit for the period
    pub limit: Option<f64>,
    /// Remaining prepaid balance
    pub balance: Option<f64>,
    /// Currency code (e.g., "USD")
    pub currency: String,
    /// API time as reported by the tool (e.g., "6m 19.7s")
    pub api_duration: Option<String>,
    /// Wall-clock time as reported by the tool
    pub wall_duration: Option<String>,
}

impl CostUsage {
    /// Spend record in USD
    pub fn usd(spent: f64) -> Self {
        Self {
            spent: Some(spent),
            currency: "USD".to_string(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable point-in-time read of one provider's quotas
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    /// Provider this snapshot belongs to
    pub provider_id: String,
    /// Quotas in source order
    pub quotas: Vec<Quota>,
    /// When this snapshot was captured
    pub captured_at: DateTime<Utc>,
    /// Account metadata, when the source exposes it
    pub account: Option<AccountInfo>,
    /// Pay-as-you-go spend, when the source exposes it
    pub cost_usage: Option<CostUsage>,
}

impl UsageSnapshot {
    /// Create a snapshot captured now
    pub fn new(provider_id: impl Into<String>, quotas: Vec<Quota>) -> Self {
        Self {
            provider_id: provider_id.into(),
            quotas,
            captured_at: Utc::now(),
            account: None,
            cost_usage: None,
        }
    }

    /// Override the capture time
    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Attach account metadata (empty records are dropped)
    pub fn with_account(mut self, account: AccountInfo) -> Self {
        self.account = if account.is_empty() { None } else { Some(account) };
        self
    }

    /// Attach spend information
    pub fn with_cost_usage(mut self, cost_usage: CostUsage) -> Self {
        self.cost_usage = Some(cost_usage);
        self
    }

    /// Most severe status among the quotas
    ///
    /// A snapshot without quotas has no enforced limit and reports `Healthy`.
    pub fn overall_status(&self) -> QuotaStatus {
        self.quotas
            .iter()
            .map(Quota::status)
            .max()
            .unwrap_or(QuotaStatus::Healthy)
    }

    /// Quota with the smallest remaining percentage
    pub fn lowest_quota(&self) -> Option<&Quota> {
        self.quotas
            .iter()
            .min_by(|a, b| a.percent_remaining().total_cmp(&b.percent_remaining()))
    }

    /// Quota of the given type, if present
    pub fn quota(&self, quota_type: &QuotaType) -> Option<&Quota> {
        self.quotas.iter().find(|q| q.quota_type() == quota_type)
    }

    /// Age of this snapshot relative to `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.captured_at
    }

    /// True when the snapshot is older than five minutes
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    /// Staleness relative to an explicit clock
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) > Duration::seconds(STALE_AFTER_SECS)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(percent: f64) -> Quota {
        Quota::new("claude", QuotaType::Session, percent)
    }

    #[test]
    fn test_status_boundaries() {
        assert_eq!(QuotaStatus::from_percent_remaining(0.0), QuotaStatus::Depleted);
        assert_eq!(QuotaStatus::from_percent_remaining(19.0), QuotaStatus::Critical);
        assert_eq!(QuotaStatus::from_percent_remaining(19.99), QuotaStatus::Critical);
        assert_eq!(QuotaStatus::from_percent_remaining(20.0), QuotaStatus::Warning);
        assert_eq!(QuotaStatus::from_percent_remaining(49.0), QuotaStatus::Warning);
        assert_eq!(QuotaStatus::from_percent_remaining(50.0), QuotaStatus::Healthy);
        assert_eq!(QuotaStatus::from_percent_remaining(100.0), QuotaStatus::Healthy);
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut previous = QuotaStatus::Healthy;
        let mut p = 100.0;
        while p >= 0.0 {
            let status = QuotaStatus::from_percent_remaining(p);
            assert!(status >= previous, "status improved as {}% decreased", p);
            previous = status;
            p -= 0.5;
        }
        assert_eq!(previous, QuotaStatus::Depleted);
    }

    #[test]
    fn test_status_ordering() {
        assert!(QuotaStatus::Healthy < QuotaStatus::Warning);
        assert!(QuotaStatus::Warning < QuotaStatus::Critical);
        assert!(QuotaStatus::Critical < QuotaStatus::Depleted);
        assert!(QuotaStatus::Depleted.is_worse_than(QuotaStatus::Critical));
        assert!(!QuotaStatus::Healthy.is_worse_than(QuotaStatus::Healthy));
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("warning".parse::<QuotaStatus>().unwrap(), QuotaStatus::Warning);
        assert_eq!("CRITICAL".parse::<QuotaStatus>().unwrap(), QuotaStatus::Critical);
        assert!("bogus".parse::<QuotaStatus>().is_err());
    }

    #[test]
    fn test_quota_clamps_percentage() {
        assert_eq!(quota(150.0).percent_remaining(), 100.0);
        assert_eq!(quota(-5.0).percent_remaining(), 0.0);
        assert_eq!(quota(f64::NAN).percent_remaining(), 0.0);
        assert_eq!(quota(42.5).percent_remaining(), 42.5);
    }

    #[test]
    fn test_quota_from_percent_used() {
        let q = Quota::from_percent_used("claude", QuotaType::Weekly, 72.0);
        assert_eq!(q.percent_remaining(), 28.0);
        assert_eq!(q.percent_used(), 72.0);
        assert_eq!(q.status(), QuotaStatus::Warning);

        let over = Quota::from_percent_used("claude", QuotaType::Weekly, 130.0);
        assert_eq!(over.percent_remaining(), 0.0);
    }

    #[test]
    fn test_quota_reset_text_is_trimmed() {
        let q = quota(50.0).with_reset_text("  Resets 1am (Asia/Tokyo) ");
        assert_eq!(q.reset_text(), Some("Resets 1am (Asia/Tokyo)"));
        assert_eq!(quota(50.0).with_reset_text("   ").reset_text(), None);
    }

    #[test]
    fn test_overall_status() {
        let snapshot = UsageSnapshot::new("claude", vec![quota(80.0), quota(35.0)]);
        assert_eq!(snapshot.overall_status(), QuotaStatus::Warning);

        let snapshot = UsageSnapshot::new("claude", vec![quota(80.0), quota(0.0)]);
        assert_eq!(snapshot.overall_status(), QuotaStatus::Depleted);

        let empty = UsageSnapshot::new("claude", vec![]);
        assert_eq!(empty.overall_status(), QuotaStatus::Healthy);
    }

    #[test]
    fn test_lowest_quota() {
        let snapshot = UsageSnapshot::new(
            "claude",
            vec![
                quota(80.0),
                Quota::new("claude", QuotaType::Weekly, 12.0),
                quota(35.0),
            ],
        );
        let lowest = snapshot.lowest_quota().unwrap();
        assert_eq!(lowest.percent_remaining(), 12.0);
        assert_eq!(lowest.quota_type(), &QuotaType::Weekly);

        assert!(UsageSnapshot::new("claude", vec![]).lowest_quota().is_none());
    }

    #[test]
    fn test_is_stale() {
        let now = Utc::now();
        let fresh = UsageSnapshot::new("claude", vec![]).with_captured_at(now - Duration::seconds(60));
        assert!(!fresh.is_stale_at(now));

        let old = UsageSnapshot::new("claude", vec![]).with_captured_at(now - Duration::seconds(301));
        assert!(old.is_stale_at(now));
    }

    #[test]
    fn test_with_account_drops_empty_record() {
        let snapshot = UsageSnapshot::new("claude", vec![]).with_account(AccountInfo::default());
        assert!(snapshot.account.is_none());

        let snapshot = UsageSnapshot::new("claude", vec![]).with_account(AccountInfo::with_plan("max"));
        assert_eq!(snapshot.account.unwrap().plan.as_deref(), Some("max"));
    }

    #[test]
    fn test_quota_type_display() {
        assert_eq!(QuotaType::Session.to_string(), "Session");
        assert_eq!(QuotaType::Weekly.to_string(), "Weekly");
        assert_eq!(QuotaType::ModelSpecific("Opus".into()).to_string(), "Opus");
        assert_eq!(QuotaType::TimeLimit("MCP usage".into()).to_string(), "MCP usage");
    }

    #[test]
    fn test_quota_type_serialization() {
        let json = serde_json::to_string(&QuotaType::ModelSpecific("Sonnet".into())).unwrap();
        assert_eq!(json, r#"{"kind":"model_specific","name":"Sonnet"}"#);
        let json = serde_json::to_string(&QuotaType::Session).unwrap();
        assert_eq!(json, r#"{"kind":"session"}"#);
    }
}
