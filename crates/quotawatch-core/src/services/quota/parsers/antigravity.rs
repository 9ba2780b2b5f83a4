//! Parse Antigravity's local language server
//!
//! The server is discovered from the process table and answers
//! `GetUserStatus` with per-model quota fractions:
//! ```json
//! { "userStatus": {
//!     "email": "dev@example.com",
//!     "userTier": { "name": "Pro" },
//!     "cascadeModelConfigData": { "clientModelConfigs": [
//!         { "label": "Claude Sonnet 4.5",
//!           "quotaInfo": { "remainingFraction": 0.6, "resetTime": "2026-03-01T17:00:00Z" } }
//!     ] }
//! } }
//! ```

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::timestamp::parse_timestamp_str;
use crate::services::quota::{AccountInfo, ProbeError, Quota, QuotaType, UsageSnapshot};

static CSRF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--csrf_token[=\s]+([a-zA-Z0-9\-]+)").unwrap());
static EXTENSION_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--extension_server_port[=\s]+(\d+)").unwrap());
/// `ss -tlnp`: `LISTEN 0 128 127.0.0.1:42100 ...`
static SS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"LISTEN\s+\d+\s+\d+\s+(?:\*|[\d.]+|\[[\da-f:]*\]):(\d+)").unwrap()
});
/// `lsof -iTCP -sTCP:LISTEN`: `TCP 127.0.0.1:42100 (LISTEN)`
static LSOF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"TCP\s+(?:\*|[\d.]+|\[[\da-f:]+\]):(\d+)\s+\(LISTEN\)").unwrap()
});

// ============================================================================
// Process Discovery
// ============================================================================

/// Language server binary name for the current platform
pub fn language_server_name() -> String {
    let arm = std::env::consts::ARCH == "aarch64";
    match (cfg!(target_os = "macos"), arm) {
        (true, true) => "language_server_macos_arm",
        (true, false) => "language_server_macos",
        (false, true) => "language_server_linux_arm",
        (false, false) => "language_server_linux_x64",
    }
    .to_string()
}

/// A running language server found in `pgrep -af` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageServerProcess {
    pub pid: u32,
    pub csrf_token: String,
    pub extension_port: Option<u16>,
}

/// Find the language server in `pgrep -af` output
///
/// Lines are `PID command line...`; only processes carrying a CSRF token
/// can be queried.
pub fn parse_process_list(stdout: &str, process_name: &str) -> Option<LanguageServerProcess> {
    stdout.lines().map(str::trim).find_map(|line| {
        if !line.contains(process_name) {
            return None;
        }
        let (pid, command_line) = line.split_once(char::is_whitespace)?;
        let pid = pid.parse::<u32>().ok()?;
        let csrf_token = extract_csrf_token(command_line)?;
        Some(LanguageServerProcess {
            pid,
            csrf_token,
            extension_port: extract_extension_port(command_line),
        })
    })
}

pub fn extract_csrf_token(command_line: &str) -> Option<String> {
    CSRF_RE
        .captures(command_line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn extract_extension_port(command_line: &str) -> Option<u16> {
    EXTENSION_PORT_RE
        .captures(command_line)
        .and_then(|caps| caps.get(1)?.as_str().parse().ok())
}

/// Listening ports from `ss` or `lsof` output, sorted and deduplicated
pub fn parse_listening_ports(stdout: &str) -> Vec<u16> {
    let mut ports: Vec<u16> = stdout
        .lines()
        .filter_map(|line| SS_RE.captures(line).or_else(|| LSOF_RE.captures(line)))
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

/// Ports to try, the advertised extension port first
pub fn candidate_ports(process: &LanguageServerProcess, listening: &[u16]) -> Vec<u16> {
    let mut ports = Vec::with_capacity(listening.len() + 1);
    if let Some(port) = process.extension_port {
        ports.push(port);
    }
    ports.extend(listening.iter().copied().filter(|p| Some(*p) != process.extension_port));
    ports
}

// ============================================================================
// GetUserStatus
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStatusResponse {
    user_status: Option<UserStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStatus {
    name: Option<String>,
    email: Option<String>,
    user_tier: Option<UserTier>,
    cascade_model_config_data: Option<CascadeModelConfigData>,
}

#[derive(Debug, Deserialize)]
struct UserTier {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CascadeModelConfigData {
    #[serde(default)]
    client_model_configs: Vec<ClientModelConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientModelConfig {
    label: Option<String>,
    quota_info: Option<QuotaInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaInfo {
    remaining_fraction: Option<f64>,
    reset_time: Option<String>,
}

/// Parse a `GetUserStatus` body
pub fn parse_user_status(
    provider_id: &str,
    body: &str,
    now: DateTime<Utc>,
) -> Result<UsageSnapshot, ProbeError> {
    let response: UserStatusResponse = serde_json::from_str(body)
        .map_err(|e| ProbeError::ParseFailed(format!("Invalid GetUserStatus response: {}", e)))?;
    let status = response
        .user_status
        .ok_or_else(|| ProbeError::ParseFailed("Response has no userStatus".to_string()))?;

    let configs = status
        .cascade_model_config_data
        .map(|data| data.client_model_configs)
        .unwrap_or_default();

    let quotas: Vec<Quota> = configs
        .into_iter()
        .filter_map(|config| {
            let label = config.label.filter(|l| !l.trim().is_empty())?;
            let info = config.quota_info?;
            let fraction = info.remaining_fraction?;
            let reset = info.reset_time.as_deref().and_then(parse_timestamp_str);
            Some(
                Quota::new(provider_id, QuotaType::ModelSpecific(label), fraction * 100.0)
                    .with_optional_resets_at(reset),
            )
        })
        .collect();

    if quotas.is_empty() {
        return Err(ProbeError::ParseFailed(
            "No model quotas in GetUserStatus response".to_string(),
        ));
    }

    let account = AccountInfo {
        email: status.email.filter(|e| !e.is_empty()),
        display_name: status.name.filter(|n| !n.is_empty()),
        plan: status.user_tier.and_then(|tier| tier.name).filter(|n| !n.is_empty()),
        organization: None,
    };

    Ok(UsageSnapshot::new(provider_id, quotas)
        .with_captured_at(now)
        .with_account(account))
}
