//! Credential access for API-based probes
//!
//! Probes only need to read a stored OAuth token, know whether it is about to
//! expire, and write a renewed token back. Renewal itself is delegated to the
//! owning CLI through `TokenRefresher`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::parsers::timestamp::FlexibleTimestamp;
use super::probe::ProbeError;
use crate::transport::cli::{CliExecutor, CliRequest};

/// Tokens expiring within this window are refreshed before use
pub const REFRESH_MARGIN_SECS: i64 = 60;

// ============================================================================
// Credential
// ============================================================================

/// An OAuth access token with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Subscription type, when the file records it
    pub plan: Option<String>,
}

impl OAuthCredential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            plan: None,
        }
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True when the token has expired or expires within a minute
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - now <= chrono::Duration::seconds(REFRESH_MARGIN_SECS),
            None => false,
        }
    }
}

// ============================================================================
// Credential Source
// ============================================================================

/// Read/write access to one stored credential
pub trait CredentialSource: Send + Sync {
    fn exists(&self) -> bool;

    fn load(&self) -> Result<OAuthCredential, ProbeError>;

    fn save(&self, credential: &OAuthCredential) -> Result<(), ProbeError>;
}

/// On-disk layout of a credential file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFormat {
    /// `~/.claude/.credentials.json`: `claudeAiOauth.{accessToken, refreshToken, expiresAt, subscriptionType}`
    ClaudeCode,
    /// `~/.gemini/oauth_creds.json`: `{access_token, refresh_token, expiry_date}`
    GeminiCli,
}

struct FieldNames {
    access_token: &'static str,
    refresh_token: &'static str,
    expires_at: &'static str,
    plan: Option<&'static str>,
}

impl CredentialFormat {
    fn fields(&self) -> FieldNames {
        match self {
            CredentialFormat::ClaudeCode => FieldNames {
                access_token: "accessToken",
                refresh_token: "refreshToken",
                expires_at: "expiresAt",
                plan: Some("subscriptionType"),
            },
            CredentialFormat::GeminiCli => FieldNames {
                access_token: "access_token",
                refresh_token: "refresh_token",
                expires_at: "expiry_date",
                plan: None,
            },
        }
    }

    /// Key of the nested object holding the fields, if any
    fn container(&self) -> Option<&'static str> {
        match self {
            CredentialFormat::ClaudeCode => Some("claudeAiOauth"),
            CredentialFormat::GeminiCli => None,
        }
    }
}

/// Credential stored in a JSON file
#[derive(Debug, Clone)]
pub struct FileCredentialSource {
    path: PathBuf,
    format: CredentialFormat,
}

impl FileCredentialSource {
    pub fn new(path: impl Into<PathBuf>, format: CredentialFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Value, ProbeError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProbeError::AuthenticationRequired,
            _ => ProbeError::ExecutionFailed(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            )),
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ProbeError::ParseFailed(format!("Invalid credentials file format: {}", e))
        })
    }
}

impl CredentialSource for FileCredentialSource {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn load(&self) -> Result<OAuthCredential, ProbeError> {
        let document = self.read_document()?;
        let fields = self.format.fields();

        let object = match self.format.container() {
            Some(key) => document.get(key).ok_or_else(|| {
                log::warn!("[quota:credentials] No {} object in {}", key, self.path.display());
                ProbeError::AuthenticationRequired
            })?,
            None => &document,
        };

        let access_token = object
            .get(fields.access_token)
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProbeError::AuthenticationRequired)?
            .to_string();

        let expires_at = object
            .get(fields.expires_at)
            .cloned()
            .and_then(|v| serde_json::from_value::<FlexibleTimestamp>(v).ok())
            .and_then(|ts| ts.to_datetime());

        Ok(OAuthCredential {
            access_token,
            refresh_token: object
                .get(fields.refresh_token)
                .and_then(Value::as_str)
                .map(str::to_string),
            expires_at,
            plan: fields
                .plan
                .and_then(|key| object.get(key))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    fn save(&self, credential: &OAuthCredential) -> Result<(), ProbeError> {
        // Patch in place so fields this crate does not know about survive
        let mut document = match self.read_document() {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => Value::Object(Map::new()),
        };
        let fields = self.format.fields();

        let object = match self.format.container() {
            Some(key) => {
                let root = document
                    .as_object_mut()
                    .ok_or_else(|| ProbeError::ExecutionFailed("Credential root is not an object".into()))?;
                let entry = root
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                entry
            }
            None => &mut document,
        };

        let map = object
            .as_object_mut()
            .ok_or_else(|| ProbeError::ExecutionFailed("Credential entry is not an object".into()))?;
        map.insert(
            fields.access_token.to_string(),
            Value::String(credential.access_token.clone()),
        );
        if let Some(refresh) = &credential.refresh_token {
            map.insert(fields.refresh_token.to_string(), Value::String(refresh.clone()));
        }
        if let Some(expires_at) = credential.expires_at {
            map.insert(
                fields.expires_at.to_string(),
                Value::from(expires_at.timestamp_millis()),
            );
        }

        let content = serde_json::to_string_pretty(&document)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                ProbeError::ExecutionFailed(format!(
                    "Failed to write {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        log::debug!("[quota:credentials] Saved credential to {}", self.path.display());
        Ok(())
    }
}

// ============================================================================
// Token Refresh
// ============================================================================

/// Renews a stored token out of band
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<(), ProbeError>;

    /// Renew the token, returning the new credential when the refresher
    /// obtained it itself
    ///
    /// `None` means the owner rewrote its own store and callers re-read it.
    async fn refresh_credential(&self) -> Result<Option<OAuthCredential>, ProbeError> {
        self.refresh().await.map(|()| None)
    }
}

/// Runs the owning CLI headlessly so it renews its own stored token
pub struct CliTokenRefresher {
    executor: Arc<dyn CliExecutor>,
    binary: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CliTokenRefresher {
    pub fn new(
        executor: Arc<dyn CliExecutor>,
        binary: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            binary: binary.into(),
            args,
            timeout,
        }
    }

    /// `claude -p ok`
    pub fn claude(executor: Arc<dyn CliExecutor>, timeout: Duration) -> Self {
        Self::new(executor, "claude", vec!["-p".into(), "ok".into()], timeout)
    }

    /// `gemini -p ok`
    pub fn gemini(executor: Arc<dyn CliExecutor>, timeout: Duration) -> Self {
        Self::new(executor, "gemini", vec!["-p".into(), "ok".into()], timeout)
    }
}

#[async_trait]
impl TokenRefresher for CliTokenRefresher {
    async fn refresh(&self) -> Result<(), ProbeError> {
        if self.executor.locate(&self.binary).is_none() {
            return Err(ProbeError::CliNotFound(self.binary.clone()));
        }

        log::info!("[quota:credentials] Running {} to refresh its token", self.binary);
        let output = self
            .executor
            .execute(
                CliRequest::new(&self.binary)
                    .args(self.args.iter().cloned())
                    .timeout(self.timeout),
            )
            .await?;

        if output.success() {
            Ok(())
        } else {
            Err(ProbeError::ExecutionFailed(format!(
                "{} exited with code {}",
                self.binary, output.exit_code
            )))
        }
    }
}
