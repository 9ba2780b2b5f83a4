//! Claude Code quota probe (CLI)
//!
//! Runs `claude /usage`, answering the folder-trust and "press Enter"
//! prompts, and parses the meters it prints. API-billed accounts have no
//! meters; for them the probe falls back to `claude /cost`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::services::quota::parsers::claude::{
    is_subscription_only_notice, parse_cost_output, parse_usage_output,
};
use crate::services::quota::parsers::text::{strip_ansi, trim_answered_prompts};
use crate::services::quota::{Probe, ProbeError, UsageSnapshot};
use crate::transport::{CliExecutor, CliRequest};
use crate::utils::home_dir;

pub const PROVIDER_ID: &str = "claude";

const BINARY: &str = "claude";

/// Prompt substrings answered with Enter
const AUTO_ANSWERED_PROMPTS: &[&str] = &[
    "do you trust the files in this folder",
    "trust this folder",
    "press enter to continue",
];

/// Quiet period after which the TUI is considered done drawing
const SETTLE_AFTER: Duration = Duration::from_millis(2500);

pub struct ClaudeCliProbe {
    executor: Arc<dyn CliExecutor>,
    timeout: Duration,
    working_directory: PathBuf,
}

impl ClaudeCliProbe {
    pub fn new(executor: Arc<dyn CliExecutor>, timeout: Duration) -> Self {
        Self {
            executor,
            timeout,
            working_directory: home_dir(),
        }
    }

    /// Directory the CLI is started in; it decides which folder-trust prompt appears
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    async fn run(&self, command: &str) -> Result<String, ProbeError> {
        let request = AUTO_ANSWERED_PROMPTS.iter().fold(
            CliRequest::new(BINARY)
                .arg(command)
                .timeout(self.timeout)
                .working_directory(&self.working_directory)
                .settle_after(SETTLE_AFTER),
            |request, prompt| request.auto_respond(*prompt, "\r"),
        );

        let output = self.executor.execute(request).await?;
        let clean = strip_ansi(&output.output);
        log::debug!(
            "[quota:claude] {} exited with {} ({} bytes)",
            command,
            output.exit_code,
            clean.len()
        );

        if clean.trim().is_empty() && !output.success() {
            return Err(ProbeError::ExecutionFailed(format!(
                "claude {} exited with code {}",
                command, output.exit_code
            )));
        }

        Ok(trim_answered_prompts(&clean, AUTO_ANSWERED_PROMPTS).to_string())
    }
}

#[async_trait]
impl Probe for ClaudeCliProbe {
    async fn is_available(&self) -> bool {
        self.executor.locate(BINARY).is_some()
    }

    async fn probe(&self) -> Result<UsageSnapshot, ProbeError> {
        if self.executor.locate(BINARY).is_none() {
            return Err(ProbeError::CliNotFound(BINARY.to_string()));
        }

        let usage = self.run("/usage").await?;
        if is_subscription_only_notice(&usage) {
            log::info!("[quota:claude] Account is API-billed, reading /cost instead");
            let cost = self.run("/cost").await?;
            return parse_cost_output(PROVIDER_ID, &cost, Utc::now());
        }

        parse_usage_output(PROVIDER_ID, &usage, Utc::now())
    }
}
