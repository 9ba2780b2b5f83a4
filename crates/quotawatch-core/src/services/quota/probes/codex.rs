//! Codex quota probes
//!
//! The preferred source is `codex app-server`, which answers
//! `account/rateLimits/read` over newline-delimited JSON-RPC. The `/status`
//! card of the interactive CLI is kept as a fallback mode.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::services::quota::parsers::codex::{
    parse_rate_limits, parse_rpc_response, parse_status_output,
};
use crate::services::quota::{Probe, ProbeError, UsageSnapshot};
use crate::transport::{CliExecutor, CliRequest, RpcCall, RpcTransport, StdioRpcTransport};

pub const PROVIDER_ID: &str = "codex";

const BINARY: &str = "codex";

const STATUS_SETTLE_AFTER: Duration = Duration::from_millis(2000);

// ============================================================================
// JSON-RPC
// ============================================================================

pub struct CodexRpcProbe {
    executor: Arc<dyn CliExecutor>,
    timeout: Duration,
    transport: Option<Arc<dyn RpcTransport>>,
}

impl CodexRpcProbe {
    pub fn new(executor: Arc<dyn CliExecutor>, timeout: Duration) -> Self {
        Self {
            executor,
            timeout,
            transport: None,
        }
    }

    /// Use this transport instead of spawning `codex app-server`
    pub fn with_transport(mut self, transport: Arc<dyn RpcTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    fn transport(&self) -> Result<Arc<dyn RpcTransport>, ProbeError> {
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }
        let path = self
            .executor
            .locate(BINARY)
            .ok_or_else(|| ProbeError::CliNotFound(BINARY.to_string()))?;
        Ok(Arc::new(StdioRpcTransport::new(
            path,
            vec!["app-server".to_string()],
            self.timeout,
        )))
    }

    fn calls() -> Vec<RpcCall> {
        vec![
            RpcCall::request(
                "initialize",
                json!({
                    "clientInfo": {
                        "name": "quotawatch",
                        "title": "QuotaWatch",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            ),
            RpcCall::notification("initialized", json!({})),
            RpcCall::request("account/rateLimits/read", Value::Null),
        ]
    }
}

#[async_trait]
impl Probe for CodexRpcProbe {
    async fn is_available(&self) -> bool {
        self.transport.is_some() || self.executor.locate(BINARY).is_some()
    }

    async fn probe(&self) -> Result<UsageSnapshot, ProbeError> {
        let transport = self.transport()?;
        let responses = transport.call_sequence(&Self::calls()).await?;

        let [initialize, rate_limits] = responses.as_slice() else {
            return Err(ProbeError::ParseFailed(format!(
                "Expected 2 RPC responses, got {}",
                responses.len()
            )));
        };

        parse_rpc_response(initialize)?;
        let result = parse_rpc_response(rate_limits)?;
        parse_rate_limits(PROVIDER_ID, result, Utc::now())
    }
}

// ============================================================================
// /status
// ============================================================================

pub struct CodexCliProbe {
    executor: Arc<dyn CliExecutor>,
    timeout: Duration,
}

impl CodexCliProbe {
    pub fn new(executor: Arc<dyn CliExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }
}

#[async_trait]
impl Probe for CodexCliProbe {
    async fn is_available(&self) -> bool {
        self.executor.locate(BINARY).is_some()
    }

    async fn probe(&self) -> Result<UsageSnapshot, ProbeError> {
        if self.executor.locate(BINARY).is_none() {
            return Err(ProbeError::CliNotFound(BINARY.to_string()));
        }

        let output = self
            .executor
            .execute(
                CliRequest::new(BINARY)
                    .input("/status\n")
                    .auto_respond("press enter to continue", "\r")
                    .settle_after(STATUS_SETTLE_AFTER)
                    .timeout(self.timeout),
            )
            .await?;

        parse_status_output(PROVIDER_ID, &output.output, Utc::now())
    }
}
