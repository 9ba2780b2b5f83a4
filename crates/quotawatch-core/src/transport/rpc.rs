//! Local JSON-RPC transport
//!
//! Speaks newline-delimited JSON-RPC to a child process over stdio, the way
//! `codex app-server` expects. A call sequence runs against one fresh child
//! and is bounded by a single timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::services::quota::ProbeError;
use crate::utils::{create_command, truncate_for_log};

/// One JSON-RPC message to send
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub params: Value,
    /// Notifications carry no id and get no response
    pub notification: bool,
}

impl RpcCall {
    pub fn request(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            notification: false,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            notification: true,
        }
    }
}

/// Runs a sequence of JSON-RPC calls
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Full response objects (`result` or `error`), one per request in order
    async fn call_sequence(&self, calls: &[RpcCall]) -> Result<Vec<Value>, ProbeError>;
}

/// `RpcTransport` over a spawned child's stdin/stdout
#[derive(Debug, Clone)]
pub struct StdioRpcTransport {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl StdioRpcTransport {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn exchange(&self, calls: &[RpcCall]) -> Result<Vec<Value>, ProbeError> {
        let mut child = create_command(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProbeError::CliNotFound(self.program.display().to_string())
                }
                _ => ProbeError::ExecutionFailed(format!(
                    "Failed to start {}: {}",
                    self.program.display(),
                    e
                )),
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProbeError::ExecutionFailed("stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProbeError::ExecutionFailed("stdout was not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut responses = Vec::new();
        let mut next_id: u64 = 1;

        for call in calls {
            let message = if call.notification {
                json!({ "method": call.method, "params": call.params })
            } else {
                json!({ "id": next_id, "method": call.method, "params": call.params })
            };
            let mut line = message.to_string();
            line.push('\n');
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| ProbeError::ExecutionFailed(format!("RPC write failed: {}", e)))?;
            stdin
                .flush()
                .await
                .map_err(|e| ProbeError::ExecutionFailed(format!("RPC write failed: {}", e)))?;

            if call.notification {
                continue;
            }

            let id = next_id;
            next_id += 1;
            responses.push(read_response(&mut lines, id, &call.method).await?);
        }

        drop(stdin);
        let _ = child.start_kill();
        Ok(responses)
    }
}

async fn read_response<R>(
    lines: &mut tokio::io::Lines<R>,
    id: u64,
    method: &str,
) -> Result<Value, ProbeError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|e| ProbeError::ExecutionFailed(format!("RPC read failed: {}", e)))?
            .ok_or_else(|| {
                ProbeError::ExecutionFailed(format!("RPC server closed before answering {}", method))
            })?;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => {
                log::debug!(
                    "[quota:rpc] Skipping non-JSON line: {}",
                    truncate_for_log(trimmed, 120)
                );
                continue;
            }
        };

        // Server notifications and unrelated responses are skipped
        if value.get("id").and_then(Value::as_u64) == Some(id) {
            return Ok(value);
        }
    }
}

#[async_trait]
impl RpcTransport for StdioRpcTransport {
    async fn call_sequence(&self, calls: &[RpcCall]) -> Result<Vec<Value>, ProbeError> {
        match tokio::time::timeout(self.timeout, self.exchange(calls)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "[quota:rpc] {} timed out after {:?}",
                    self.program.display(),
                    self.timeout
                );
                Err(ProbeError::Timeout)
            }
        }
    }
}
