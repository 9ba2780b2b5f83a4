//! Antigravity quota probe
//!
//! Fetches quota information from the local Antigravity language server by:
//! 1. Finding the running language server process (`pgrep -af`)
//! 2. Extracting the CSRF token from its command line
//! 3. Discovering its listening ports (`lsof`, falling back to `ss`)
//! 4. Posting `GetUserStatus` to each port over HTTPS until one answers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::services::quota::parsers::antigravity::{
    candidate_ports, language_server_name, parse_listening_ports, parse_process_list,
    parse_user_status, LanguageServerProcess,
};
use crate::services::quota::{Probe, ProbeError, UsageSnapshot};
use crate::transport::{
    retry_lookup, CliExecutor, CliRequest, HttpRequest, NetworkClient, RetryPolicy,
};

pub const PROVIDER_ID: &str = "antigravity";

/// Process table and socket lookups are local and fast
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AntigravityProbe {
    executor: Arc<dyn CliExecutor>,
    /// Must accept the server's self-signed certificate
    network: Arc<dyn NetworkClient>,
    retry: RetryPolicy,
    timeout: Duration,
    process_name: String,
}

impl AntigravityProbe {
    pub fn new(
        executor: Arc<dyn CliExecutor>,
        network: Arc<dyn NetworkClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            network,
            retry: RetryPolicy::default(),
            timeout,
            process_name: language_server_name(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }

    async fn find_server(&self) -> Result<LanguageServerProcess, ProbeError> {
        if self.executor.locate("pgrep").is_none() {
            return Err(ProbeError::CliNotFound("pgrep".to_string()));
        }

        let output = self
            .executor
            .execute(
                CliRequest::new("pgrep")
                    .args(["-af", self.process_name.as_str()])
                    .timeout(DISCOVERY_TIMEOUT),
            )
            .await?;

        parse_process_list(&output.output, &self.process_name).ok_or_else(|| {
            log::debug!("[quota:antigravity] {} is not running", self.process_name);
            ProbeError::NoData
        })
    }

    async fn listening_ports(&self, pid: u32) -> Result<Vec<u16>, ProbeError> {
        let pid = pid.to_string();

        if self.executor.locate("lsof").is_some() {
            let output = self
                .executor
                .execute(
                    CliRequest::new("lsof")
                        .args(["-nP", "-iTCP", "-sTCP:LISTEN", "-a", "-p", pid.as_str()])
                        .timeout(DISCOVERY_TIMEOUT),
                )
                .await?;
            let ports = parse_listening_ports(&output.output);
            if !ports.is_empty() {
                return Ok(ports);
            }
        }

        if self.executor.locate("ss").is_some() {
            let output = self
                .executor
                .execute(CliRequest::new("ss").arg("-tlnp").timeout(DISCOVERY_TIMEOUT))
                .await?;
            let needle = format!("pid={},", pid);
            let own_lines: String = output
                .output
                .lines()
                .filter(|line| line.contains(&needle))
                .collect::<Vec<_>>()
                .join("\n");
            let ports = parse_listening_ports(&own_lines);
            if !ports.is_empty() {
                return Ok(ports);
            }
        }

        Err(ProbeError::NoData)
    }

    async fn get_user_status(&self, port: u16, csrf_token: &str) -> Result<UsageSnapshot, ProbeError> {
        let url = format!(
            "https://127.0.0.1:{}/exa.language_server_pb.LanguageServerService/GetUserStatus",
            port
        );
        let request = HttpRequest::post(url)
            .json_body(&json!({
                "metadata": {
                    "ideName": "quotawatch",
                    "extensionName": "quotawatch",
                    "locale": "en",
                }
            }))
            .header("Connect-Protocol-Version", "1")
            .header("X-Codeium-Csrf-Token", csrf_token)
            .timeout(self.timeout);

        let response = self.network.request(request).await?.error_for_status()?;
        parse_user_status(PROVIDER_ID, &response.body, Utc::now())
    }
}

#[async_trait]
impl Probe for AntigravityProbe {
    async fn is_available(&self) -> bool {
        self.find_server().await.is_ok()
    }

    async fn probe(&self) -> Result<UsageSnapshot, ProbeError> {
        let server = self.find_server().await?;

        let listening = retry_lookup(&self.retry, "antigravity ports", || {
            self.listening_ports(server.pid)
        })
        .await
        .unwrap_or_default();
        let ports = candidate_ports(&server, &listening);

        if ports.is_empty() {
            return Err(ProbeError::ExecutionFailed(
                "No listening port found for the Antigravity language server".to_string(),
            ));
        }

        log::debug!(
            "[quota:antigravity] Found server PID={}, {} ports to try",
            server.pid,
            ports.len()
        );

        let mut last_error = None;
        for port in ports {
            match self.get_user_status(port, &server.csrf_token).await {
                Ok(snapshot) => {
                    log::debug!("[quota:antigravity] Port {} answered", port);
                    return Ok(snapshot);
                }
                // A parse failure means the right server answered with bad data
                Err(e @ ProbeError::ParseFailed(_)) => return Err(e),
                Err(e) => {
                    log::debug!("[quota:antigravity] Port {} failed: {}", port, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ProbeError::NoData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quota::probes::fakes::{FakeExecutor, FakeNetwork};

    const PROCESS: &str = "4242 /opt/ag/language_server_linux_x64 --csrf_token tok-9 --extension_server_port 40001\n";
    const LSOF: &str = "lang 4242 u 12u IPv4 0 0t0 TCP 127.0.0.1:40000 (LISTEN)\nlang 4242 u 13u IPv4 0 0t0 TCP 127.0.0.1:40001 (LISTEN)\n";
    const STATUS: &str = r#"{ "userStatus": { "cascadeModelConfigData": { "clientModelConfigs": [
        { "label": "Gemini 3 Pro", "quotaInfo": { "remainingFraction": 0.5 } } ] } } }"#;

    fn probe(executor: FakeExecutor, network: FakeNetwork) -> (Arc<FakeExecutor>, Arc<FakeNetwork>, AntigravityProbe) {
        let executor = Arc::new(executor);
        let network = Arc::new(network);
        let probe = AntigravityProbe::new(executor.clone(), network.clone(), Duration::from_secs(5))
            .with_process_name("language_server_linux_x64")
            .with_retry_policy(RetryPolicy::new(1, Duration::from_millis(1)));
        (executor, network, probe)
    }

    #[tokio::test]
    async fn test_probe_tries_extension_port_first() {
        let (executor, network, probe) = probe(
            FakeExecutor::with_binaries(&["pgrep", "lsof"])
                .output(0, PROCESS)
                .output(0, LSOF),
            FakeNetwork::new()
                .fail(ProbeError::ExecutionFailed("connection refused".into()))
                .respond(200, STATUS),
        );

        let snapshot = probe.probe().await.unwrap();
        assert_eq!(snapshot.quotas[0].percent_remaining(), 50.0);

        let urls = network.urls();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].starts_with("https://127.0.0.1:40001/"));
        assert!(urls[1].starts_with("https://127.0.0.1:40000/"));
        assert_eq!(
            network.requests.lock()[0].header_value("X-Codeium-Csrf-Token"),
            Some("tok-9")
        );
        assert_eq!(
            executor.commands(),
            vec![
                "pgrep -af language_server_linux_x64",
                "lsof -nP -iTCP -sTCP:LISTEN -a -p 4242"
            ]
        );
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_ss() {
        let ss = "LISTEN 0 128 127.0.0.1:40005 *:* users:((\"lang\",pid=4242,fd=12))\nLISTEN 0 128 127.0.0.1:22 *:* users:((\"sshd\",pid=1,fd=3))\n";
        let (executor, network, probe) = probe(
            FakeExecutor::with_binaries(&["pgrep", "ss"])
                .output(0, "4242 /opt/ag/language_server_linux_x64 --csrf_token tok-9\n")
                .output(0, ss),
            FakeNetwork::new().respond(200, STATUS),
        );

        assert!(probe.probe().await.is_ok());
        assert!(network.urls()[0].starts_with("https://127.0.0.1:40005/"));
        assert_eq!(executor.commands()[1], "ss -tlnp");
    }

    #[tokio::test]
    async fn test_not_running_is_unavailable() {
        let (_, _, probe) = probe(
            FakeExecutor::with_binaries(&["pgrep"]).output(1, ""),
            FakeNetwork::new(),
        );
        assert!(!probe.is_available().await);
    }

    #[tokio::test]
    async fn test_no_ports_fails() {
        let (_, _, probe) = probe(
            FakeExecutor::with_binaries(&["pgrep"])
                .output(0, "4242 /opt/ag/language_server_linux_x64 --csrf_token tok-9\n"),
            FakeNetwork::new(),
        );
        assert!(matches!(
            probe.probe().await,
            Err(ProbeError::ExecutionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_all_ports_failing_returns_last_error() {
        let (_, _, probe) = probe(
            FakeExecutor::with_binaries(&["pgrep", "lsof"])
                .output(0, PROCESS)
                .output(0, LSOF),
            FakeNetwork::new()
                .fail(ProbeError::Timeout)
                .respond(500, "internal"),
        );
        assert!(matches!(
            probe.probe().await,
            Err(ProbeError::ExecutionFailed(_))
        ));
    }
}
