//! CLI executor
//!
//! Runs a tool binary with piped stdio, feeds optional input, answers known
//! interactive prompts from an auto-response table and collects the output.
//! The whole run is bounded by the request's timeout; the child is killed
//! when the run is abandoned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};

use crate::services::quota::parsers::text::strip_ansi;
use crate::services::quota::ProbeError;
use crate::utils::{create_command, home_dir, truncate_for_log};

/// Default timeout for a CLI run
pub const DEFAULT_CLI_TIMEOUT: Duration = Duration::from_secs(20);

/// Bytes of already scanned output re-read beyond the longest prompt, for
/// escape sequences inside a prompt split across reads
const PROMPT_SCAN_SLACK: usize = 256;

// ============================================================================
// Request / Output
// ============================================================================

/// One CLI invocation
#[derive(Debug, Clone)]
pub struct CliRequest {
    /// Binary name (looked up on the search path) or explicit path
    pub binary: String,
    pub args: Vec<String>,
    /// Written to stdin right after spawn
    pub input: Option<String>,
    pub timeout: Duration,
    pub working_directory: Option<PathBuf>,
    /// `(prompt substring, response)` pairs, matched case-insensitively
    pub auto_responses: Vec<(String, String)>,
    /// Stop reading once output has been quiet for this long
    pub settle_after: Option<Duration>,
    pub env: Vec<(String, String)>,
}

impl CliRequest {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            input: None,
            timeout: DEFAULT_CLI_TIMEOUT,
            working_directory: None,
            auto_responses: Vec::new(),
            settle_after: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn auto_respond(mut self, prompt: impl Into<String>, response: impl Into<String>) -> Self {
        self.auto_responses.push((prompt.into(), response.into()));
        self
    }

    pub fn settle_after(mut self, quiet: Duration) -> Self {
        self.settle_after = Some(quiet);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Collected output of a CLI run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOutput {
    /// stdout followed by stderr
    pub output: String,
    /// Process exit code, `-1` when the process was stopped after settling
    pub exit_code: i32,
}

impl CliOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ============================================================================
// Executor Trait
// ============================================================================

/// Runs CLI binaries on behalf of probes
#[async_trait]
pub trait CliExecutor: Send + Sync {
    /// Resolve a binary name to a path
    fn locate(&self, binary: &str) -> Option<PathBuf>;

    /// Run a request; fails on launch failure or timeout
    async fn execute(&self, request: CliRequest) -> Result<CliOutput, ProbeError>;
}

// ============================================================================
// Process Executor
// ============================================================================

/// `CliExecutor` backed by real child processes
#[derive(Debug, Clone)]
pub struct ProcessCliExecutor {
    extra_dirs: Vec<PathBuf>,
}

impl Default for ProcessCliExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCliExecutor {
    /// Executor searching `PATH` plus the usual user install locations
    pub fn new() -> Self {
        let home = home_dir();
        Self {
            extra_dirs: vec![
                home.join(".local/bin"),
                home.join(".npm-global/bin"),
                home.join(".claude/local"),
                home.join(".bun/bin"),
                PathBuf::from("/opt/homebrew/bin"),
                PathBuf::from("/usr/local/bin"),
            ],
        }
    }

    /// Executor searching `PATH` plus the given directories
    pub fn with_search_dirs(extra_dirs: Vec<PathBuf>) -> Self {
        Self { extra_dirs }
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|path| std::env::split_paths(&path).collect())
            .unwrap_or_default();
        for dir in &self.extra_dirs {
            if !dirs.contains(dir) {
                dirs.push(dir.clone());
            }
        }
        dirs
    }
}

#[async_trait]
impl CliExecutor for ProcessCliExecutor {
    fn locate(&self, binary: &str) -> Option<PathBuf> {
        let candidate = Path::new(binary);
        if candidate.components().count() > 1 {
            return is_executable(candidate).then(|| candidate.to_path_buf());
        }

        self.search_dirs().into_iter().find_map(|dir| {
            executable_names(binary)
                .into_iter()
                .map(|name| dir.join(name))
                .find(|path| is_executable(path))
        })
    }

    async fn execute(&self, request: CliRequest) -> Result<CliOutput, ProbeError> {
        let program = self
            .locate(&request.binary)
            .ok_or_else(|| ProbeError::CliNotFound(request.binary.clone()))?;

        log::debug!(
            "[quota:cli] Running {} {}",
            program.display(),
            request.args.join(" ")
        );

        let mut cmd = create_command(&program);
        cmd.args(&request.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &request.working_directory {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProbeError::CliNotFound(request.binary.clone()),
            _ => ProbeError::ExecutionFailed(format!("Failed to start {}: {}", request.binary, e)),
        })?;

        match tokio::time::timeout(request.timeout, drive(child, &request)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "[quota:cli] {} timed out after {:?}",
                    request.binary,
                    request.timeout
                );
                Err(ProbeError::Timeout)
            }
        }
    }
}

async fn drive(mut child: Child, request: &CliRequest) -> Result<CliOutput, ProbeError> {
    let mut stdin = child.stdin.take();
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProbeError::ExecutionFailed("stdout was not captured".to_string()))?;
    let stderr = child.stderr.take();

    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut buf).await;
        }
        buf
    });

    if let (Some(input), Some(pipe)) = (&request.input, stdin.as_mut()) {
        write_all(pipe, input)
            .await
            .map_err(|e| ProbeError::ExecutionFailed(format!("Failed to write input: {}", e)))?;
    }
    if request.auto_responses.is_empty() {
        // Close stdin so tools waiting for EOF can finish
        drop(stdin.take());
    }

    let mut raw = Vec::new();
    let mut prompts = PromptScanner::new(&request.auto_responses);
    let mut buf = [0u8; 4096];
    let mut settled = false;

    loop {
        let read = match request.settle_after {
            Some(quiet) if !raw.is_empty() => {
                match tokio::time::timeout(quiet, stdout.read(&mut buf)).await {
                    Ok(read) => read,
                    Err(_) => {
                        settled = true;
                        break;
                    }
                }
            }
            _ => stdout.read(&mut buf).await,
        };
        let n = read.map_err(|e| ProbeError::ExecutionFailed(format!("Failed to read output: {}", e)))?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);

        if let Some(pipe) = stdin.as_mut() {
            for (prompt, response) in prompts.scan(&raw) {
                log::debug!("[quota:cli] Answering prompt '{}'", prompt);
                if let Err(e) = write_all(pipe, response).await {
                    log::warn!("[quota:cli] Failed to answer prompt '{}': {}", prompt, e);
                }
            }
        }
    }
    drop(stdin);

    let exit_code = if settled {
        let _ = child.start_kill();
        let _ = child.wait().await;
        -1
    } else {
        let status = child
            .wait()
            .await
            .map_err(|e| ProbeError::ExecutionFailed(format!("Failed to wait for process: {}", e)))?;
        status.code().unwrap_or(-1)
    };

    let stderr_text = if settled {
        // Orphaned grandchildren may still hold the pipe open
        stderr_task.abort();
        String::new()
    } else {
        stderr_task.await.unwrap_or_default()
    };
    let mut output = String::from_utf8_lossy(&raw).into_owned();
    if !stderr_text.trim().is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stderr_text);
    }

    log::debug!(
        "[quota:cli] {} exited with {} ({} bytes): {}",
        request.binary,
        exit_code,
        output.len(),
        truncate_for_log(&output, 200)
    );

    Ok(CliOutput { output, exit_code })
}

/// Finds auto-response prompts in output that arrives in chunks
///
/// Each scan decodes only the bytes added since the previous one, plus an
/// overlap long enough to catch a prompt split across reads.
struct PromptScanner<'a> {
    responses: &'a [(String, String)],
    answered: Vec<bool>,
    scanned: usize,
    overlap: usize,
}

impl<'a> PromptScanner<'a> {
    fn new(responses: &'a [(String, String)]) -> Self {
        let longest = responses.iter().map(|(prompt, _)| prompt.len()).max().unwrap_or(0);
        Self {
            responses,
            answered: vec![false; responses.len()],
            scanned: 0,
            overlap: longest + PROMPT_SCAN_SLACK,
        }
    }

    /// Prompts seen in `raw` that have not been answered yet, each returned once
    fn scan(&mut self, raw: &[u8]) -> Vec<&'a (String, String)> {
        if self.answered.iter().all(|done| *done) {
            return Vec::new();
        }

        let start = self.scanned.saturating_sub(self.overlap).min(raw.len());
        self.scanned = raw.len();
        let seen = strip_ansi(&String::from_utf8_lossy(&raw[start..])).to_lowercase();

        let mut due = Vec::new();
        for (index, entry) in self.responses.iter().enumerate() {
            if !self.answered[index] && seen.contains(&entry.0.to_lowercase()) {
                self.answered[index] = true;
                due.push(entry);
            }
        }
        due
    }
}

async fn write_all(pipe: &mut ChildStdin, text: &str) -> std::io::Result<()> {
    pipe.write_all(text.as_bytes()).await?;
    pipe.flush().await
}

fn executable_names(binary: &str) -> Vec<String> {
    if cfg!(windows) {
        vec![
            format!("{}.exe", binary),
            format!("{}.cmd", binary),
            binary.to_string(),
        ]
    } else {
        vec![binary.to_string()]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
