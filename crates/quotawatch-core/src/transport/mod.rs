//! Transports the probes are built on
//!
//! Each transport owns the timeout of its own calls. Probes never impose an
//! outer timeout on top.
//!
//! - `cli` - run a CLI binary, answering interactive prompts
//! - `http` - one HTTP round-trip
//! - `rpc` - newline-delimited JSON-RPC over a child process' stdio
//! - `retry` - bounded backoff for best-effort enrichment lookups

pub mod cli;
pub mod http;
pub mod retry;
pub mod rpc;

pub use cli::{CliExecutor, CliOutput, CliRequest, ProcessCliExecutor};
pub use http::{HttpMethod, HttpRequest, HttpResponse, NetworkClient, ReqwestNetworkClient};
pub use retry::{retry_lookup, RetryPolicy};
pub use rpc::{RpcCall, RpcTransport, StdioRpcTransport};
