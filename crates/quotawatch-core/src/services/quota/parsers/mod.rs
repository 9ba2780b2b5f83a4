//! Pure parsers turning raw CLI text or API JSON into usage snapshots
//!
//! No parser performs I/O; every one fails with `ProbeError::ParseFailed`
//! when the input has no recognisable quota fields.

pub mod antigravity;
pub mod claude;
pub mod claude_api;
pub mod codex;
pub mod copilot;
pub mod gemini;
pub mod text;
pub mod timestamp;
pub mod zai;

pub use timestamp::FlexibleTimestamp;
