//! Utility functions for quotawatch-core

use std::ffi::OsStr;
use std::path::PathBuf;

use tokio::process::Command;

/// Creates an async Command that hides the console window on Windows.
///
/// On Windows, a background monitor spawning console processes (like `claude`)
/// would flash visible CMD windows. This configures the Command with the
/// CREATE_NO_WINDOW flag on Windows to prevent this.
///
/// # Example
/// ```ignore
/// use quotawatch_core::utils::create_command;
///
/// let output = create_command("codex")
///     .arg("app-server")
///     .output()
///     .await?;
/// ```
pub fn create_command(program: impl AsRef<OsStr>) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);

    #[cfg(target_os = "windows")]
    {
        // CREATE_NO_WINDOW = 0x08000000
        cmd.creation_flags(0x08000000);
    }

    cmd
}

/// The user's home directory, falling back to the current directory.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Truncate a string for log output without splitting a UTF-8 character.
pub fn truncate_for_log(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_command_returns_command() {
        let cmd = create_command("echo");
        // Just verify it creates a valid Command
        assert!(format!("{:?}", cmd).contains("echo"));
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("hello world", 5), "hello");
        assert_eq!(truncate_for_log("short", 50), "short");
        assert_eq!(truncate_for_log("héllo", 2), "hé");
    }

    #[test]
    fn test_home_dir_is_not_empty() {
        assert!(!home_dir().as_os_str().is_empty());
    }
}
