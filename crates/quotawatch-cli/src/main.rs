//! quotawatch CLI - AI coding assistant quota monitor
//!
//! Checks the remaining quota of Claude Code, Codex, Gemini, Copilot,
//! Antigravity and Z.ai, and logs alerts when a provider's status changes.

mod commands;
mod output;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quotawatch_core::{JsonSettingsStore, SettingsRepository};

#[derive(Parser)]
#[command(name = "quotawatch")]
#[command(author, version, about = "AI coding assistant quota monitor", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Override settings file path (or set QUOTAWATCH_CONFIG env var)
    #[arg(long, env = "QUOTAWATCH_CONFIG", global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh all enabled providers and show their quotas
    Status,

    /// Refresh one provider first, then the rest
    Refresh {
        /// Provider id (e.g. claude, codex, gemini)
        provider: String,
    },

    /// Keep monitoring and alert on status changes until Ctrl-C
    Watch {
        /// Polling interval in seconds (minimum 30)
        #[arg(long, short)]
        interval: Option<u64>,
    },

    /// List, enable or disable providers
    Providers {
        #[command(subcommand)]
        action: commands::providers::ProvidersAction,
    },
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let settings = match &cli.config {
        Some(path) => JsonSettingsStore::open(shellexpand::tilde(path).to_string())?,
        None => JsonSettingsStore::open_default()?,
    };
    let config = settings.monitor_config();

    // Create context for commands
    let ctx = commands::Context {
        settings: Arc::new(settings),
        config,
        format: cli.format,
        quiet: cli.quiet,
    };

    // Execute command
    match cli.command {
        Commands::Status => commands::status::execute(&ctx).await,
        Commands::Refresh { provider } => commands::status::refresh(&ctx, &provider).await,
        Commands::Watch { interval } => commands::watch::execute(&ctx, interval).await,
        Commands::Providers { action } => commands::providers::execute(&ctx, action).await,
    }
}
