//! Provider management commands
//!
//! List the known providers and toggle which ones are monitored.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{print_output, print_success};

#[derive(Subcommand)]
pub enum ProvidersAction {
    /// List all providers
    List,

    /// Enable a provider
    Enable {
        /// Provider id (e.g. copilot)
        id: String,
    },

    /// Disable a provider
    Disable {
        /// Provider id (e.g. codex)
        id: String,
    },
}

/// Provider row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ProviderRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Enabled")]
    pub enabled: bool,
    #[tabled(rename = "Available")]
    pub available: bool,
    #[tabled(rename = "CLI")]
    pub cli: String,
    #[tabled(rename = "Dashboard")]
    pub dashboard: String,
}

pub async fn execute(ctx: &Context, action: ProvidersAction) -> Result<()> {
    match action {
        ProvidersAction::List => list_providers(ctx).await,
        ProvidersAction::Enable { id } => set_enabled(ctx, &id, true),
        ProvidersAction::Disable { id } => set_enabled(ctx, &id, false),
    }
}

async fn list_providers(ctx: &Context) -> Result<()> {
    let registry = ctx.registry();
    let mut rows = Vec::new();

    for provider in registry.all() {
        let info = provider.info();
        rows.push(ProviderRow {
            id: info.id.clone(),
            name: info.name.clone(),
            enabled: provider.is_enabled(),
            available: provider.is_available().await,
            cli: info.cli_command.clone(),
            dashboard: info.dashboard_url.clone().unwrap_or_else(|| "-".to_string()),
        });
    }

    print_output(&rows, ctx.format)
}

fn set_enabled(ctx: &Context, id: &str, enabled: bool) -> Result<()> {
    ctx.registry().set_enabled(id, enabled)?;
    print_success(
        &format!("{} {}", if enabled { "Enabled" } else { "Disabled" }, id),
        ctx.quiet,
    );
    Ok(())
}
