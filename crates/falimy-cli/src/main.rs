//! Falimy CLI - family lists from the terminal
//!
//! Works against the local replica and syncs with the family's server when
//! asked to.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, ItemCommands, ListCommands};
use crate::commands::common::CliContext;
use crate::error::CliError;

/// The binary logs under `falimy`, the sync layer under `falimy_core`.
const DEFAULT_LOG_FILTER: &str = "falimy=info,falimy_core=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Config { command } = cli.command {
        return commands::config::run_config(command, cli.profile.as_deref());
    }

    let ctx = CliContext::resolve(cli.profile.as_deref(), cli.db_path)?;
    match cli.command {
        Commands::Config { .. } => Ok(()),
        Commands::Auth { command } => commands::auth_cmd::run_auth(command, &ctx).await,
        Commands::Sync => commands::sync::run_sync(&ctx).await,
        Commands::Status => commands::sync::run_status(&ctx).await,
        Commands::Lists { status, json } => {
            commands::list::run_lists(&ctx, status.map(Into::into), json).await
        }
        Commands::Items { list, json } => commands::list::run_items(&ctx, &list, json).await,
        Commands::Members { json } => commands::list::run_members(&ctx, json).await,
        Commands::List { command } => match command {
            ListCommands::Add { name, list_type } => {
                commands::add::run_list_add(&ctx, &name, list_type.into()).await
            }
        },
        Commands::Item { command } => match command {
            ItemCommands::Add {
                list,
                name,
                quantity,
                note,
            } => commands::add::run_item_add(&ctx, &list, &name, quantity, note).await,
            ItemCommands::Check { item } => commands::check::run_item_check(&ctx, &item).await,
            ItemCommands::Delete { item } => commands::delete::run_item_delete(&ctx, &item).await,
        },
        Commands::Watch { seconds } => commands::watch::run_watch(&ctx, seconds).await,
    }
}
