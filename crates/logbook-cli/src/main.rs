//! Logbook CLI - log entries from the terminal, offline first
//!
//! Every command works against the local store; sync runs when a remote is
//! configured and reachable.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};
use logbook_core::SyncSettings;

use crate::cli::{Cli, Commands};
use crate::commands::add::{run_add, AddArgs};
use crate::commands::attach::run_attach;
use crate::commands::common::Workspace;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::status::run_status;
use crate::commands::sweep::run_sweep;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("logbook=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = SyncSettings::from_env()?;
    let workspace = Workspace::new(settings, cli.data_dir)?;
    tracing::debug!("Using data directory {}", workspace.data_dir.display());
    let offline = cli.offline;

    match cli.command {
        Some(Commands::Add {
            text,
            category,
            at,
            attributes,
            photo,
        }) => {
            let args = AddArgs {
                text,
                category,
                at,
                attributes,
                photo,
            };
            run_add(args, &workspace, offline).await?;
        }
        Some(Commands::List {
            limit,
            pending,
            json,
        }) => run_list(limit, pending, json, &workspace)?,
        Some(Commands::Edit { id, text, category }) => {
            run_edit(&id, &text, category.as_deref(), &workspace, offline).await?;
        }
        Some(Commands::Delete { ids }) => run_delete(&ids, &workspace, offline).await?,
        Some(Commands::Attach { id, path }) => {
            run_attach(&id, &path, &workspace, offline).await?;
        }
        Some(Commands::Sync { command, watch }) => run_sync(command, watch, &workspace).await?,
        Some(Commands::Sweep { days }) => run_sweep(days, &workspace).await?,
        Some(Commands::Status { json }) => run_status(json, &workspace)?,
        None => {
            // Quick capture mode: logbook "oatmeal with berries"
            if cli.entry.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                let args = AddArgs {
                    text: cli.entry,
                    category: None,
                    at: None,
                    attributes: Vec::new(),
                    photo: None,
                };
                run_add(args, &workspace, offline).await?;
            }
        }
    }

    Ok(())
}
