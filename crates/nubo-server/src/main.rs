//! # Nubo Server
//!
//! Entry point for the sync service and its administration commands.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`RUST_LOG`, default `info`)
//! 2. Load configuration (TOML file, then `NUBO_*` environment)
//! 3. Run the subcommand; `serve` blocks until Ctrl+C

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use nubo_sync::admin;
use nubo_sync::{FsArchiveStorage, ServerConfig, SqliteStoreProvider, SyncService};

/// Nubo sync server
#[derive(Parser, Debug)]
#[command(name = "nubo-server", version)]
#[command(about = "Single-endpoint MessagePack file sync server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Create the database and store the install password
    Install {
        #[arg(long)]
        password: String,
    },
    /// List registered computers
    Computers,
    /// Delete a computer registration
    Revoke { computer_id: i64 },
    /// List stored files
    Files,
    /// Delete a stored file
    RemoveFile { file_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref()).context("loading configuration")?;
    let stores = SqliteStoreProvider::new(config.database_path());

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await?,
        Command::Install { password } => {
            admin::install(&config, &stores, &password).context("install failed")?;
            println!("Installed at {}", config.database_path().display());
        }
        Command::Computers => {
            for c in admin::list_computers(&stores)? {
                println!(
                    "{:>5}  {:<20} {:<20} {:<19}  {}",
                    c.computer_id, c.hostname, c.computer, c.last_access, c.status
                );
            }
        }
        Command::Revoke { computer_id } => {
            admin::revoke_computer(&stores, computer_id)?;
            println!("Revoked computer {computer_id}");
        }
        Command::Files => {
            for f in admin::list_files(&stores)? {
                let kind = if f.is_directory { "dir " } else { "file" };
                println!(
                    "{:>5}  {kind}  {:<width$}  {}",
                    f.file_id,
                    f.name,
                    f.modified,
                    width = admin::FILE_NAME_WIDTH
                );
            }
        }
        Command::RemoveFile { file_id } => {
            let archives = FsArchiveStorage::new(config.storage.data_dir.clone());
            admin::remove_file(&stores, &archives, file_id)?;
            println!("Removed file {file_id}");
        }
    }

    Ok(())
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!(version = nubo_sync::VERSION, "Starting Nubo server");

    let mut service = SyncService::from_config(config).context("building sync service")?;
    if let Some(handle) = service.shutdown_handle() {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl+C received, shutting down"),
                Err(e) => warn!(error = %e, "Cannot listen for Ctrl+C, shutting down"),
            }
            handle.shutdown();
        });
    }

    service.run().await?;
    info!("Nubo server stopped");
    Ok(())
}
