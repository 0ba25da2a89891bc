//! # content-sync CLI (`csync`)
//!
//! Pushes a local markdown corpus to a remote item store, sending only what
//! changed and soft-deleting what disappeared.
//!
//! ## Usage
//!
//! ```bash
//! csync --config ./config/csync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `csync init` | Create the item database and schema |
//! | `csync serve` | Start the reference item server |
//! | `csync sources` | List configured sources and their health |
//! | `csync sync <source> [locator]` | Reconcile a source against the remote store |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what a sync of ./docs would send
//! csync sync filesystem ./docs --remote http://127.0.0.1:7340
//!
//! # Apply it
//! csync sync filesystem ./docs --remote http://127.0.0.1:7340 --live
//!
//! # Sync a configured git source
//! csync sync git:handbook --live
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use content_sync::config::{self, Config};
use content_sync::executor::SyncMode;
use content_sync::progress::ProgressMode;
use content_sync::sync::{self, SyncRun};
use content_sync::{logging, migrate, server, sources};

const DEFAULT_CONFIG: &str = "./config/csync.toml";

#[derive(Parser)]
#[command(
    name = "csync",
    about = "content-sync: one-way reconciliation of a markdown corpus into a remote item store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/csync.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More diagnostic output on stderr (`-v` info, `-vv` debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the item database schema. Safe to run repeatedly.
    Init,

    /// Start the reference item server on `[server].bind`.
    Serve,

    /// List configured sources and whether they look usable.
    Sources,

    /// Reconcile a content source against the remote item store.
    ///
    /// Source format: `filesystem <root>`, `git <url>`, or `<type>:<name>`
    /// for an instance from the config file. Runs dry unless `--live`.
    Sync {
        /// `filesystem`, `git`, or `<type>:<name>`.
        source: String,

        /// Root directory or repository URL for an ad-hoc source.
        locator: Option<String>,

        /// Send the batch. Without this flag nothing is written.
        #[arg(long)]
        live: bool,

        /// Remote store base URL; overrides `[remote].base_url`.
        #[arg(long)]
        remote: Option<String>,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },
}

fn load(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                config::load_config(&default)
            } else {
                info!("no config at {}; using defaults", DEFAULT_CONFIG);
                Ok(Config::minimal())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let mut cfg = load(cli.config.as_ref())?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Sync {
            source,
            locator,
            live,
            remote,
            progress,
        } => {
            if let Some(remote) = remote {
                cfg.remote.base_url = Some(remote);
            }
            let mode = if live { SyncMode::Live } else { SyncMode::DryRun };
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();

            let run = SyncRun::new();
            let cancel = run.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted; cancelling sync");
                    cancel.cancel();
                }
            });

            sync::run_sync(
                &cfg,
                &source,
                locator.as_deref(),
                mode,
                &run,
                reporter.as_ref(),
            )
            .await?;
        }
    }

    Ok(())
}
