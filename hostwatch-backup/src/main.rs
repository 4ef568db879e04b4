#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use confique::Config;
use hostwatch_model::eventlog::AppendLog;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::transfer::{BackupJob, Transfer};

mod history;
mod transfer;

#[derive(Debug, Parser)]
#[command(name = "hostwatch-backup")]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "Path to config file")]
    config_path: Option<String>,
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Mirror the source directory to the destination once
    Run {
        /// Only report what would be transferred
        #[arg(long)]
        dry_run: bool,
    },

    /// Show recent backup outcomes from the log
    #[command(visible_alias = "ls")]
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Config, Debug)]
pub struct Conf {
    /// Directory to back up, required by `run`
    #[config(env = "HOSTWATCH_BACKUP_SOURCE")]
    pub source: Option<PathBuf>,

    /// Transfer destination, e.g. `backup@nas:/backups`, required by `run`
    #[config(env = "HOSTWATCH_BACKUP_DESTINATION")]
    pub destination: Option<String>,

    /// Event log backup outcomes are appended to
    #[config(default = "backup.log", env = "HOSTWATCH_BACKUP_LOG")]
    pub log_path: PathBuf,

    /// Transfer tool executable
    #[config(default = "rsync", env = "HOSTWATCH_RSYNC")]
    pub rsync_path: PathBuf,

    /// Transfer is killed after this many seconds
    #[config(default = 3600, env = "HOSTWATCH_BACKUP_TIMEOUT")]
    pub timeout_secs: u64,

    /// Passed to the transfer tool before source and destination
    #[config(default = [])]
    pub extra_args: Vec<String>,
}

fn config(path: &str) -> anyhow::Result<Conf> {
    Conf::builder()
        .env()
        .file(path)
        .load()
        .map_err(|e| e.into())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    trace!("using command line arguments {:?}", cli);

    let config = config(&cli.config_path.unwrap_or("hostwatch-backup.toml".to_owned()))?;
    trace!("using config {:?}", config);

    match cli.commands {
        Commands::Run { dry_run } => {
            let job = BackupJob::from_conf(&config)?;
            // failing to write the event log is fatal
            let mut event_log = AppendLog::open(&config.log_path)?;

            let shutdown = CancellationToken::new();
            tokio::spawn(shutdown_signal(shutdown.clone()));

            info!(
                source = %job.source.display(),
                destination = %job.destination,
                dry_run,
                "starting backup"
            );
            let transfer = Transfer::rsync(&config, &job, dry_run);
            let outcome = transfer::run_backup(&transfer, &job, &mut event_log, &shutdown).await?;
            transfer::ensure_success(&outcome)?;
        }
        Commands::History { limit } => history::print_history(&config.log_path, limit)?,
        Commands::Config => println!("{config:#?}"),
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                #[cfg(debug_assertions)]
                let default_log_level = format!(
                    "{}=debug,hostwatch_model=debug",
                    env!("CARGO_CRATE_NAME")
                )
                .into();

                #[cfg(not(debug_assertions))]
                let default_log_level = format!(
                    "{}=info,hostwatch_model=info",
                    env!("CARGO_CRATE_NAME")
                )
                .into();

                default_log_level
            }),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("unable to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("unable to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown requested");
    token.cancel();
}
