use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::Error as DotenvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

use servicedash::app::AppContext;
use servicedash::config::{self, AppConfig};
use servicedash::history::HistoryStore;
use servicedash::metrics::AppMetrics;
use servicedash::normalize::{Normalizer, SeverityTables};
use servicedash::sources::HttpFetcher;
use servicedash::{db, poller};

#[derive(Debug, Parser)]
#[command(author, version, about = "servicedash: service status, market and forecast poller")]
struct Cli {
    /// Path to YAML configuration file. Defaults to env SERVICEDASH_CONFIG or ./servicedash.yaml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll every entity on the configured interval and record history.
    Poll {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Print the current dashboard snapshot as JSON.
    Snapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;
    let ctx = build_context(config).await?;

    match cli.command.unwrap_or(Command::Poll { once: false }) {
        Command::Poll { once: true } => {
            poller::run_cycle(&ctx).await?;
        }
        Command::Poll { once: false } => {
            let handle = poller::spawn(ctx.clone());
            shutdown_signal().await;
            handle.abort();
        }
        Command::Snapshot => {
            let snapshot = ctx.query().snapshot().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).context("failed to encode snapshot")?
            );
        }
    }

    Ok(())
}

async fn build_context(config: AppConfig) -> anyhow::Result<AppContext> {
    let pool = db::create_pool(&config.database_path).await?;
    let store = HistoryStore::new(pool)
        .await
        .context("failed to prepare history schema")?;
    let entities = config.tracked_entities();
    store.register_entities(&entities).await?;

    let normalizer = Normalizer::new(SeverityTables::with_overrides(&config.severity));
    let fetcher = HttpFetcher::new(&config.http, normalizer)?;
    let metrics = AppMetrics::new()?;

    AppContext::new(config, store, metrics, Arc::new(fetcher))
}

fn load_env() {
    if let Err(err) = dotenvy::dotenv() {
        match err {
            DotenvError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {}
            other => eprintln!("warning: failed to load .env file: {other}"),
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("servicedash=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = ?err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = ?err, "failed to install SIGTERM handler");
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

    info!("shutdown signal received");
}
