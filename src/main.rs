use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bitbucket_sync::config::{Config, LogFormat, LoggingConfig};
use bitbucket_sync::sync::worker_count;
use bitbucket_sync::{
    BitbucketClient, Credentials, ProcessRunner, RepositoryLister, Shutdown, SyncEngine,
};

#[derive(Parser)]
#[command(name = "bitbucket-sync")]
#[command(about = "Mirror every Bitbucket repository you can access into a local directory")]
#[command(version)]
struct Cli {
    /// Bitbucket OAuth consumer key
    #[arg(long, env = "BITBUCKET_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Bitbucket OAuth consumer secret
    #[arg(long, env = "BITBUCKET_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Directory to mirror repositories into
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Only mirror repositories owned by this account or workspace
    #[arg(long, visible_alias = "account")]
    owner: Option<String>,

    /// Number of parallel workers (defaults to the number of CPUs)
    #[arg(short, long)]
    processes: Option<String>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::resolve(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging);
    info!("Starting bitbucket-sync v{}", env!("CARGO_PKG_VERSION"));

    let directory = cli
        .directory
        .or_else(|| config.mirror.directory.as_ref().map(PathBuf::from))
        .context("Missing mirror directory. Pass --directory or set mirror.directory in the config file")?;

    let credentials = Credentials::resolve(
        cli.key.or_else(|| config.bitbucket.key.clone()),
        cli.secret.or_else(|| config.bitbucket.secret.clone()),
    )?;

    let requested = cli
        .processes
        .or_else(|| config.mirror.processes.map(|n| n.to_string()));
    let workers = worker_count(requested.as_deref());
    debug!("Using {} workers", workers);

    let shutdown = Shutdown::new();
    shutdown.listen_for_ctrl_c();

    let client = BitbucketClient::authenticate(&config.bitbucket.token_url, &credentials)
        .await
        .context("Failed to authenticate with Bitbucket")?;

    let lister = RepositoryLister::new(
        Arc::new(client),
        config.bitbucket.api_url.clone(),
        cli.owner.or_else(|| config.bitbucket.owner.clone()),
    );
    let engine = SyncEngine::new(
        lister,
        Arc::new(ProcessRunner),
        config.clone_urls(),
        workers,
    );

    let summary = engine.run(&directory, &shutdown).await?;

    if summary.cancelled {
        println!(
            "⚠️  Interrupted: {} of {} repositories synchronised, {} not started",
            summary.synchronised(),
            summary.total_repositories,
            summary.abandoned
        );
    } else {
        println!(
            "✅ {} of {} repositories synchronised in {:.2}s ({} cloned, {} updated)",
            summary.synchronised(),
            summary.total_repositories,
            summary.duration.as_secs_f64(),
            summary.cloned,
            summary.updated
        );
    }

    if summary.failed > 0 {
        println!("❌ {} repositories failed:", summary.failed);
        for failure in summary.failures() {
            println!("   • {}", failure.repository);
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout only carries per-repository report lines
fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(logging.color);

    match logging.format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(layer.compact())
            .with(filter)
            .init(),
        LogFormat::Full => tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .init(),
    }
}
