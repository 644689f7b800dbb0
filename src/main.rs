//! feed-trigger: binary entrypoint.
//! Loads config, opens the store and runs the scheduler once or as a loop.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_trigger::ingest::providers::sources_from_config;
use feed_trigger::{AppConfig, NotifierRegistry, Scheduler, Store, SystemClock};

#[derive(Debug, Parser)]
#[command(name = "feed-trigger", version, about = "RSS ingestion and keyword trigger engine")]
struct Cli {
    /// Run a single cycle now (ignores the hour window) and exit.
    #[arg(long, conflicts_with = "start")]
    once: bool,

    /// Run the scheduler loop until SIGINT/SIGTERM.
    #[arg(long)]
    start: bool,

    /// Fetch and match, but persist nothing and send nothing.
    #[arg(long)]
    dry_run: bool,

    /// Config file (TOML, YAML or JSON by extension).
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(long, short = 'v')]
    verbose: bool,
}

/// Logs go to stderr. RUST_LOG wins over `--verbose`; LOG_FORMAT=json
/// switches to JSON lines.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "feed_trigger=debug,info"
    } else {
        "feed_trigger=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

/// Flip the watch channel on Ctrl-C or SIGTERM.
fn spawn_signal_listener(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable, Ctrl-C only");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("shutdown requested, finishing current cycle");
        let _ = tx.send(true);
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (mut cfg, path) = AppConfig::load(cli.config.as_deref())?;
    if cli.dry_run {
        cfg.scheduler.dry_run = true;
    }
    tracing::info!(
        config = ?path,
        feeds = cfg.feeds.len(),
        triggers = cfg.triggers.len(),
        dry_run = cfg.scheduler.dry_run,
        "configuration loaded"
    );

    let clock = Arc::new(SystemClock);
    let window = ChronoDuration::hours(i64::from(cfg.storage.dedup_window_hours));
    let store = Arc::new(Store::open(&cfg.storage.path, clock.clone(), window)?);
    let sources = sources_from_config(&cfg.feeds)?;
    let notifiers = NotifierRegistry::from_env();

    let mut scheduler = Scheduler::from_config(&cfg, clock, store, sources, notifiers);

    if cli.start {
        let (tx, rx) = watch::channel(false);
        spawn_signal_listener(tx);
        scheduler.run_loop(rx).await;
    } else {
        if !cli.once {
            tracing::info!("no mode flag given, running a single cycle (use --start for the loop)");
        }
        scheduler.run_once().await?;
    }
    Ok(())
}
