use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chan_webm_archiver::api::ApiClient;
use chan_webm_archiver::config::Config;
use chan_webm_archiver::db::Database;
use chan_webm_archiver::harvest::{FfmpegThumbnailer, Harvester};
use chan_webm_archiver::reconcile;

enum Mode {
    Harvest,
    Spider { backfill: bool },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Fatal error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Returns `false` when a pass ended with a filesystem or database failure.
async fn run() -> Result<bool> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let mode = parse_mode(std::env::args().skip(1))?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        host = %config.host_name,
        boards = %config.boards.join(","),
        media_dir = %config.media_dir.display(),
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.media_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create media directory: {}",
                config.media_dir.display()
            )
        })?;

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::for_config(&config)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    match mode {
        Mode::Spider { backfill } => {
            reconcile::run(&config, &db, backfill).await?;
            Ok(true)
        }
        Mode::Harvest => harvest_loop(&config, db).await,
    }
}

async fn harvest_loop(config: &Config, db: Database) -> Result<bool> {
    let api = ApiClient::new(config).context("Failed to build HTTP client")?;
    let thumbnailer = Arc::new(FfmpegThumbnailer::from_config(config));
    let harvester = Harvester::from_config(config, db, api, thumbnailer);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, finishing threads in progress");
        signal_cancel.cancel();
    });

    loop {
        let report = harvester.run_pass(&cancel).await?;
        let totals = report.totals();
        info!(
            boards = report.boards.len(),
            threads_scanned = totals.threads_scanned,
            media_created = totals.media_created,
            aliases_recorded = totals.aliases_recorded,
            download_failures = totals.download_failures,
            thumbnail_failures = totals.thumbnail_failures,
            cancelled = report.cancelled,
            "Pass complete"
        );

        if report.has_fatal() {
            for board in report.boards.iter().filter(|b| b.fatal) {
                error!(
                    board = %board.board,
                    reason = board.aborted.as_deref().unwrap_or("unknown"),
                    "Board failed with a storage error"
                );
            }
            return Ok(false);
        }

        if config.poll_interval.is_zero() || cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(config.poll_interval) => {}
        }
    }

    info!("Shutdown complete");
    Ok(true)
}

fn parse_mode(mut args: impl Iterator<Item = String>) -> Result<Mode> {
    match args.next().as_deref() {
        None => Ok(Mode::Harvest),
        Some("spider") => {
            let mut backfill = false;
            for arg in args {
                match arg.as_str() {
                    "--backfill" => backfill = true,
                    other => bail!("Unknown spider option: {other}"),
                }
            }
            Ok(Mode::Spider { backfill })
        }
        Some(other) => {
            warn!(arg = %other, "Unknown command");
            bail!("Usage: chan-webm-archiver [spider [--backfill]]")
        }
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chan_webm_archiver=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
