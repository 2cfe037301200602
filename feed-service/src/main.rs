//! Threat Intelligence Fetcher
//!
//! Scheduled poller for an upstream threat-intelligence feed. Each cycle
//! pulls recent indicators, deduplicates against the shared store and
//! persists the rest with trace context attached.
//!
//! ```text
//! External Feed ──> Fetch Cycle ──> PostgreSQL <── intel-server reads
//! ```

mod config;
mod db;
mod error;
mod feed;
mod ingest;
mod telemetry;

use std::time::Duration;

use clap::Parser;
use tokio::time::MissedTickBehavior;

#[derive(Parser)]
#[command(name = "threatintel-fetcher", about = "Threat feed ingestion service")]
struct Cli {
    /// Run a single fetch cycle and exit
    #[arg(long)]
    fetch_now: bool,

    /// Override the poll interval in seconds
    #[arg(long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = config::Config::from_env();

    // Initialize telemetry (logging, traces, metrics)
    let telemetry = telemetry::Telemetry::init(&config);

    if config.feed_api_key.is_empty() {
        anyhow::bail!("OTX_API_KEY is not set");
    }

    tracing::info!("Threat Intel Fetcher starting...");
    tracing::info!("Feed: {}", config.feed_url);
    tracing::info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );

    // Initialize database pool and schema
    let pool = db::create_pool(&config.database_url).await?;
    db::ensure_schema(&pool).await?;

    let client = feed::FeedClient::new(&config)?;
    let metrics = telemetry.fetch_metrics(&config);

    if cli.fetch_now {
        if let Err(e) = ingest::run_cycle(&pool, &client, &metrics, &config.feed_source).await {
            tracing::error!("Fetch cycle failed: {e}");
        }
        telemetry.force_flush();
        telemetry.shutdown();
        return Ok(());
    }

    let interval_secs = cli.interval.unwrap_or(config.poll_interval_secs);
    tracing::info!("🚀 Running every {interval_secs}s");

    // One cycle runs to completion before the next tick; an overrunning
    // cycle skews the schedule instead of overlapping it.
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match ingest::run_cycle(&pool, &client, &metrics, &config.feed_source).await {
                    Ok(report) => tracing::debug!(
                        fetched = report.fetched,
                        inserted = report.inserted,
                        duplicates = report.duplicates,
                        "Fetch cycle complete"
                    ),
                    // Cycle-scoped: the next tick retries independently
                    Err(e) => tracing::error!("Fetch cycle failed: {e}"),
                }
                telemetry.force_flush();
                tracing::debug!("📤 Telemetry flushed");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    telemetry.shutdown();
    Ok(())
}
