//! Fetcher entrypoint: loads configuration, wires the search API, scoring
//! service and SQLite store, then runs the scheduler until Ctrl-C.

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sentiment_fetcher::config::{load_targets_from, FetcherConfig, LogFormat};
use sentiment_fetcher::ingest::providers::TwitterSearch;
use sentiment_fetcher::ingest::{CycleSettings, FetchCycle, Scheduler, SchedulerSettings};
use sentiment_fetcher::metrics::Metrics;
use sentiment_fetcher::sentiment::HttpScoringService;
use sentiment_fetcher::storage::SqliteStore;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sentiment_fetcher=info,warn"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("ctrl-c received, stopping");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();

    let cfg = FetcherConfig::from_env()?;
    init_tracing(cfg.log_format);

    let targets = load_targets_from(&cfg.targets_path)
        .with_context(|| format!("loading targets from {}", cfg.targets_path.display()))?;
    tracing::info!(
        targets = targets.len(),
        path = %cfg.targets_path.display(),
        "loaded target registry"
    );

    let store = SqliteStore::open(&cfg.db_path)?;
    let search = TwitterSearch::new(&cfg.twitter_api_base, &cfg.twitter_key, &cfg.twitter_secret)?;
    let scorer = Arc::new(HttpScoringService::new(
        &cfg.sentiment_url(),
        cfg.sentiment_timeout,
    )?);

    let _metrics_task = match cfg.metrics_addr {
        Some(addr) => Some(Metrics::init()?.serve(addr).await?),
        None => None,
    };

    let cycle = Arc::new(FetchCycle::new(
        Arc::new(search),
        scorer.clone(),
        Arc::new(store),
        &targets,
        CycleSettings {
            language: cfg.language.clone(),
            page_size: cfg.page_size,
            max_attempts: cfg.max_attempts,
            retry_delay: cfg.retry_delay,
        },
    ));
    let scheduler = Scheduler::new(
        cycle,
        targets,
        SchedulerSettings {
            interval: cfg.fetch_interval,
            startup_delay: cfg.startup_delay,
            concurrency: cfg.concurrency,
        },
    );

    let ready = async move {
        scorer
            .probe()
            .await
            .context("scoring service must be reachable before the first pass")
    };
    scheduler.run_until(ready, shutdown_signal()).await
}
