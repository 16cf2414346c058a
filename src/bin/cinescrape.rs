use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use cine_compare::db::Db;
use cine_compare::orchestrator::{run_scrape, RunConfig};
use cine_compare::fetch::StaticFetcher;
use cine_compare::types::{ProgressEvent, ScrapeMode, SelectionPayload, TenantContext};
use cine_compare::util::env as env_util;

/// Run one scrape batch from a JSON selection payload.
#[derive(Parser, Debug)]
#[command(name = "cinescrape", version, about = "Competitor showtime/price scrape runner")]
struct Cli {
    /// Selection payload: {tenant, concurrency?, mode?, targets: [...]}
    #[arg(long)]
    selection: PathBuf,
    /// Directory of captured fragment-set JSON files for the static fetcher
    #[arg(long, default_value = "captures")]
    captures: PathBuf,
    /// Override the payload's concurrency limit
    #[arg(long)]
    concurrency: Option<usize>,
    /// Record ticket prices as well as showings
    #[arg(long, default_value_t = false)]
    prices: bool,
    /// Optional override for the store DSN
    #[arg(long)]
    database_url: Option<String>,
    /// Per-target fetch+extract ceiling in seconds
    #[arg(long, default_value_t = 45)]
    target_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    cine_compare::trace::init_tracing("info")?;
    let cli = Cli::parse();

    let raw = std::fs::read_to_string(&cli.selection)
        .with_context(|| format!("reading selection payload {}", cli.selection.display()))?;
    let payload: SelectionPayload =
        serde_json::from_str(&raw).context("parsing selection payload")?;
    if payload.targets.is_empty() {
        warn!("selection payload contains no targets; nothing to do");
        return Ok(());
    }

    let database_url = match cli.database_url {
        Some(url) => url,
        None => env_util::db_url().unwrap_or_else(|_| "sqlite://cinecompare.db".to_string()),
    };
    let db = Db::connect(&database_url, 5).await?;

    let tenant = TenantContext::new(payload.tenant.clone());
    let mode = if cli.prices {
        ScrapeMode::DiscoveryAndPrice
    } else {
        payload.mode.unwrap_or_default()
    };
    let config = RunConfig {
        concurrency: cli
            .concurrency
            .or(payload.concurrency)
            .unwrap_or_else(|| env_util::env_parse("SCRAPE_CONCURRENCY", 4)),
        mode,
        per_target_timeout: std::time::Duration::from_secs(cli.target_timeout_secs),
        ..RunConfig::default()
    };

    let fetcher = Arc::new(StaticFetcher::new(cli.captures));

    // Drain progress into the log for live status.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let progress_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::TargetStarted { theater, date } => {
                    info!(%theater, %date, "target started")
                }
                ProgressEvent::TargetSucceeded {
                    theater,
                    date,
                    showings,
                    prices,
                } => info!(%theater, %date, showings, prices, "target succeeded"),
                ProgressEvent::TargetFailed {
                    theater,
                    date,
                    reason,
                } => warn!(%theater, %date, %reason, "target failed"),
            }
        }
    });

    let summary = run_scrape(&db, fetcher, &tenant, &payload.targets, &config, Some(tx), None).await?;
    let _ = progress_task.await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.succeeded == 0 && summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
