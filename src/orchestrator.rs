//! Scrape-run orchestration: fan targets out over a bounded worker pool,
//! isolate per-target failures, retry transients once, and aggregate a
//! run-level result under one ScrapeRun.
//!
//! Ordering: none between targets; within a target strictly
//! fetch -> extract -> normalize/classify -> persist. Only the fetch step
//! suspends; everything downstream of it is synchronous and fast.

use anyhow::Result;
use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{error, info, warn};

use crate::classify::{classify, DaypartConfig};
use crate::db::audit::{record_unmatched_ticket_type, UnmatchedContext};
use crate::db::runs::{close_run, open_run, RunId, RunStatus};
use crate::db::showings::{append_price, upsert_showing, ShowingRecord};
use crate::db::Db;
use crate::extract::extract;
use crate::fetch::{FetchError, PageFetcher};
use crate::taxonomy::{BaseType, NormalizeOutcome, TaxonomyTable};
use crate::types::{
    CandidateShowing, FailureReason, ProgressEvent, RunSummary, ScrapeMode, ScrapeTarget,
    TenantContext,
};

/// Read-only per-run configuration, loaded once and shared by all workers.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum simultaneously active fetch pipelines.
    pub concurrency: usize,
    pub mode: ScrapeMode,
    /// Ceiling on fetch + extract per target; exceeding it counts as a
    /// transient failure eligible for the single retry.
    pub per_target_timeout: Duration,
    pub taxonomy: TaxonomyTable,
    pub dayparts: DaypartConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            mode: ScrapeMode::Discovery,
            per_target_timeout: Duration::from_secs(45),
            taxonomy: TaxonomyTable::builtin(),
            dayparts: DaypartConfig::default(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TargetStats {
    showings_created: u64,
    prices_recorded: u64,
}

struct TargetOutcome {
    target: ScrapeTarget,
    result: Result<TargetStats, FailureReason>,
}

/// Execute one scrape run over the given targets.
///
/// Each target runs in isolation; a failure (or panic) in one never aborts or
/// delays the others. The run is `Failed` only when at least one target was
/// dispatched and none succeeded; partial failure is surfaced in the
/// summary, not as an error.
pub async fn run_scrape(
    db: &Db,
    fetcher: Arc<dyn PageFetcher>,
    tenant: &TenantContext,
    targets: &[ScrapeTarget],
    config: &RunConfig,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<RunSummary> {
    let run = open_run(db, tenant, config.mode).await?;
    info!(
        run_id = %run,
        tenant = %tenant.tenant_id,
        targets = targets.len(),
        concurrency = config.concurrency,
        mode = ?config.mode,
        "scrape run start"
    );

    let sem = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut futs: FuturesUnordered<tokio::task::JoinHandle<TargetOutcome>> =
        FuturesUnordered::new();
    let mut cancelled = 0usize;
    let mut dispatching = true;

    for target in targets.iter().cloned() {
        if dispatching && cancel_requested(&cancel) {
            info!(run_id = %run, "cancellation observed; no further targets dispatched");
            dispatching = false;
        }
        if !dispatching {
            cancelled += 1;
            continue;
        }

        // Owned permit acquired before spawn: dispatch itself respects the
        // concurrency bound.
        let permit = sem.clone().acquire_owned().await?;
        // The permit wait can outlast a cancellation signal; check again
        // before committing this target.
        if cancel_requested(&cancel) {
            info!(run_id = %run, "cancellation observed; no further targets dispatched");
            dispatching = false;
            cancelled += 1;
            continue;
        }
        let db = db.clone();
        let fetcher = fetcher.clone();
        let tenant = tenant.clone();
        let run = run.clone();
        let config = config.clone();
        let progress = progress.clone();

        futs.push(tokio::spawn(async move {
            let _permit = permit;
            send_event(
                &progress,
                ProgressEvent::TargetStarted {
                    theater: target.theater.clone(),
                    date: target.date,
                },
            );
            let result =
                process_target(&db, fetcher.as_ref(), &tenant, &run, &target, &config).await;
            match &result {
                Ok(stats) => send_event(
                    &progress,
                    ProgressEvent::TargetSucceeded {
                        theater: target.theater.clone(),
                        date: target.date,
                        showings: stats.showings_created,
                        prices: stats.prices_recorded,
                    },
                ),
                Err(reason) => send_event(
                    &progress,
                    ProgressEvent::TargetFailed {
                        theater: target.theater.clone(),
                        date: target.date,
                        reason: *reason,
                    },
                ),
            }
            TargetOutcome { target, result }
        }));
    }

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut failure_reasons: Vec<String> = Vec::new();
    let mut showings_created = 0u64;
    let mut prices_recorded = 0u64;

    while let Some(joined) = futs.next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_err) => {
                // A panicked target counts as its own failure, nothing more.
                error!(run_id = %run, error = %join_err, "target task panicked");
                failed += 1;
                failure_reasons.push(FailureReason::Unknown.as_str().to_string());
                continue;
            }
        };
        match outcome.result {
            Ok(stats) => {
                succeeded += 1;
                showings_created += stats.showings_created;
                prices_recorded += stats.prices_recorded;
            }
            Err(reason) => {
                warn!(
                    run_id = %run,
                    theater = %outcome.target.theater,
                    date = %outcome.target.date,
                    reason = %reason,
                    "target failed"
                );
                failed += 1;
                failure_reasons.push(reason.as_str().to_string());
            }
        }
    }

    let status = if failed > 0 && succeeded == 0 {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    };
    let error_summary = if failure_reasons.is_empty() {
        None
    } else {
        Some(failure_reasons.join(","))
    };
    close_run(db, &run, status, succeeded, failed, error_summary.as_deref()).await?;

    info!(
        run_id = %run,
        succeeded,
        failed,
        cancelled,
        showings_created,
        prices_recorded,
        status = status.as_str(),
        "scrape run finished"
    );

    Ok(RunSummary {
        run_id: run.to_string(),
        succeeded,
        failed,
        cancelled,
        failure_reasons,
        showings_created,
        prices_recorded,
    })
}

fn cancel_requested(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

fn send_event(progress: &Option<mpsc::UnboundedSender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = progress {
        // Consumer gone is not our problem; events are advisory.
        let _ = tx.send(event);
    }
}

/// One target, start to finish: fetch+extract under the per-target ceiling
/// (with a single retry on transient failure), then classify and persist.
async fn process_target(
    db: &Db,
    fetcher: &dyn PageFetcher,
    tenant: &TenantContext,
    run: &RunId,
    target: &ScrapeTarget,
    config: &RunConfig,
) -> Result<TargetStats, FailureReason> {
    let mut candidates = match fetch_and_extract(fetcher, target, config).await {
        Ok(candidates) => candidates,
        Err(reason) if reason.is_transient() => {
            info!(
                theater = %target.theater,
                date = %target.date,
                reason = %reason,
                "transient fetch failure; retrying once"
            );
            fetch_and_extract(fetcher, target, config).await?
        }
        Err(reason) => return Err(reason),
    };

    apply_filters(&mut candidates, target);

    let mut stats = TargetStats::default();
    for candidate in &candidates {
        let (is_plf, daypart) = classify(&candidate.format, candidate.showtime, &config.dayparts);
        let record = ShowingRecord {
            show_date: target.date,
            theater: target.theater.clone(),
            film_title: candidate.film_title.clone(),
            showtime: candidate.showtime,
            format: candidate.format.clone(),
            is_plf,
            daypart,
        };
        let (showing, created) = upsert_showing(db, tenant, run, &record).await.map_err(|e| {
            error!(
                theater = %target.theater,
                film = %candidate.film_title,
                error = %e,
                "showing upsert failed"
            );
            FailureReason::Unknown
        })?;
        if created {
            stats.showings_created += 1;
        }

        if config.mode != ScrapeMode::DiscoveryAndPrice {
            continue;
        }
        for ticket in &candidate.tickets {
            let observed_at = Utc::now();
            let (base, amenities) = match config.taxonomy.normalize(&ticket.description) {
                NormalizeOutcome::Matched { base, amenities } => (base, amenities),
                NormalizeOutcome::Unmatched { fragment } => {
                    let showtime = candidate.showtime.format("%H:%M").to_string();
                    let ctx = UnmatchedContext {
                        theater: Some(&target.theater),
                        film_title: Some(&candidate.film_title),
                        showtime: Some(&showtime),
                    };
                    record_unmatched_ticket_type(db, tenant, &fragment, ctx, observed_at)
                        .await
                        .map_err(|e| {
                            error!(fragment = %fragment, error = %e, "unmatched audit write failed");
                            FailureReason::Unknown
                        })?;
                    // Still persisted, with the explicit unclassified marker.
                    (BaseType::Unclassified, Default::default())
                }
            };
            append_price(
                db,
                tenant,
                showing,
                run,
                base,
                &amenities,
                ticket.amount_minor,
                observed_at,
            )
            .await
            .map_err(|e| {
                error!(
                    theater = %target.theater,
                    film = %candidate.film_title,
                    error = %e,
                    "price append failed"
                );
                FailureReason::Unknown
            })?;
            stats.prices_recorded += 1;
        }
    }
    Ok(stats)
}

/// Fetch and extract under the per-target ceiling. Maps every failure to its
/// typed reason; nothing is swallowed. A page whose showtime entries all get
/// skipped (e.g. every time reads "Sold Out") is still a success, just with
/// nothing to persist; each skip is logged by the extractor.
async fn fetch_and_extract(
    fetcher: &dyn PageFetcher,
    target: &ScrapeTarget,
    config: &RunConfig,
) -> Result<Vec<CandidateShowing>, FailureReason> {
    let timed = tokio::time::timeout(config.per_target_timeout, async {
        let fragments = fetcher.fetch(target).await?;
        Ok::<_, FetchError>(extract(&fragments))
    })
    .await;
    match timed {
        Err(_elapsed) => Err(FailureReason::FetchTimeout),
        Ok(Err(FetchError::Timeout)) => Err(FailureReason::FetchTimeout),
        Ok(Err(FetchError::Navigation(msg))) => {
            warn!(theater = %target.theater, date = %target.date, %msg, "navigation failure");
            Err(FailureReason::FetchError)
        }
        Ok(Err(FetchError::ContentMissing(snippet))) => {
            warn!(
                theater = %target.theater,
                date = %target.date,
                snippet = %snippet,
                "expected content absent; possible site-structure change"
            );
            Err(FailureReason::StructureChanged)
        }
        Ok(Ok(candidates)) => Ok(candidates),
    }
}

/// Narrow candidates to the target's optional film/showtime filters.
fn apply_filters(candidates: &mut Vec<CandidateShowing>, target: &ScrapeTarget) {
    if let Some(film) = &target.film_filter {
        candidates.retain(|c| c.film_title.eq_ignore_ascii_case(film));
    }
    if let Some(showtime) = target.showtime_filter {
        candidates.retain(|c| c.showtime == showtime);
    }
}
