//! ScrapeRun rows: opened at orchestration start, closed exactly once with a
//! terminal status. Immutable after close.

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::Db;
use crate::types::{ScrapeMode, TenantContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Opaque handle to an open ScrapeRun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId(pub Uuid);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Insert a new run in `running` state and return its id.
pub async fn open_run(db: &Db, tenant: &TenantContext, mode: ScrapeMode) -> Result<RunId> {
    let id = Uuid::new_v4();
    let mode_str = match mode {
        ScrapeMode::Discovery => "discovery",
        ScrapeMode::DiscoveryAndPrice => "discovery_and_price",
    };
    sqlx::query(
        "INSERT INTO scrape_runs (id, tenant_id, mode, status, started_at) \
         VALUES (?1, ?2, ?3, 'running', ?4)",
    )
    .bind(id.to_string())
    .bind(&tenant.tenant_id)
    .bind(mode_str)
    .bind(Utc::now().to_rfc3339())
    .execute(&db.pool)
    .await?;
    Ok(RunId(id))
}

/// Close a run with its terminal status and aggregate counts. Write-once:
/// closing a run that is not `running` is an error.
pub async fn close_run(
    db: &Db,
    run: &RunId,
    status: RunStatus,
    succeeded: usize,
    failed: usize,
    error_summary: Option<&str>,
) -> Result<()> {
    if status == RunStatus::Running {
        bail!("close_run requires a terminal status");
    }
    let result = sqlx::query(
        "UPDATE scrape_runs \
         SET status = ?1, finished_at = ?2, targets_succeeded = ?3, targets_failed = ?4, \
             error_summary = ?5 \
         WHERE id = ?6 AND status = 'running'",
    )
    .bind(status.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(succeeded as i64)
    .bind(failed as i64)
    .bind(error_summary)
    .bind(run.to_string())
    .execute(&db.pool)
    .await?;
    if result.rows_affected() == 0 {
        bail!("run {run} is not open; close is write-once");
    }
    Ok(())
}

/// Status of a run as stored.
pub async fn run_status(db: &Db, run: &RunId) -> Result<String> {
    let row = sqlx::query("SELECT status FROM scrape_runs WHERE id = ?1")
        .bind(run.to_string())
        .fetch_one(&db.pool)
        .await?;
    Ok(row.get::<String, _>("status"))
}
