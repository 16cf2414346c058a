//! Typed records shared across the pipeline: the selection payload coming in
//! from the UI/API layer, the fragment shapes produced by the fetch adapter,
//! and the run-level results going back out.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Explicit tenant scope for a run. Threaded through every orchestrator and
/// persistence call instead of living in process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
        }
    }
}

/// One theater/date slot to scrape, with optional film/showtime narrowing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub theater: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub film_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub showtime_filter: Option<NaiveTime>,
}

/// Whether a run only discovers showings or also records ticket prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeMode {
    #[default]
    Discovery,
    DiscoveryAndPrice,
}

/// Selection payload handed over by the UI/API collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionPayload {
    pub tenant: String,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub mode: Option<ScrapeMode>,
    pub targets: Vec<ScrapeTarget>,
}

/// Typed reason a target ended up failed. String forms are the stable values
/// surfaced in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    FetchTimeout,
    FetchError,
    StructureChanged,
    ExtractionError,
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::FetchTimeout => "fetch_timeout",
            FailureReason::FetchError => "fetch_error",
            FailureReason::StructureChanged => "structure_changed",
            FailureReason::ExtractionError => "extraction_error",
            FailureReason::Unknown => "unknown",
        }
    }

    /// Transient failures qualify for the single automatic retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureReason::FetchTimeout | FailureReason::FetchError)
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-target progress events for the live-status consumer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TargetStarted {
        theater: String,
        date: NaiveDate,
    },
    TargetSucceeded {
        theater: String,
        date: NaiveDate,
        showings: u64,
        prices: u64,
    },
    TargetFailed {
        theater: String,
        date: NaiveDate,
        reason: FailureReason,
    },
}

/// Aggregate result of one ScrapeRun, returned to the caller and persisted
/// onto the run row.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failure_reasons: Vec<String>,
    pub showings_created: u64,
    pub prices_recorded: u64,
}

// ---- Fetch adapter output ----------------------------------------------

/// Structured fragments for one theater/date page, decoupled from markup.
/// This is what the browser-automation capability hands back through the
/// fetch adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentSet {
    pub theater: String,
    pub date: NaiveDate,
    pub films: Vec<FilmFragment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilmFragment {
    pub title: String,
    pub showtimes: Vec<ShowtimeFragment>,
}

/// One showtime block. `time_text` is whatever the site rendered ("7:30 PM",
/// "19:30", ...); `aria_label` is the accessibility-label fallback some
/// layouts bury the time in. A consolidated block may carry several formats
/// for the same film/time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowtimeFragment {
    pub time_text: String,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub tickets: Vec<TicketFragment>,
}

/// Raw ticket row as scraped: free-text description plus price in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketFragment {
    pub description: String,
    pub amount_minor: i64,
}

// ---- Extraction output -------------------------------------------------

/// One distinct (film, time, format) tuple extracted from a page, carrying
/// the ticket rows observed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateShowing {
    pub film_title: String,
    pub showtime: NaiveTime,
    pub format: String,
    pub tickets: Vec<TicketFragment>,
}
