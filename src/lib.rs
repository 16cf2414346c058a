//! Competitor ticket-price and showtime acquisition pipeline.
//!
//! Flow: the orchestrator fans scrape targets out over a bounded worker pool,
//! each target runs fetch -> extract -> normalize/classify -> persist, and the
//! whole batch is grouped under one ScrapeRun. Repeated scrapes of the same
//! showtime re-affirm the stored Showing instead of duplicating it; every
//! price observation is appended as history.

pub mod classify;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod orchestrator;
pub mod taxonomy;
pub mod trace;
pub mod types;

pub mod util {
    pub mod env;
}

pub use classify::{classify, is_premium_format, Daypart, DaypartConfig};
pub use db::Db;
pub use extract::extract;
pub use fetch::{FetchError, PageFetcher, StaticFetcher, WaitCondition};
pub use orchestrator::{run_scrape, RunConfig};
pub use taxonomy::{Amenity, BaseType, NormalizeOutcome, TaxonomyTable};
pub use types::{
    CandidateShowing, FragmentSet, ProgressEvent, RunSummary, ScrapeMode, ScrapeTarget,
    SelectionPayload, TenantContext,
};
