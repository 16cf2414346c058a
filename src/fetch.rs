//! Narrow seam over the external browser-automation capability.
//!
//! The rest of the pipeline only ever sees `PageFetcher`: navigate to a
//! constructed URL, wait for a readiness condition, hand back structured
//! fragments or a typed failure. Markup details stop here.

use async_trait::async_trait;
use std::path::PathBuf;
use url::Url;

use crate::types::{FragmentSet, ScrapeTarget};

/// Readiness condition the automation engine waits on before the page is
/// considered loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// A specific content block is present in the DOM.
    SelectorPresent(String),
    /// The network has gone quiet after navigation.
    NetworkIdle,
}

/// Typed fetch failure. `ContentMissing` means the page loaded but the
/// expected content block never appeared: a likely site-structure change,
/// distinct from a generic error and not worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    Timeout,
    Navigation(String),
    ContentMissing(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Timeout => write!(f, "fetch timed out"),
            FetchError::Navigation(msg) => write!(f, "navigation failed: {msg}"),
            FetchError::ContentMissing(snippet) => {
                write!(f, "expected content absent (structure change?): {snippet}")
            }
        }
    }
}

impl std::error::Error for FetchError {}

/// The browser-automation capability, consumed as a trait so the pipeline
/// never depends on a concrete engine.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, target: &ScrapeTarget) -> Result<FragmentSet, FetchError>;
}

/// Listing URL for a target: `{base}/theaters/{theater-slug}/showtimes?date=..`.
pub fn target_url(base: &str, target: &ScrapeTarget) -> anyhow::Result<Url> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("base url cannot be a base: {base}"))?
        .push("theaters")
        .push(&slugify(&target.theater))
        .push("showtimes");
    url.query_pairs_mut()
        .append_pair("date", &target.date.format("%Y-%m-%d").to_string());
    Ok(url)
}

/// Readiness selector for a listing page.
pub fn wait_condition_for(_target: &ScrapeTarget) -> WaitCondition {
    WaitCondition::SelectorPresent(".showtimes-panel".to_string())
}

/// Lowercase-dashed slug for URL and file names.
pub fn slugify(input: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Capture-directory fetcher: reads fragment sets from
/// `{dir}/{theater-slug}_{date}.json`. Lets the pipeline run end-to-end from
/// recorded pages when the real automation engine is not wired in.
pub struct StaticFetcher {
    dir: PathBuf,
}

impl StaticFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn capture_path(&self, target: &ScrapeTarget) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.json",
            slugify(&target.theater),
            target.date.format("%Y-%m-%d")
        ))
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, target: &ScrapeTarget) -> Result<FragmentSet, FetchError> {
        let path = self.capture_path(target);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FetchError::Navigation(format!("{}: {e}", path.display())))?;
        let fragments: FragmentSet = serde_json::from_str(&raw).map_err(|e| {
            let snippet: String = raw.chars().take(120).collect();
            FetchError::ContentMissing(format!("{e}; snippet: {snippet}"))
        })?;
        if fragments.films.is_empty() {
            return Err(FetchError::ContentMissing(
                "capture contained no film blocks".to_string(),
            ));
        }
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn target(theater: &str) -> ScrapeTarget {
        ScrapeTarget {
            theater: theater.into(),
            date: NaiveDate::from_ymd_opt(2026, 8, 28).unwrap(),
            film_filter: None,
            showtime_filter: None,
        }
    }

    #[test]
    fn builds_listing_url() {
        let url = target_url("https://tickets.example.com", &target("Downtown 12")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://tickets.example.com/theaters/downtown-12/showtimes?date=2026-08-28"
        );
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("AMC  Century City 15!"), "amc-century-city-15");
        assert_eq!(slugify("--Downtown--"), "downtown");
    }

    #[tokio::test]
    async fn missing_capture_is_a_navigation_error() {
        let fetcher = StaticFetcher::new("/nonexistent/captures");
        let err = fetcher.fetch(&target("Downtown 12")).await.unwrap_err();
        assert!(matches!(err, FetchError::Navigation(_)));
    }

    #[tokio::test]
    async fn malformed_capture_is_content_missing() {
        let dir = std::env::temp_dir().join("cine_compare_fetch_test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("downtown-12_2026-08-28.json");
        tokio::fs::write(&path, "<html>not json</html>").await.unwrap();
        let fetcher = StaticFetcher::new(&dir);
        let err = fetcher.fetch(&target("Downtown 12")).await.unwrap_err();
        assert!(matches!(err, FetchError::ContentMissing(_)));
    }
}
