//! Premium-format detection and daypart bucketing.
//!
//! Both halves are pure: PLF detection is a case-insensitive substring match
//! against a curated brand-term list, and the daypart mapping walks a
//! validated boundary table that partitions the 24-hour day.

use anyhow::{bail, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Brand terms that mark a showing as premium large format or motion seating.
pub const PLF_KEYWORDS: &[&str] = &[
    "imax", "dolby", "screenx", "4dx", "d-box", "dbox", "ultrascreen", "rpx", "xd", "prime",
    "grand screen", "laser",
];

/// Case-insensitive substring match of the raw format label against the PLF
/// keyword list.
pub fn is_premium_format(format_text: &str) -> bool {
    let lowered = format_text.to_ascii_lowercase();
    PLF_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// Named bucket of the day a showtime falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Daypart {
    Matinee,
    Twilight,
    Prime,
    LateNight,
}

impl Daypart {
    pub fn as_str(&self) -> &'static str {
        match self {
            Daypart::Matinee => "matinee",
            Daypart::Twilight => "twilight",
            Daypart::Prime => "prime",
            Daypart::LateNight => "late_night",
        }
    }
}

impl std::fmt::Display for Daypart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered daypart boundaries. Each entry is the start time of its bucket;
/// a bucket runs until the next start. Times before the first start wrap
/// into the last bucket, so any non-empty strictly-increasing table
/// partitions the full day with no gaps or overlaps.
#[derive(Debug, Clone)]
pub struct DaypartConfig {
    spans: Vec<(NaiveTime, Daypart)>,
}

impl DaypartConfig {
    /// Build a config from (start, daypart) pairs. Starts must be strictly
    /// increasing; anything else would create an ambiguous mapping.
    pub fn new(spans: Vec<(NaiveTime, Daypart)>) -> Result<Self> {
        if spans.is_empty() {
            bail!("daypart config requires at least one span");
        }
        for pair in spans.windows(2) {
            if pair[0].0 >= pair[1].0 {
                bail!(
                    "daypart boundaries must be strictly increasing: {} then {}",
                    pair[0].0,
                    pair[1].0
                );
            }
        }
        Ok(Self { spans })
    }

    /// Map a showtime into its daypart. Total over the 24-hour day.
    pub fn daypart_for(&self, time: NaiveTime) -> Daypart {
        // Last span whose start is <= time; earlier than every start means
        // we wrapped past midnight into the final bucket.
        self.spans
            .iter()
            .rev()
            .find(|(start, _)| *start <= time)
            .map(|(_, d)| *d)
            .unwrap_or(self.spans[self.spans.len() - 1].1)
    }
}

impl Default for DaypartConfig {
    /// Matinee 04:00-14:59, Twilight 15:00-16:59, Prime 17:00-21:59,
    /// LateNight 22:00-03:59 (wraps midnight).
    fn default() -> Self {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        Self::new(vec![
            (t(4, 0), Daypart::Matinee),
            (t(15, 0), Daypart::Twilight),
            (t(17, 0), Daypart::Prime),
            (t(22, 0), Daypart::LateNight),
        ])
        .expect("builtin daypart table is valid")
    }
}

/// Classify one showing: premium-format flag plus daypart bucket.
pub fn classify(format_text: &str, showtime: NaiveTime, dayparts: &DaypartConfig) -> (bool, Daypart) {
    (is_premium_format(format_text), dayparts.daypart_for(showtime))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn imax_at_1900_is_premium_prime() {
        let cfg = DaypartConfig::default();
        assert_eq!(classify("IMAX", t(19, 0), &cfg), (true, Daypart::Prime));
    }

    #[test]
    fn standard_format_is_not_premium() {
        assert!(!is_premium_format("Standard"));
        assert!(!is_premium_format("Digital 2D"));
    }

    #[test]
    fn keyword_match_is_case_insensitive_substring() {
        assert!(is_premium_format("Dolby Cinema"));
        assert!(is_premium_format("ultrascreen dlx"));
        assert!(is_premium_format("4DX 3D"));
    }

    #[test]
    fn late_night_wraps_midnight() {
        let cfg = DaypartConfig::default();
        assert_eq!(cfg.daypart_for(t(23, 30)), Daypart::LateNight);
        assert_eq!(cfg.daypart_for(t(0, 45)), Daypart::LateNight);
        assert_eq!(cfg.daypart_for(t(3, 59)), Daypart::LateNight);
        assert_eq!(cfg.daypart_for(t(4, 0)), Daypart::Matinee);
    }

    #[test]
    fn boundary_minutes_land_in_the_opening_bucket() {
        let cfg = DaypartConfig::default();
        assert_eq!(cfg.daypart_for(t(15, 0)), Daypart::Twilight);
        assert_eq!(cfg.daypart_for(t(17, 0)), Daypart::Prime);
        assert_eq!(cfg.daypart_for(t(21, 59)), Daypart::Prime);
        assert_eq!(cfg.daypart_for(t(22, 0)), Daypart::LateNight);
    }

    #[test]
    fn every_minute_maps_to_exactly_one_bucket() {
        let cfg = DaypartConfig::default();
        let mut counts = std::collections::HashMap::new();
        for minute in 0..24 * 60 {
            let time = t(minute / 60, minute % 60);
            *counts.entry(cfg.daypart_for(time)).or_insert(0u32) += 1;
        }
        let total: u32 = counts.values().sum();
        assert_eq!(total, 1440);
        assert_eq!(counts.len(), 4);
    }

    #[test]
    fn rejects_unordered_boundaries() {
        let bad = DaypartConfig::new(vec![
            (t(10, 0), Daypart::Matinee),
            (t(9, 0), Daypart::Prime),
        ]);
        assert!(bad.is_err());
        assert!(DaypartConfig::new(vec![]).is_err());
    }
}
