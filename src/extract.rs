//! Turns a fetched page's structured fragments into candidate showing
//! records: one per distinct (film, time, format) tuple, times normalized,
//! consolidated multi-format blocks split, duplicates merged.

use chrono::NaiveTime;
use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::types::{CandidateShowing, FragmentSet, ShowtimeFragment, TicketFragment};

/// Extract candidate showings from one page's fragments.
///
/// Unparseable time strings skip only their own showtime entry (logged, not
/// fatal). Identical (film, time, format) tuples are deduplicated; ticket
/// rows from later duplicates are merged into the first occurrence.
pub fn extract(fragments: &FragmentSet) -> Vec<CandidateShowing> {
    let mut seen: IndexMap<(String, NaiveTime, String), CandidateShowing> = IndexMap::new();

    for film in &fragments.films {
        let title = clean_title(&film.title);
        if title.is_empty() {
            warn!(theater = %fragments.theater, "film fragment with empty title skipped");
            continue;
        }
        for showtime in &film.showtimes {
            let Some(time) = parse_showtime(showtime) else {
                warn!(
                    theater = %fragments.theater,
                    film = %title,
                    time_text = %showtime.time_text,
                    "unparseable showtime entry skipped"
                );
                continue;
            };

            // A consolidated block lists several formats for one film/time;
            // each format is its own candidate.
            let formats: Vec<String> = if showtime.formats.is_empty() {
                vec!["Standard".to_string()]
            } else {
                showtime.formats.iter().map(|f| clean_title(f)).collect()
            };

            for format in formats {
                if format.is_empty() {
                    continue;
                }
                let key = (title.clone(), time, format.clone());
                let entry = seen.entry(key).or_insert_with(|| CandidateShowing {
                    film_title: title.clone(),
                    showtime: time,
                    format,
                    tickets: Vec::new(),
                });
                for ticket in &showtime.tickets {
                    if !entry.tickets.contains(ticket) {
                        entry.tickets.push(ticket.clone());
                    }
                }
            }
        }
    }

    seen.into_values().collect()
}

/// Resolve the time for a showtime block: the rendered text first, then the
/// accessibility label it may be buried in.
fn parse_showtime(fragment: &ShowtimeFragment) -> Option<NaiveTime> {
    if let Some(t) = parse_time_text(&fragment.time_text) {
        return Some(t);
    }
    fragment
        .aria_label
        .as_deref()
        .and_then(parse_time_from_label)
}

/// Parse a bare time string in any of the observed forms: 12-hour with
/// meridiem ("7:30 PM", "7:30pm", "7 pm", "11:05 a.m.") or ISO-like 24-hour
/// ("19:30", "19:30:00").
pub fn parse_time_text(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    static TWELVE_HOUR: OnceLock<Regex> = OnceLock::new();
    let re = TWELVE_HOUR.get_or_init(|| {
        Regex::new(r"(?i)^(\d{1,2})(?::(\d{2}))?\s*([ap])\.?\s*m\.?$").expect("static regex")
    });
    if let Some(caps) = re.captures(trimmed) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        if hour == 0 || hour > 12 {
            return None;
        }
        let is_pm = caps[3].eq_ignore_ascii_case("p");
        let hour24 = match (hour, is_pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };
        return NaiveTime::from_hms_opt(hour24, minute, 0);
    }

    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .ok()
}

/// Pull a time out of surrounding label text, e.g.
/// "showtime 7:30 PM in IMAX" or "Session at 19:30".
pub fn parse_time_from_label(label: &str) -> Option<NaiveTime> {
    static IN_TEXT: OnceLock<Regex> = OnceLock::new();
    let re = IN_TEXT.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,2}:\d{2}(?:\s*[ap]\.?\s*m\.?)?)").expect("static regex")
    });
    re.captures(label)
        .and_then(|caps| parse_time_text(&caps[1]))
}

/// Trim and collapse inner whitespace.
fn clean_title(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
