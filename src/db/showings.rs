//! Showing upsert and price history.
//!
//! `upsert_showing` is idempotent on the natural key
//! (tenant, date, theater, film, time, format): discovery re-affirms an
//! existing row, it never rewrites it. `append_price` always inserts; price
//! history keeps every observation.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::Row;
use std::collections::BTreeSet;
use tracing::warn;

use super::runs::RunId;
use super::Db;
use crate::classify::Daypart;
use crate::taxonomy::{amenities_to_json, Amenity, BaseType};
use crate::types::TenantContext;

/// Fully classified showing ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowingRecord {
    pub show_date: NaiveDate,
    pub theater: String,
    pub film_title: String,
    pub showtime: NaiveTime,
    pub format: String,
    pub is_plf: bool,
    pub daypart: Daypart,
}

/// Reference to a stored showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowingRef {
    pub id: i64,
}

/// Insert-or-no-op on the natural key. Returns the reference and whether a
/// new row was created.
///
/// Derived fields (is_plf, daypart) are write-once per key: first writer
/// wins. A later scrape that disagrees keeps the stored values and logs the
/// disagreement.
pub async fn upsert_showing(
    db: &Db,
    tenant: &TenantContext,
    run: &RunId,
    record: &ShowingRecord,
) -> Result<(ShowingRef, bool)> {
    let showtime = record.showtime.format("%H:%M").to_string();
    let show_date = record.show_date.format("%Y-%m-%d").to_string();

    let inserted = sqlx::query(
        "INSERT INTO showings \
           (tenant_id, show_date, theater, film_title, showtime, format, is_plf, daypart, first_run_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT (tenant_id, show_date, theater, film_title, showtime, format) DO NOTHING \
         RETURNING id",
    )
    .bind(&tenant.tenant_id)
    .bind(&show_date)
    .bind(&record.theater)
    .bind(&record.film_title)
    .bind(&showtime)
    .bind(&record.format)
    .bind(record.is_plf)
    .bind(record.daypart.as_str())
    .bind(run.to_string())
    .fetch_optional(&db.pool)
    .await?;

    if let Some(row) = inserted {
        return Ok((ShowingRef { id: row.get("id") }, true));
    }

    // Conflict: the key already exists (possibly created by a concurrent
    // worker between our insert and now). Re-affirm it.
    let row = sqlx::query(
        "SELECT id, is_plf, daypart FROM showings \
         WHERE tenant_id = ?1 AND show_date = ?2 AND theater = ?3 \
           AND film_title = ?4 AND showtime = ?5 AND format = ?6",
    )
    .bind(&tenant.tenant_id)
    .bind(&show_date)
    .bind(&record.theater)
    .bind(&record.film_title)
    .bind(&showtime)
    .bind(&record.format)
    .fetch_one(&db.pool)
    .await?;

    let stored_plf: bool = row.get("is_plf");
    let stored_daypart: String = row.get("daypart");
    if stored_plf != record.is_plf || stored_daypart != record.daypart.as_str() {
        warn!(
            tenant = %tenant.tenant_id,
            theater = %record.theater,
            film = %record.film_title,
            showtime = %showtime,
            stored_plf,
            new_plf = record.is_plf,
            stored_daypart = %stored_daypart,
            new_daypart = %record.daypart,
            "classification disagreement on existing showing; keeping stored values"
        );
    }

    Ok((ShowingRef { id: row.get("id") }, false))
}

/// Append one observed price. Never deduplicates or updates.
pub async fn append_price(
    db: &Db,
    tenant: &TenantContext,
    showing: ShowingRef,
    run: &RunId,
    base: BaseType,
    amenities: &BTreeSet<Amenity>,
    amount_minor: i64,
    observed_at: DateTime<Utc>,
) -> Result<i64> {
    if amount_minor < 0 {
        bail!("price amount must be non-negative, got {amount_minor}");
    }
    let row = sqlx::query(
        "INSERT INTO prices \
           (tenant_id, showing_id, run_id, base_type, amenities, amount_minor, observed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         RETURNING id",
    )
    .bind(&tenant.tenant_id)
    .bind(showing.id)
    .bind(run.to_string())
    .bind(base.as_str())
    .bind(amenities_to_json(amenities))
    .bind(amount_minor)
    .bind(observed_at.to_rfc3339())
    .fetch_one(&db.pool)
    .await?;
    Ok(row.get("id"))
}

/// Price-row count for a showing (reporting/tests).
pub async fn price_count(db: &Db, showing: ShowingRef) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prices WHERE showing_id = ?1")
        .bind(showing.id)
        .fetch_one(&db.pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::runs::{open_run, RunStatus};
    use crate::types::ScrapeMode;

    fn tenant() -> TenantContext {
        TenantContext::new("acme-cinemas")
    }

    fn record() -> ShowingRecord {
        ShowingRecord {
            show_date: NaiveDate::from_ymd_opt(2026, 8, 28).unwrap(),
            theater: "Downtown 12".into(),
            film_title: "Dune Part Three".into(),
            showtime: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            format: "IMAX".into(),
            is_plf: true,
            daypart: Daypart::Prime,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_natural_key() {
        let db = Db::connect_memory().await.unwrap();
        let t = tenant();
        let run = open_run(&db, &t, ScrapeMode::Discovery).await.unwrap();

        let (first, created) = upsert_showing(&db, &t, &run, &record()).await.unwrap();
        assert!(created);
        let (second, created_again) = upsert_showing(&db, &t, &run, &record()).await.unwrap();
        assert!(!created_again);
        assert_eq!(first, second);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM showings")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn different_tenants_do_not_collide() {
        let db = Db::connect_memory().await.unwrap();
        let a = TenantContext::new("acme-cinemas");
        let b = TenantContext::new("rival-cinemas");
        let run_a = open_run(&db, &a, ScrapeMode::Discovery).await.unwrap();
        let run_b = open_run(&db, &b, ScrapeMode::Discovery).await.unwrap();

        let (_, created_a) = upsert_showing(&db, &a, &run_a, &record()).await.unwrap();
        let (_, created_b) = upsert_showing(&db, &b, &run_b, &record()).await.unwrap();
        assert!(created_a && created_b);
    }

    #[tokio::test]
    async fn later_disagreeing_classification_keeps_stored_values() {
        let db = Db::connect_memory().await.unwrap();
        let t = tenant();
        let run = open_run(&db, &t, ScrapeMode::Discovery).await.unwrap();

        upsert_showing(&db, &t, &run, &record()).await.unwrap();
        let mut disagreeing = record();
        disagreeing.is_plf = false;
        disagreeing.daypart = Daypart::Twilight;
        let (showing, created) = upsert_showing(&db, &t, &run, &disagreeing).await.unwrap();
        assert!(!created);

        let row = sqlx::query("SELECT is_plf, daypart FROM showings WHERE id = ?1")
            .bind(showing.id)
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert!(row.get::<bool, _>("is_plf"));
        assert_eq!(row.get::<String, _>("daypart"), "prime");
    }

    #[tokio::test]
    async fn prices_append_without_dedup() {
        let db = Db::connect_memory().await.unwrap();
        let t = tenant();
        let run = open_run(&db, &t, ScrapeMode::DiscoveryAndPrice).await.unwrap();
        let (showing, _) = upsert_showing(&db, &t, &run, &record()).await.unwrap();

        let amenities = BTreeSet::from([Amenity::ThreeD]);
        let now = Utc::now();
        let first = append_price(&db, &t, showing, &run, BaseType::Adult, &amenities, 1450, now)
            .await
            .unwrap();
        let second = append_price(&db, &t, showing, &run, BaseType::Adult, &amenities, 1450, now)
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(price_count(&db, showing).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn negative_amounts_are_rejected() {
        let db = Db::connect_memory().await.unwrap();
        let t = tenant();
        let run = open_run(&db, &t, ScrapeMode::DiscoveryAndPrice).await.unwrap();
        let (showing, _) = upsert_showing(&db, &t, &run, &record()).await.unwrap();

        let err = append_price(
            &db,
            &t,
            showing,
            &run,
            BaseType::Adult,
            &BTreeSet::new(),
            -100,
            Utc::now(),
        )
        .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn rerun_keeps_one_showing_and_two_price_rows() {
        // Scenario: same target scraped in two price-mode runs.
        let db = Db::connect_memory().await.unwrap();
        let t = tenant();

        let run1 = open_run(&db, &t, ScrapeMode::DiscoveryAndPrice).await.unwrap();
        let (s1, _) = upsert_showing(&db, &t, &run1, &record()).await.unwrap();
        append_price(&db, &t, s1, &run1, BaseType::Adult, &BTreeSet::new(), 1450, Utc::now())
            .await
            .unwrap();
        crate::db::runs::close_run(&db, &run1, RunStatus::Completed, 1, 0, None)
            .await
            .unwrap();

        let run2 = open_run(&db, &t, ScrapeMode::DiscoveryAndPrice).await.unwrap();
        let (s2, created) = upsert_showing(&db, &t, &run2, &record()).await.unwrap();
        assert!(!created);
        assert_eq!(s1, s2);
        append_price(&db, &t, s2, &run2, BaseType::Adult, &BTreeSet::new(), 1500, Utc::now())
            .await
            .unwrap();

        let showings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM showings")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(showings, 1);
        assert_eq!(price_count(&db, s1).await.unwrap(), 2);
    }
}
