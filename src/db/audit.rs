//! Audit feeds for classification misses. Nothing is silently dropped: every
//! taxonomy miss and unresolved film title lands here for the manual-review
//! workflow, with first/last-seen timestamps and an occurrence counter.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::Db;
use crate::types::TenantContext;

/// Context captured alongside an unmatched ticket fragment.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnmatchedContext<'a> {
    pub theater: Option<&'a str>,
    pub film_title: Option<&'a str>,
    pub showtime: Option<&'a str>,
}

/// Stored unmatched-ticket-type row.
#[derive(Debug, Clone)]
pub struct UnmatchedTicketType {
    pub fragment: String,
    pub first_seen: String,
    pub last_seen: String,
    pub occurrence_count: i64,
    pub theater: Option<String>,
    pub film_title: Option<String>,
    pub showtime: Option<String>,
}

/// Stored unmatched-film-title row.
#[derive(Debug, Clone)]
pub struct UnmatchedFilmTitle {
    pub title: String,
    pub first_seen: String,
    pub last_seen: String,
    pub occurrence_count: i64,
}

/// Record a taxonomy miss. First miss creates the row; repeats bump the
/// counter, refresh last-seen, and take the latest context.
pub async fn record_unmatched_ticket_type(
    db: &Db,
    tenant: &TenantContext,
    fragment: &str,
    ctx: UnmatchedContext<'_>,
    seen_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO unmatched_ticket_types \
           (tenant_id, fragment, first_seen, last_seen, occurrence_count, theater, film_title, showtime) \
         VALUES (?1, ?2, ?3, ?3, 1, ?4, ?5, ?6) \
         ON CONFLICT (tenant_id, fragment) DO UPDATE SET \
           last_seen = excluded.last_seen, \
           occurrence_count = occurrence_count + 1, \
           theater = excluded.theater, \
           film_title = excluded.film_title, \
           showtime = excluded.showtime",
    )
    .bind(&tenant.tenant_id)
    .bind(fragment)
    .bind(seen_at.to_rfc3339())
    .bind(ctx.theater)
    .bind(ctx.film_title)
    .bind(ctx.showtime)
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Record a film title the downstream enrichment could not resolve.
pub async fn record_unmatched_film_title(
    db: &Db,
    tenant: &TenantContext,
    title: &str,
    seen_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO unmatched_film_titles \
           (tenant_id, title, first_seen, last_seen, occurrence_count) \
         VALUES (?1, ?2, ?3, ?3, 1) \
         ON CONFLICT (tenant_id, title) DO UPDATE SET \
           last_seen = excluded.last_seen, \
           occurrence_count = occurrence_count + 1",
    )
    .bind(&tenant.tenant_id)
    .bind(title)
    .bind(seen_at.to_rfc3339())
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Unmatched ticket fragments for a tenant, most frequent first.
pub async fn list_unmatched_ticket_types(
    db: &Db,
    tenant: &TenantContext,
) -> Result<Vec<UnmatchedTicketType>> {
    let rows = sqlx::query(
        "SELECT fragment, first_seen, last_seen, occurrence_count, theater, film_title, showtime \
         FROM unmatched_ticket_types WHERE tenant_id = ?1 \
         ORDER BY occurrence_count DESC, fragment",
    )
    .bind(&tenant.tenant_id)
    .fetch_all(&db.pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| UnmatchedTicketType {
            fragment: row.get("fragment"),
            first_seen: row.get("first_seen"),
            last_seen: row.get("last_seen"),
            occurrence_count: row.get("occurrence_count"),
            theater: row.get("theater"),
            film_title: row.get("film_title"),
            showtime: row.get("showtime"),
        })
        .collect())
}

/// Unresolved film titles for a tenant, most frequent first.
pub async fn list_unmatched_film_titles(
    db: &Db,
    tenant: &TenantContext,
) -> Result<Vec<UnmatchedFilmTitle>> {
    let rows = sqlx::query(
        "SELECT title, first_seen, last_seen, occurrence_count \
         FROM unmatched_film_titles WHERE tenant_id = ?1 \
         ORDER BY occurrence_count DESC, title",
    )
    .bind(&tenant.tenant_id)
    .fetch_all(&db.pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| UnmatchedFilmTitle {
            title: row.get("title"),
            first_seen: row.get("first_seen"),
            last_seen: row.get("last_seen"),
            occurrence_count: row.get("occurrence_count"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tenant() -> TenantContext {
        TenantContext::new("acme-cinemas")
    }

    #[tokio::test]
    async fn repeat_miss_increments_single_row() {
        let db = Db::connect_memory().await.unwrap();
        let t = tenant();
        let ctx = UnmatchedContext {
            theater: Some("Downtown 12"),
            film_title: Some("Dune Part Three"),
            showtime: Some("19:00"),
        };
        let day_one = Utc::now();
        let day_two = day_one + Duration::days(1);

        record_unmatched_ticket_type(&db, &t, "value tuesday combo", ctx, day_one)
            .await
            .unwrap();
        record_unmatched_ticket_type(&db, &t, "value tuesday combo", ctx, day_two)
            .await
            .unwrap();

        let rows = list_unmatched_ticket_types(&db, &t).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].occurrence_count, 2);
        assert_eq!(rows[0].first_seen, day_one.to_rfc3339());
        assert_eq!(rows[0].last_seen, day_two.to_rfc3339());
        assert_eq!(rows[0].theater.as_deref(), Some("Downtown 12"));
    }

    #[tokio::test]
    async fn audit_rows_are_tenant_scoped() {
        let db = Db::connect_memory().await.unwrap();
        let a = TenantContext::new("acme-cinemas");
        let b = TenantContext::new("rival-cinemas");
        let now = Utc::now();

        record_unmatched_ticket_type(&db, &a, "mystery fare", UnmatchedContext::default(), now)
            .await
            .unwrap();
        assert_eq!(list_unmatched_ticket_types(&db, &a).await.unwrap().len(), 1);
        assert!(list_unmatched_ticket_types(&db, &b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn film_titles_follow_the_same_lifecycle() {
        let db = Db::connect_memory().await.unwrap();
        let t = tenant();
        let now = Utc::now();

        record_unmatched_film_title(&db, &t, "Untitled Horror Project", now)
            .await
            .unwrap();
        record_unmatched_film_title(&db, &t, "Untitled Horror Project", now)
            .await
            .unwrap();

        let rows = list_unmatched_film_titles(&db, &t).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].occurrence_count, 2);
    }
}
