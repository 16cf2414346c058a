//! Store wrapper: a sqlx SQLite pool with the schema applied idempotently at
//! connect. The natural-key uniqueness that makes Showing upserts safe under
//! concurrency lives here, not in process-level locks.

pub mod audit;
pub mod runs;
pub mod showings;

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            // Keep one connection alive: an idle-reaped `:memory:` connection
            // would take the whole database with it.
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await?;
        info!("connected to store");

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests and dry runs. Pinned to a single connection:
    /// each new `:memory:` connection would otherwise be a fresh database.
    pub async fn connect_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_twice_without_error() {
        let db = Db::connect_memory().await.unwrap();
        sqlx::raw_sql(SCHEMA).execute(&db.pool).await.unwrap();
    }
}
