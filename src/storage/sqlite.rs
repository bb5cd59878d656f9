//! SQLite-backed store (sqlx).
//!
//! Timestamps are stored as RFC 3339 UTC text with a fixed precision so
//! lexicographic comparison in SQL matches chronological order.
//! Recommendations are stored as a JSON document keyed by id.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use super::DataStore;
use crate::strategy::edge::select_best_quote;
use crate::types::{
    EngineError, Event, LookaheadWindow, MarketQuote, MarketType, Recommendation, Side,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          TEXT PRIMARY KEY,
        sport       TEXT NOT NULL,
        home        TEXT NOT NULL,
        away        TEXT NOT NULL,
        starts_at   TEXT NOT NULL,
        status      TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_starts_at ON events (starts_at)",
    r#"
    CREATE TABLE IF NOT EXISTS quotes (
        event_id     TEXT NOT NULL,
        market_type  TEXT NOT NULL,
        side         TEXT NOT NULL,
        source       TEXT NOT NULL,
        price        INTEGER NOT NULL,
        line         REAL,
        is_best      INTEGER NOT NULL DEFAULT 0,
        fetched_at   TEXT NOT NULL,
        PRIMARY KEY (event_id, market_type, side, source)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recommendations (
        id               TEXT PRIMARY KEY,
        kind             TEXT NOT NULL,
        confidence_band  TEXT NOT NULL,
        created_at       TEXT NOT NULL,
        body             TEXT NOT NULL
    )
    "#,
];

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::Storage(e.to_string())
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| EngineError::Storage(format!("Bad timestamp '{raw}': {e}")))
}

fn row_to_event(row: &SqliteRow) -> Result<Event, EngineError> {
    let starts_at: String = row.try_get("starts_at").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Event {
        id: row.try_get("id").map_err(db_err)?,
        sport: row.try_get("sport").map_err(db_err)?,
        home: row.try_get("home").map_err(db_err)?,
        away: row.try_get("away").map_err(db_err)?,
        starts_at: parse_ts(&starts_at)?,
        status: status.parse()?,
    })
}

fn row_to_quote(row: &SqliteRow) -> Result<MarketQuote, EngineError> {
    let market_type: String = row.try_get("market_type").map_err(db_err)?;
    let side: String = row.try_get("side").map_err(db_err)?;
    let fetched_at: String = row.try_get("fetched_at").map_err(db_err)?;
    let price: i64 = row.try_get("price").map_err(db_err)?;
    Ok(MarketQuote {
        event_id: row.try_get("event_id").map_err(db_err)?,
        market_type: market_type.parse()?,
        side: side.parse()?,
        price: i32::try_from(price)
            .map_err(|_| EngineError::Storage(format!("Price out of range: {price}")))?,
        line: row.try_get("line").map_err(db_err)?,
        source: row.try_get("source").map_err(db_err)?,
        is_best: row.try_get("is_best").map_err(db_err)?,
        fetched_at: parse_ts(&fetched_at)?,
    })
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `database_url`, creating the file and schema if missing.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, EngineError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url = database_url, "SQLite store ready");
        Ok(store)
    }

    /// Private in-memory database. A single long-lived connection keeps
    /// the database alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self, EngineError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), EngineError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn get_scheduled_events(
        &self,
        window: &LookaheadWindow,
        sport: Option<&str>,
    ) -> Result<Vec<Event>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT id, sport, home, away, starts_at, status
            FROM events
            WHERE status = 'scheduled'
              AND starts_at >= ?1 AND starts_at <= ?2
              AND (?3 IS NULL OR lower(sport) = lower(?3))
            ORDER BY starts_at ASC, id ASC
            "#,
        )
        .bind(ts(window.from))
        .bind(ts(window.to))
        .bind(sport)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_event).collect()
    }

    async fn get_best_quote(
        &self,
        event_id: &str,
        market_type: MarketType,
        side: Side,
    ) -> Result<Option<MarketQuote>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, market_type, side, source, price, line, is_best, fetched_at
            FROM quotes
            WHERE event_id = ?1 AND market_type = ?2 AND side = ?3
            "#,
        )
        .bind(event_id)
        .bind(market_type.to_string())
        .bind(side.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let quotes = rows.iter().map(row_to_quote).collect::<Result<Vec<_>, _>>()?;
        Ok(select_best_quote(&quotes).cloned())
    }

    async fn upsert_recommendation(&self, record: &Recommendation) -> Result<(), EngineError> {
        let body = serde_json::to_string(record)
            .map_err(|e| EngineError::Storage(format!("Failed to serialise recommendation: {e}")))?;
        let kind = serde_json::to_value(record.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO recommendations (id, kind, confidence_band, created_at, body)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                confidence_band = excluded.confidence_band,
                created_at = excluded.created_at,
                body = excluded.body
            "#,
        )
        .bind(&record.id)
        .bind(kind)
        .bind(record.confidence_band.to_string())
        .bind(ts(record.metadata.created_at))
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(id = %record.id, "Recommendation persisted");
        Ok(())
    }

    async fn get_recommendation(&self, id: &str) -> Result<Option<Recommendation>, EngineError> {
        let row = sqlx::query("SELECT body FROM recommendations WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => {
                let body: String = row.try_get("body").map_err(db_err)?;
                serde_json::from_str(&body)
                    .map(Some)
                    .map_err(|e| EngineError::Storage(format!("Corrupt recommendation {id}: {e}")))
            }
            None => Ok(None),
        }
    }

    async fn insert_event(&self, event: &Event) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO events (id, sport, home, away, starts_at, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                sport = excluded.sport,
                home = excluded.home,
                away = excluded.away,
                starts_at = excluded.starts_at,
                status = excluded.status
            "#,
        )
        .bind(&event.id)
        .bind(&event.sport)
        .bind(&event.home)
        .bind(&event.away)
        .bind(ts(event.starts_at))
        .bind(event.status.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_quote(&self, quote: &MarketQuote) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO quotes (event_id, market_type, side, source, price, line, is_best, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(event_id, market_type, side, source) DO UPDATE SET
                price = excluded.price,
                line = excluded.line,
                is_best = excluded.is_best,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&quote.event_id)
        .bind(quote.market_type.to_string())
        .bind(quote.side.to_string())
        .bind(&quote.source)
        .bind(i64::from(quote.price))
        .bind(quote.line)
        .bind(quote.is_best)
        .bind(ts(quote.fetched_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
