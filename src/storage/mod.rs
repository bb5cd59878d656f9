//! Persistence layer.
//!
//! The `DataStore` trait is the only shared resource between concurrent
//! requests. Reads serve the candidate generator and tools; writes are
//! idempotent keyed upserts, so two requests persisting the same id are
//! simply last-write-wins.
//!
//! `MemoryStore` backs tests and offline runs; `SqliteStore` is the
//! durable implementation.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::types::{EngineError, Event, LookaheadWindow, MarketQuote, MarketType, Recommendation, Side};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Scheduled (not live or final) events starting inside `window`,
    /// ordered by start time then id. `sport` filters case-insensitively.
    async fn get_scheduled_events(
        &self,
        window: &LookaheadWindow,
        sport: Option<&str>,
    ) -> Result<Vec<Event>, EngineError>;

    /// Best (max-payout) quote on the current line, if any quote exists.
    async fn get_best_quote(
        &self,
        event_id: &str,
        market_type: MarketType,
        side: Side,
    ) -> Result<Option<MarketQuote>, EngineError>;

    /// Keyed upsert; the latest write for an id wins.
    async fn upsert_recommendation(&self, record: &Recommendation) -> Result<(), EngineError>;

    async fn get_recommendation(&self, id: &str) -> Result<Option<Recommendation>, EngineError>;

    /// Ingestion: insert or replace an event by id.
    async fn insert_event(&self, event: &Event) -> Result<(), EngineError>;

    /// Ingestion: insert or replace the quote for one source on one side.
    async fn insert_quote(&self, quote: &MarketQuote) -> Result<(), EngineError>;
}
