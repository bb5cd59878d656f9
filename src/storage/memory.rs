//! In-memory store for tests and offline runs.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::DataStore;
use crate::strategy::edge::select_best_quote;
use crate::types::{
    EngineError, Event, EventStatus, LookaheadWindow, MarketQuote, MarketType, Recommendation, Side,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<String, Event>>,
    quotes: RwLock<Vec<MarketQuote>>,
    recommendations: RwLock<HashMap<String, Recommendation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted recommendations.
    pub async fn recommendation_count(&self) -> usize {
        self.recommendations.read().await.len()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get_scheduled_events(
        &self,
        window: &LookaheadWindow,
        sport: Option<&str>,
    ) -> Result<Vec<Event>, EngineError> {
        let events = self.events.read().await;
        let mut out: Vec<Event> = events
            .values()
            .filter(|e| e.status == EventStatus::Scheduled && window.contains(e.starts_at))
            .filter(|e| sport.map_or(true, |s| e.sport.eq_ignore_ascii_case(s)))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn get_best_quote(
        &self,
        event_id: &str,
        market_type: MarketType,
        side: Side,
    ) -> Result<Option<MarketQuote>, EngineError> {
        let quotes = self.quotes.read().await;
        let matching: Vec<MarketQuote> = quotes
            .iter()
            .filter(|q| q.event_id == event_id && q.market_type == market_type && q.side == side)
            .cloned()
            .collect();
        Ok(select_best_quote(&matching).cloned())
    }

    async fn upsert_recommendation(&self, record: &Recommendation) -> Result<(), EngineError> {
        self.recommendations
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_recommendation(&self, id: &str) -> Result<Option<Recommendation>, EngineError> {
        Ok(self.recommendations.read().await.get(id).cloned())
    }

    async fn insert_event(&self, event: &Event) -> Result<(), EngineError> {
        self.events.write().await.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn insert_quote(&self, quote: &MarketQuote) -> Result<(), EngineError> {
        let mut quotes = self.quotes.write().await;
        quotes.retain(|q| {
            !(q.event_id == quote.event_id
                && q.market_type == quote.market_type
                && q.side == quote.side
                && q.source == quote.source)
        });
        quotes.push(quote.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn quote(price: i32, source: &str) -> MarketQuote {
        MarketQuote {
            event_id: "evt-001".into(),
            market_type: MarketType::Moneyline,
            side: Side::Home,
            price,
            line: None,
            source: source.into(),
            is_best: false,
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_scheduled_events_filtered_and_sorted() {
        let store = MemoryStore::new();
        let mut late = Event::sample();
        late.id = "late".into();
        late.starts_at = Utc::now() + Duration::hours(10);
        let mut early = Event::sample();
        early.id = "early".into();
        early.starts_at = Utc::now() + Duration::hours(2);
        let mut live = Event::sample();
        live.id = "live".into();
        live.status = EventStatus::Live;
        let mut nfl = Event::sample();
        nfl.id = "nfl".into();
        nfl.sport = "nfl".into();

        for e in [&late, &early, &live, &nfl] {
            store.insert_event(e).await.unwrap();
        }

        let window = LookaheadWindow::starting_now(24);
        let ids: Vec<String> = store
            .get_scheduled_events(&window, Some("NBA"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["early", "late"]);

        let all = store.get_scheduled_events(&window, None).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_best_quote_and_source_replacement() {
        let store = MemoryStore::new();
        store.insert_quote(&quote(-150, "bookA")).await.unwrap();
        store.insert_quote(&quote(-140, "bookB")).await.unwrap();
        let best = store
            .get_best_quote("evt-001", MarketType::Moneyline, Side::Home)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.source, "bookB");

        // bookB moves its price; the old quote is replaced, not kept
        store.insert_quote(&quote(-160, "bookB")).await.unwrap();
        let best = store
            .get_best_quote("evt-001", MarketType::Moneyline, Side::Home)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.source, "bookA");

        assert!(store
            .get_best_quote("evt-001", MarketType::Total, Side::Over)
            .await
            .unwrap()
            .is_none());
    }
}
