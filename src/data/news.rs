//! News search provider.
//!
//! Backs the `search_news` tool with recent headlines and a keyword
//! sentiment score.
//!
//! API: `https://newsapi.org/v2/everything`
//! Auth: API key via `apiKey` query param. Free tier: 100 req/day.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{Headline, NewsDigest, NewsSearch};

const NEWS_API_URL: &str = "https://newsapi.org/v2/everything";
const MAX_HEADLINES: usize = 8;

// ---------------------------------------------------------------------------
// NewsAPI response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    source: Option<NewsSource>,
    #[serde(default, rename = "publishedAt")]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsSource {
    #[serde(default)]
    name: Option<String>,
}

// ---------------------------------------------------------------------------
// Sentiment scoring
// ---------------------------------------------------------------------------

const POSITIVE_WORDS: &[&str] = &[
    "win", "return", "cleared", "healthy", "streak", "dominant", "surge",
    "upgrade", "record", "boost", "strong", "available", "activated",
];

const NEGATIVE_WORDS: &[&str] = &[
    "lose", "loss", "injur", "out", "doubtful", "suspend", "slump", "miss",
    "sidelined", "surgery", "questionable", "fatigue", "benched", "strain",
];

/// Simple keyword-based sentiment score: -1.0 (very negative) to +1.0 (very positive).
fn sentiment_score(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }

    let pos = words
        .iter()
        .filter(|w| POSITIVE_WORDS.iter().any(|pw| w.starts_with(pw)))
        .count() as f64;
    let neg = words
        .iter()
        .filter(|w| NEGATIVE_WORDS.iter().any(|nw| w.starts_with(nw)))
        .count() as f64;

    let denom = pos + neg;
    if denom == 0.0 {
        return 0.0;
    }
    (pos - neg) / denom
}

/// Strip filler words so free-form engine queries make good search terms.
fn normalize_query(query: &str) -> String {
    let stop_words = [
        "the", "a", "an", "of", "to", "for", "and", "or", "on", "at", "in",
        "about", "latest", "news", "any", "is", "are", "what",
    ];
    let words: Vec<&str> = query
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| w.len() > 1 && !stop_words.contains(&w.to_lowercase().as_str()))
        .take(6)
        .collect();
    if words.is_empty() {
        query.trim().to_string()
    } else {
        words.join(" ")
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct NewsApiClient {
    http: Client,
    api_key: Option<String>,
}

impl NewsApiClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("HANDICAPPER/0.1.0")
            .build()
            .context("Failed to build news HTTP client")?;
        Ok(Self { http, api_key })
    }

    fn to_digest(query: &str, articles: Vec<NewsArticle>) -> NewsDigest {
        let headlines: Vec<Headline> = articles
            .into_iter()
            .filter_map(|a| {
                let title = a.title.filter(|t| !t.trim().is_empty())?;
                Some(Headline {
                    title,
                    source: a
                        .source
                        .and_then(|s| s.name)
                        .unwrap_or_else(|| "unknown".to_string()),
                    published_at: a.published_at,
                    url: a.url,
                })
            })
            .take(MAX_HEADLINES)
            .collect();

        let joined = headlines
            .iter()
            .map(|h| h.title.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        NewsDigest {
            query: query.to_string(),
            sentiment: sentiment_score(&joined),
            headlines,
            source: "newsapi".to_string(),
        }
    }
}

#[async_trait]
impl NewsSearch for NewsApiClient {
    async fn search(&self, query: &str) -> Result<NewsDigest> {
        let Some(key) = &self.api_key else {
            anyhow::bail!("News search unavailable: NEWS_API_KEY not configured");
        };
        let terms = normalize_query(query);

        let url = format!(
            "{NEWS_API_URL}?q={}&sortBy=publishedAt&pageSize=10&language=en&apiKey={}",
            urlencoding::encode(&terms),
            key
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("NewsAPI request failed")?;

        let status = resp.status();
        let body: NewsApiResponse = resp
            .json()
            .await
            .context("Failed to parse NewsAPI response")?;
        if !status.is_success() || body.status != "ok" {
            anyhow::bail!(
                "NewsAPI error {status}: {}",
                body.message.unwrap_or_else(|| "unknown error".to_string())
            );
        }

        let digest = Self::to_digest(query, body.articles);
        debug!(query = %terms, headlines = digest.headlines.len(), "News search complete");
        Ok(digest)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentiment_positive() {
        let s = sentiment_score("Tatum cleared to return as Celtics extend win streak");
        assert!(s > 0.0, "Score {s} should be positive");
    }

    #[test]
    fn test_sentiment_negative() {
        let s = sentiment_score("Butler ruled out with hamstring strain, Heat slump continues");
        assert!(s < 0.0, "Score {s} should be negative");
    }

    #[test]
    fn test_sentiment_neutral_and_empty() {
        assert_eq!(sentiment_score("The team met to discuss the schedule"), 0.0);
        assert_eq!(sentiment_score(""), 0.0);
    }

    #[test]
    fn test_normalize_query() {
        let q = normalize_query("latest news on the Miami Heat injuries");
        assert_eq!(q, "Miami Heat injuries");
        assert_eq!(normalize_query("the"), "the");
    }

    #[test]
    fn test_to_digest_skips_untitled_articles() {
        let body: NewsApiResponse = serde_json::from_str(
            r#"{"status":"ok","articles":[
                {"title":"Celtics rout Heat","source":{"name":"ESPN"},"publishedAt":"2026-01-02T00:00:00Z"},
                {"title":null},
                {"title":"Butler out again"}
            ]}"#,
        )
        .unwrap();
        let digest = NewsApiClient::to_digest("heat", body.articles);
        assert_eq!(digest.headlines.len(), 2);
        assert_eq!(digest.headlines[0].source, "ESPN");
        assert_eq!(digest.headlines[1].source, "unknown");
        assert_eq!(digest.source, "newsapi");
    }

    #[tokio::test]
    async fn test_search_without_key_fails() {
        let client = NewsApiClient::new(None).unwrap();
        let err = client.search("celtics").await.unwrap_err();
        assert!(err.to_string().contains("NEWS_API_KEY"));
    }
}
