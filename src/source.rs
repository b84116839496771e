use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::db::{timestamp, Channel, Item};

/// Why a fetch produced no result. Any of these ends the owning worker.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Everything one successful fetch discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    pub channels: Vec<Channel>,
    pub items: Vec<Item>,
    /// Provider hint for the next poll; the feed's TTL when it has one
    pub seconds_till_next_update: i64,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<FetchResult, FetchError>;
}

pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent("PlanetFetch/0.1 (Feed Aggregator)")
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<FetchResult, FetchError> {
        debug!(uri, ?timeout, "Fetching feed");

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Network(e)
            }
        };

        let response = self
            .client
            .get(uri)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(map_err)?;

        parse_feed(uri, &bytes, timeout.as_secs() as i64)
    }
}

/// Turns a feed document into channel and item records.
///
/// `default_hint` is used as `seconds_till_next_update` when the feed carries no TTL.
pub fn parse_feed(uri: &str, bytes: &[u8], default_hint: i64) -> Result<FetchResult, FetchError> {
    let feed = parser::parse(bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

    // Several feeds of one site share a <link>, so the feed's own URI is the key
    let link = feed.links.first().map(|l| l.href.clone());
    let channel_key = uri.to_string();

    let channel = Channel {
        key: channel_key.clone(),
        title: feed
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_else(|| uri.to_string()),
        url: link.unwrap_or_else(|| uri.to_string()),
        last_build_date: feed.updated.or(feed.published).map(timestamp),
    };

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());
            let url = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let date = entry.published.or(entry.updated).map(timestamp);
            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content));
            let key = item_key(&entry.id, &url, &title, date.as_deref());

            Item {
                key,
                channel_key: channel_key.clone(),
                title,
                url,
                date,
                content,
            }
        })
        .collect();

    let seconds_till_next_update = feed
        .ttl
        .map(|minutes| i64::from(minutes) * 60)
        .unwrap_or(default_hint);

    Ok(FetchResult {
        channels: vec![channel],
        items,
        seconds_till_next_update,
    })
}

/// The entry's own id, or a digest of its link, title and date when it has none.
fn item_key(id: &str, url: &str, title: &str, date: Option<&str>) -> String {
    let trimmed = id.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    let input = format!("{}|{}|{}", url, title, date.unwrap_or(""));
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
