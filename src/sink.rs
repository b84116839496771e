use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;

use crate::db::{is_unique_violation, Channel, Database, Item};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    /// The key was already stored. Expected on every poll after the first.
    Duplicate,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to store channel '{key}': {source}")]
    Channel {
        key: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to store item '{key}': {source}")]
    Item {
        key: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Persistence boundary the poll workers report to.
///
/// Both calls are idempotent per key: storing a known key yields
/// [`StoreOutcome::Duplicate`], never a second record.
#[async_trait]
pub trait IngestionSink: Send + Sync {
    async fn store_channel(&self, channel: &Channel) -> Result<StoreOutcome, StoreError>;
    async fn store_item(&self, item: &Item) -> Result<StoreOutcome, StoreError>;
}

/// [`IngestionSink`] backed by the SQLite store.
///
/// Duplicate detection relies on the unique key indexes created by
/// [`Database::initialize`]: concurrent workers may race to insert the same
/// key and the store keeps exactly one row. The optional seen-key cache only
/// saves round trips for items this process already stored.
pub struct DatabaseSink {
    db: Arc<Database>,
    seen_items: Option<Mutex<LruCache<String, ()>>>,
}

impl DatabaseSink {
    /// `seen_cache_size` of zero disables the in-memory cache.
    pub fn new(db: Arc<Database>, seen_cache_size: usize) -> Self {
        let seen_items =
            NonZeroUsize::new(seen_cache_size).map(|cap| Mutex::new(LruCache::new(cap)));
        Self { db, seen_items }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    fn recently_seen(&self, key: &str) -> bool {
        match &self.seen_items {
            Some(cache) => cache
                .lock()
                .map(|mut cache| cache.get(key).is_some())
                .unwrap_or(false),
            None => false,
        }
    }

    fn remember(&self, key: &str) {
        if let Some(cache) = &self.seen_items {
            if let Ok(mut cache) = cache.lock() {
                cache.put(key.to_string(), ());
            }
        }
    }
}

#[async_trait]
impl IngestionSink for DatabaseSink {
    /// Inserts a new channel, or refreshes title, url and date of a known one.
    async fn store_channel(&self, channel: &Channel) -> Result<StoreOutcome, StoreError> {
        let wrap = |source: sqlx::Error| StoreError::Channel {
            key: channel.key.clone(),
            source,
        };

        match self.db.insert_channel(channel).await {
            Ok(()) => Ok(StoreOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => {
                self.db.refresh_channel(channel).await.map_err(wrap)?;
                Ok(StoreOutcome::Duplicate)
            }
            Err(e) => Err(wrap(e)),
        }
    }

    /// Inserts an item once. Items are never updated after the first store.
    async fn store_item(&self, item: &Item) -> Result<StoreOutcome, StoreError> {
        if self.recently_seen(&item.key) {
            return Ok(StoreOutcome::Duplicate);
        }

        let outcome = match self.db.insert_item(item).await {
            Ok(()) => StoreOutcome::Inserted,
            Err(e) if is_unique_violation(&e) => StoreOutcome::Duplicate,
            Err(source) => {
                return Err(StoreError::Item {
                    key: item.key.clone(),
                    source,
                })
            }
        };

        self.remember(&item.key);
        Ok(outcome)
    }
}
