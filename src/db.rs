use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Channel {
    pub key: String,
    pub title: String,
    pub url: String,
    pub last_build_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Item {
    pub key: String,
    pub channel_key: String,
    pub title: String,
    pub url: String,
    pub date: Option<String>,
    pub content: Option<String>,
}

const CHANNEL_COLUMNS: &str = "key, title, url, last_build_date";
const ITEM_COLUMNS: &str = "key, channel_key, title, url, date, content";

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to an in-memory database gets its own empty database
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates tables and the unique key indexes. Must run before any worker stores.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY,
                key TEXT,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                last_build_date TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                key TEXT,
                channel_key TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                date TEXT,
                content TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Partial indexes: rows without a key are tolerated, keyed rows are unique
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_channels_key
            ON channels(key) WHERE key IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_items_key
            ON items(key) WHERE key IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_items_channel_date
            ON items(channel_key, date DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Plain insert; a second row with the same key fails on the unique index.
    pub async fn insert_channel(&self, channel: &Channel) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO channels (key, title, url, last_build_date)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&channel.key)
        .bind(&channel.title)
        .bind(&channel.url)
        .bind(&channel.last_build_date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn refresh_channel(&self, channel: &Channel) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE channels
            SET title = ?, url = ?, last_build_date = COALESCE(?, last_build_date)
            WHERE key = ?
            "#,
        )
        .bind(&channel.title)
        .bind(&channel.url)
        .bind(&channel.last_build_date)
        .bind(&channel.key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Plain insert; a second row with the same key fails on the unique index.
    pub async fn insert_item(&self, item: &Item) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO items (key, channel_key, title, url, date, content)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.key)
        .bind(&item.channel_key)
        .bind(&item.title)
        .bind(&item.url)
        .bind(&item.date)
        .bind(&item.content)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn all_channels(&self) -> anyhow::Result<Vec<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(&format!(
            r#"
            SELECT {CHANNEL_COLUMNS} FROM channels
            WHERE key IS NOT NULL
            ORDER BY last_build_date DESC NULLS LAST, id
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    pub async fn get_channel(&self, key: &str) -> anyhow::Result<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }

    pub async fn get_item(&self, key: &str) -> anyhow::Result<Option<Item>> {
        let item = sqlx::query_as::<_, Item>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn recent_items(&self, limit: i64) -> anyhow::Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            WHERE key IS NOT NULL
            ORDER BY date DESC NULLS LAST, id DESC
            LIMIT ?
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn items_for_channel(
        &self,
        channel_key: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            WHERE channel_key = ? AND key IS NOT NULL
            ORDER BY date DESC NULLS LAST, id DESC
            LIMIT ?
            "#
        ))
        .bind(channel_key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Items dated at or before `date`, newest first. Undated items are skipped.
    pub async fn items_before(&self, date: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            WHERE date <= ? AND key IS NOT NULL
            ORDER BY date DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(timestamp(date))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn item_count(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn channel_count(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM channels")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

/// True when the error came from one of the unique key indexes.
/// Dates are stored as RFC 3339 text so they sort as strings.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| db_err.is_unique_violation())
        .unwrap_or(false)
}
