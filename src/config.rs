use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:planet.db?mode=rwc";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub feeds: Vec<String>,
    /// Fetch timeout in minutes
    #[serde(default = "default_rss_timeout")]
    pub rss_timeout: i64,
    #[serde(default)]
    pub database_url: Option<String>,
    /// Capacity of the in-memory seen-key cache, 0 disables it
    #[serde(default = "default_seen_cache_size")]
    pub seen_cache_size: usize,
}

fn default_rss_timeout() -> i64 {
    5
}

fn default_seen_cache_size() -> usize {
    1024
}

/// One configured feed together with the timeout its worker uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescriptor {
    pub uri: String,
    pub timeout: Duration,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Timeout handed to every fetch; anything below one minute becomes one minute.
    pub fn effective_timeout(&self) -> Duration {
        timeout_from_minutes(self.rss_timeout)
    }

    /// Descriptors in configured order. Repeated URIs are kept as-is.
    pub fn descriptors(&self) -> Vec<FeedDescriptor> {
        let timeout = self.effective_timeout();
        self.feeds
            .iter()
            .map(|uri| FeedDescriptor {
                uri: uri.clone(),
                timeout,
            })
            .collect()
    }

    /// `override_url` (command line or `DATABASE_URL`) wins over the config file.
    pub fn resolve_database_url(&self, override_url: Option<String>) -> String {
        resolve_database_url(override_url, self.database_url.as_deref())
    }
}

/// Database URL for callers that may have no config file at all.
pub fn resolve_database_url(override_url: Option<String>, configured: Option<&str>) -> String {
    override_url
        .filter(|url| !url.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

pub fn timeout_from_minutes(minutes: i64) -> Duration {
    let minutes = minutes.max(1) as u64;
    Duration::from_secs(minutes.saturating_mul(60))
}
