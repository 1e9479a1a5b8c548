use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::change_feed;
use crate::reconciler;

/// Client configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Base URL of the request-routing layer (`fetch-posts`, `submit-post`, ...)
    pub api_url: String,
    pub request_timeout: Duration,
    pub change_feed_capacity: usize,
    pub signal_capacity: usize,
    /// How often `feedctl watch` polls for changes
    pub poll_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000".to_string(),
            request_timeout: Duration::from_secs(10),
            change_feed_capacity: change_feed::DEFAULT_CAPACITY,
            signal_capacity: reconciler::DEFAULT_SIGNAL_CAPACITY,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl FeedConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup, falling back to defaults for missing keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            api_url: lookup("FEED_API_URL").unwrap_or(defaults.api_url),
            request_timeout: match parse::<u64>(&lookup, "FEED_REQUEST_TIMEOUT_SECS")? {
                Some(secs) => Duration::from_secs(secs),
                None => defaults.request_timeout,
            },
            change_feed_capacity: parse(&lookup, "FEED_CHANGE_CAPACITY")?
                .unwrap_or(defaults.change_feed_capacity),
            signal_capacity: parse(&lookup, "FEED_SIGNAL_CAPACITY")?
                .unwrap_or(defaults.signal_capacity),
            poll_interval: match parse::<u64>(&lookup, "FEED_POLL_INTERVAL_SECS")? {
                Some(secs) => Duration::from_secs(secs.max(1)),
                None => defaults.poll_interval,
            },
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{} must be a valid number, got {:?}", key, raw))
        })
        .transpose()
}
