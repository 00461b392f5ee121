use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{FeedFormat, PresenceSnapshot, parse::parse_feed};
use crate::core::config::HttpConfig;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed unreachable: {0}")]
    Network(#[from] reqwest::Error),
    #[error("feed answered HTTP {0}")]
    Status(u16),
    #[error("feed body is empty")]
    EmptyBody,
    #[error("feed body could not be parsed: {0}")]
    Parse(String),
}

/// Source of presence snapshots. Implementations never cache.
#[async_trait]
pub trait PresenceFeed: Send + Sync {
    /// `None` when the feed could not be retrieved. A body that was retrieved
    /// but could not be parsed yields an empty snapshot instead.
    async fn fetch(&self, url: &str, format: FeedFormat) -> Option<PresenceSnapshot>;
}

pub struct HttpPresenceFeed {
    client: reqwest::Client,
}

impl HttpPresenceFeed {
    pub fn new(http: &HttpConfig) -> Result<Self> {
        if http.accept_invalid_certs {
            debug!("Feed TLS certificate validation is disabled");
        }
        let client = reqwest::Client::builder()
            .user_agent(http.user_agent.clone())
            .timeout(Duration::from_secs(http.timeout_secs.max(1)))
            .danger_accept_invalid_certs(http.accept_invalid_certs)
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_body(&self, url: &str) -> Result<String, FeedError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(FeedError::EmptyBody);
        }
        Ok(body)
    }
}

#[async_trait]
impl PresenceFeed for HttpPresenceFeed {
    async fn fetch(&self, url: &str, format: FeedFormat) -> Option<PresenceSnapshot> {
        if format == FeedFormat::Empty {
            return Some(PresenceSnapshot::empty());
        }
        if url.trim().is_empty() {
            warn!(format = format.as_str(), "Feed URL is empty, skipping fetch");
            return None;
        }

        let body = match self.fetch_body(url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %url, "Presence fetch failed: {}", e);
                return None;
            }
        };

        match parse_feed(&body, format, Utc::now()) {
            Ok(snapshot) => {
                debug!(
                    url = %url,
                    characters = snapshot.character_online.len(),
                    online = snapshot.online_count,
                    "Presence feed parsed"
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(url = %url, format = format.as_str(), "{}", e);
                Some(PresenceSnapshot::empty())
            }
        }
    }
}
