use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{FeedFormat, PresenceFeed, PresenceSnapshot};

/// Snapshots at least this old must be refreshed before reuse.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(60);

pub fn is_fresh_at(snapshot: &PresenceSnapshot, now: DateTime<Utc>) -> bool {
    // A capture time ahead of `now` (clock step) counts as age zero.
    (now - snapshot.captured_at)
        .to_std()
        .map(|age| age < SNAPSHOT_TTL)
        .unwrap_or(true)
}

pub fn is_fresh(snapshot: &PresenceSnapshot) -> bool {
    is_fresh_at(snapshot, Utc::now())
}

/// Latest snapshot per server.
///
/// `get`/`put` impose no policy; callers decide when to refetch. `refresh`
/// is the single-flight read-through path: concurrent callers for one server
/// share a single fetch.
#[derive(Default)]
pub struct PresenceCache {
    snapshots: RwLock<HashMap<String, PresenceSnapshot>>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PresenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, server: &str) -> Option<PresenceSnapshot> {
        self.snapshots.read().await.get(server).cloned()
    }

    pub async fn put(&self, server: &str, snapshot: PresenceSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(server.to_string(), snapshot);
    }

    pub async fn invalidate(&self, server: &str) {
        self.snapshots.write().await.remove(server);
    }

    async fn flight_lock(&self, server: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .lock()
            .await
            .entry(server.to_string())
            .or_default()
            .clone()
    }

    /// Return a usable snapshot for `server`, fetching when needed.
    ///
    /// Without `force` a fresh cached snapshot is returned as is. With
    /// `force` the TTL is bypassed, but a snapshot captured while this caller
    /// waited behind another in-flight fetch is reused. `None` when the
    /// fetch fails; the previous snapshot is left in place.
    pub async fn refresh(
        &self,
        server: &str,
        url: &str,
        format: FeedFormat,
        feed: &dyn PresenceFeed,
        force: bool,
    ) -> Option<PresenceSnapshot> {
        let requested_at = Utc::now();
        let lock = self.flight_lock(server).await;
        let _flight = lock.lock().await;

        if let Some(cached) = self.get(server).await {
            let reusable = if force {
                cached.captured_at >= requested_at
            } else {
                is_fresh(&cached)
            };
            if reusable {
                debug!(server = %server, force, "Reusing cached presence snapshot");
                return Some(cached);
            }
        }

        let snapshot = feed.fetch(url, format).await?;
        self.put(server, snapshot.clone()).await;
        Some(snapshot)
    }
}
