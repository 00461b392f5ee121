//! Shared fixtures for the orchestrator tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::account::{AccountBook, AccountRecord};
use crate::core::config::{AppConfig, LaunchParameters, ServerTarget, Timings};
use crate::core::context::Context;
use crate::core::presence::{FeedFormat, PresenceFeed, PresenceSnapshot};
use crate::platform::fake::{FakeAutomation, FakePlan};

/// Feed returning whatever snapshot the test last scripted.
#[derive(Default)]
pub struct ScriptedFeed {
    next: Mutex<Option<PresenceSnapshot>>,
    calls: AtomicUsize,
}

impl ScriptedFeed {
    pub fn set(&self, snapshot: Option<PresenceSnapshot>) {
        *self.next.lock().unwrap() = snapshot;
    }

    pub fn set_online(&self, online: &[&str], offline: &[&str]) {
        let mut snap = PresenceSnapshot::empty();
        for name in online {
            snap.character_online.insert(name.to_string(), true);
            snap.character_level.insert(name.to_string(), 42);
        }
        for name in offline {
            snap.character_online.insert(name.to_string(), false);
        }
        snap.online_count = online.len();
        self.set(Some(snap));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresenceFeed for ScriptedFeed {
    async fn fetch(&self, _url: &str, _format: FeedFormat) -> Option<PresenceSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next.lock().unwrap().clone().map(|mut snap| {
            snap.captured_at = chrono::Utc::now();
            snap
        })
    }
}

pub fn fast_timings() -> Timings {
    Timings {
        reconcile_interval: Duration::from_millis(50),
        input_idle_timeout: Duration::from_millis(10),
        window_poll_interval: Duration::from_millis(5),
        window_poll_attempts: 10,
        screen_poll_interval: Duration::from_millis(5),
        screen_poll_attempts: 10,
        focus_attempts: 3,
        focus_settle: Duration::from_millis(2),
        liveness_interval: Duration::from_millis(10),
        retry_delay: Duration::from_millis(10),
        assignment_poll_interval: Duration::from_millis(5),
        assignment_timeout: Duration::from_millis(200),
        stale_kill_grace: Duration::from_millis(10),
        launch_grace: Duration::from_secs(90),
    }
}

pub fn test_server() -> ServerTarget {
    ServerTarget {
        name: "Alpha".to_string(),
        feed_url: "http://feed.test/online.xml".to_string(),
        feed_format: FeedFormat::Xml,
        launch: LaunchParameters {
            client_version: "2.8.1".to_string(),
            host: "10.0.0.5".to_string(),
            port: 7777,
            session_flag: "0".to_string(),
            client_type: "1".to_string(),
            realm_code: "EU".to_string(),
        },
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        client_path: "/opt/game/client.exe".into(),
        servers: vec![test_server()],
        timings: fast_timings(),
        ..AppConfig::default()
    }
}

pub struct Harness {
    pub ctx: Arc<Context>,
    pub fake: Arc<FakeAutomation>,
    pub feed: Arc<ScriptedFeed>,
}

pub fn harness(characters: &[&str], plan: FakePlan) -> Harness {
    harness_with(test_config(), characters, plan)
}

pub fn harness_with(config: AppConfig, characters: &[&str], plan: FakePlan) -> Harness {
    let records = characters
        .iter()
        .map(|c| AccountRecord::new(*c, format!("{}_user", c.to_lowercase()), "pw"))
        .collect();
    let fake = Arc::new(FakeAutomation::new(plan));
    let feed = Arc::new(ScriptedFeed::default());
    let ctx = Context::new(config, AccountBook::new(records), feed.clone(), fake.clone());
    Harness { ctx, fake, feed }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
