use anyhow::{Result, anyhow};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::account::AccountBook;
use crate::core::config::{AppConfig, ServerTarget, Timings};
use crate::core::connection::{ConnectionEvent, LaunchGate};
use crate::core::connection::probes::CALIBRATED_CLIENT_BUILD;
use crate::core::presence::{PresenceCache, PresenceFeed};
use crate::core::reconciler::ServerBoard;
use crate::platform::Automation;

/// Everything the reconciler, supervisors and connection attempts share.
pub struct Context {
    pub config: AppConfig,
    pub book: AccountBook,
    pub board: ServerBoard,
    pub cache: PresenceCache,
    pub feed: Arc<dyn PresenceFeed>,
    pub automation: Arc<dyn Automation>,
    pub gate: LaunchGate,
    pub events: broadcast::Sender<ConnectionEvent>,
    /// Cancelled once, on shutdown. Liveness monitors stop on it.
    pub shutdown: CancellationToken,
    active_server: RwLock<Option<ServerTarget>>,
}

impl Context {
    pub fn new(
        config: AppConfig,
        book: AccountBook,
        feed: Arc<dyn PresenceFeed>,
        automation: Arc<dyn Automation>,
    ) -> Arc<Self> {
        let initial = config.initial_server().cloned();
        if let Some(server) = &initial {
            warn_on_build_mismatch(server);
        }
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            board: ServerBoard::default(),
            cache: PresenceCache::new(),
            gate: LaunchGate::new(),
            shutdown: CancellationToken::new(),
            active_server: RwLock::new(initial),
            config,
            book,
            feed,
            automation,
            events,
        })
    }

    pub fn timings(&self) -> &Timings {
        &self.config.timings
    }

    pub async fn active_server(&self) -> Option<ServerTarget> {
        self.active_server.read().await.clone()
    }

    pub async fn select_server(&self, name: &str) -> Result<()> {
        let server = self
            .config
            .server(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown server '{}'", name))?;
        warn_on_build_mismatch(&server);
        info!(server = %server.name, "Active server selected");
        *self.active_server.write().await = Some(server);
        self.board.reset().await;
        Ok(())
    }
}

fn warn_on_build_mismatch(server: &ServerTarget) {
    if server.launch.client_version != CALIBRATED_CLIENT_BUILD {
        warn!(
            server = %server.name,
            client_version = %server.launch.client_version,
            calibrated = CALIBRATED_CLIENT_BUILD,
            "Screen probes were calibrated against a different client build"
        );
    }
}
