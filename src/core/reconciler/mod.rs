//! Periodic projection of the presence feed onto account status, followed by
//! a scan that hands dropped accounts to their reconnection supervisor.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::account::{AccountStatus, MonitoredAccount};
use crate::core::config::ServerTarget;
use crate::core::context::Context;
use crate::core::presence::PresenceSnapshot;
use crate::core::supervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Checking,
    Online,
    Offline,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Checking => "checking",
            ServerState::Online => "online",
            ServerState::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub name: String,
    pub state: ServerState,
    pub online_count: usize,
}

/// Status of the active server as last observed.
#[derive(Default)]
pub struct ServerBoard {
    current: RwLock<Option<ServerStatus>>,
}

impl ServerBoard {
    pub async fn get(&self) -> Option<ServerStatus> {
        self.current.read().await.clone()
    }

    async fn set(&self, name: &str, state: ServerState, online_count: usize) {
        *self.current.write().await = Some(ServerStatus {
            name: name.to_string(),
            state,
            online_count,
        });
    }

    async fn mark_checking(&self, name: &str) {
        let mut current = self.current.write().await;
        let online_count = current
            .as_ref()
            .filter(|s| s.name == name)
            .map_or(0, |s| s.online_count);
        *current = Some(ServerStatus {
            name: name.to_string(),
            state: ServerState::Checking,
            online_count,
        });
    }

    /// Forget the previous server's status after a server switch.
    pub async fn reset(&self) {
        *self.current.write().await = None;
    }
}

/// Copy one snapshot's view of `account` onto it. `None` means the feed was
/// unavailable. Accounts being edited are left alone.
pub fn project(account: &mut MonitoredAccount, snapshot: Option<&PresenceSnapshot>) {
    if account.status == AccountStatus::Editing {
        return;
    }
    match snapshot.and_then(|s| s.lookup(account.character())) {
        Some(presence) => {
            account.status = if presence.online {
                AccountStatus::Online
            } else {
                AccountStatus::Offline
            };
            account.level = presence.level;
            account.experience = presence.experience;
        }
        None => {
            account.status = AccountStatus::Idle;
            account.clear_progress();
        }
    }
}

async fn fetch_snapshot(ctx: &Context, server: &ServerTarget, force: bool) -> Option<PresenceSnapshot> {
    let snapshot = ctx
        .cache
        .refresh(
            &server.name,
            &server.feed_url,
            server.feed_format,
            ctx.feed.as_ref(),
            force,
        )
        .await;
    match &snapshot {
        Some(s) => ctx.board.set(&server.name, ServerState::Online, s.online_count).await,
        None => ctx.board.set(&server.name, ServerState::Offline, 0).await,
    }
    snapshot
}

/// Forced, TTL-bypassing refresh of one account. Returns its new status, or
/// `None` when the account or an active server is missing.
pub async fn refresh_account(ctx: &Context, character: &str) -> Option<AccountStatus> {
    let server = ctx.active_server().await?;
    let snapshot = fetch_snapshot(ctx, &server, true).await;
    ctx.book
        .update(character, |a| {
            project(a, snapshot.as_ref());
            a.status
        })
        .await
}

pub struct Reconciler {
    ctx: Arc<Context>,
    pass: Mutex<()>,
}

impl Reconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            pass: Mutex::new(()),
        }
    }

    /// Tick until `session` is cancelled. A pass already running when the
    /// session ends is allowed to finish.
    pub async fn run(self: Arc<Self>, session: CancellationToken) {
        let period = self.ctx.timings().reconcile_interval;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = period.as_millis() as u64, "Reconciler started");
        loop {
            tokio::select! {
                _ = session.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(&session).await;
        }
        info!("Reconciler stopped");
    }

    /// One reconciliation pass. Returns false when another pass was already
    /// running and this one was skipped.
    pub async fn tick(&self, session: &CancellationToken) -> bool {
        let Ok(_pass) = self.pass.try_lock() else {
            debug!("Reconcile pass already running, skipping tick");
            return false;
        };
        let ctx = &self.ctx;
        let Some(server) = ctx.active_server().await else {
            debug!("No active server, nothing to reconcile");
            return true;
        };

        ctx.board.mark_checking(&server.name).await;
        {
            let mut accounts = ctx.book.lock().await;
            for account in accounts.iter_mut() {
                if matches!(account.status, AccountStatus::Online | AccountStatus::Offline) {
                    account.status = AccountStatus::Checking;
                }
            }
        }

        let snapshot = fetch_snapshot(ctx, &server, false).await;
        if snapshot.is_none() {
            warn!(server = %server.name, "Presence feed unavailable, accounts reset to idle");
        }
        {
            let mut accounts = ctx.book.lock().await;
            for account in accounts.iter_mut() {
                project(account, snapshot.as_ref());
            }
        }
        debug!(
            server = %server.name,
            online = snapshot.as_ref().map_or(0, |s| s.online_count),
            "Reconcile pass applied"
        );

        self.reconnect_scan(session).await;
        true
    }

    /// Offline, active accounts that no loop is working on get one. A client
    /// the account still owns is killed first, unless it was launched so
    /// recently that the feed may simply not have caught up.
    async fn reconnect_scan(&self, session: &CancellationToken) {
        if session.is_cancelled() {
            return;
        }
        let ctx = &self.ctx;
        let grace = chrono::Duration::from_std(ctx.timings().launch_grace)
            .unwrap_or_else(|_| chrono::Duration::seconds(90));
        let now = Utc::now();

        let mut candidates = Vec::new();
        let mut stale = Vec::new();
        {
            let mut accounts = ctx.book.lock().await;
            for account in accounts.iter_mut() {
                if !account.is_bot_active
                    || account.is_reconnecting
                    || account.status != AccountStatus::Offline
                {
                    continue;
                }
                let pid = account.external_process_id;
                if pid != 0 {
                    let recent = account.launched_at.is_some_and(|t| now - t < grace);
                    if recent {
                        debug!(account = %account.character(), pid, "Within launch grace, not stale");
                        continue;
                    }
                    stale.push((account.character().to_string(), pid));
                    continue;
                }
                candidates.push(account.character().to_string());
            }
        }

        // A client that survives the kill stays owned by its account so no
        // second client is launched next to it; the next pass tries again.
        let mut killed = false;
        for (character, pid) in stale {
            if ctx.automation.is_process_alive(pid) {
                match ctx.automation.kill_process(pid) {
                    Ok(()) => {
                        info!(account = %character, pid, "Killed stale client");
                        killed = true;
                    }
                    Err(e) => {
                        warn!(account = %character, pid, "Failed to kill stale client: {}", e);
                        continue;
                    }
                }
            }
            ctx.book
                .update(&character, |a| {
                    if a.external_process_id == pid {
                        a.external_process_id = 0;
                    }
                })
                .await;
            candidates.push(character);
        }
        if killed {
            tokio::select! {
                _ = session.cancelled() => return,
                _ = tokio::time::sleep(ctx.timings().stale_kill_grace) => {}
            }
        }

        for character in candidates {
            supervisor::maybe_reconnect(ctx.clone(), &character, session.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests;
