mod types;

pub use types::{CommandReply, OrchestratorCommand, StatusReport};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::account::{AccountStatus, AccountStore};
use crate::core::context::Context;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::reconciler::{self, Reconciler};
use crate::core::supervisor;

/// A running reconcile loop and the token its supervisors hang off.
struct Session {
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Orchestrator {
    ctx: Arc<Context>,
    store: Arc<dyn AccountStore>,
    reconciler: Arc<Reconciler>,
    session: Mutex<Option<Session>>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<Context>, store: Arc<dyn AccountStore>) -> Self {
        Self {
            reconciler: Arc::new(Reconciler::new(ctx.clone())),
            ctx,
            store,
            session: Mutex::new(None),
        }
    }

    /// Pull the account list from the store, keeping runtime state for
    /// characters already monitored.
    pub async fn load_accounts(&self) -> Result<usize> {
        let records = self.store.load().await?;
        let count = records.len();
        self.ctx.book.replace_records(records).await;
        info!(accounts = count, "Accounts loaded");
        Ok(count)
    }

    pub async fn is_paused(&self) -> bool {
        self.session.lock().await.is_none()
    }

    async fn session_token(&self) -> Option<CancellationToken> {
        self.session.lock().await.as_ref().map(|s| s.token.clone())
    }

    /// False when a session is already running.
    async fn start_session(&self) -> bool {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return false;
        }
        let token = self.ctx.shutdown.child_token();
        let task = tokio::spawn(self.reconciler.clone().run(token.clone()));
        *session = Some(Session { token, task });
        info!("Monitoring session started");
        true
    }

    /// Cancel the running session. Loops stop between iterations; a login
    /// already past its launch runs to completion.
    async fn stop_session(&self) -> Option<JoinHandle<()>> {
        let session = self.session.lock().await.take()?;
        session.token.cancel();
        info!("Monitoring session paused");
        Some(session.task)
    }

    pub async fn dispatch(&self, cmd: OrchestratorCommand) -> Result<CommandReply> {
        let reply = match cmd {
            OrchestratorCommand::Activate(name) => self.activate(&name).await?,
            OrchestratorCommand::Deactivate(name) => {
                self.set_active(&name, false).await?;
                format!("{} deactivated", name)
            }
            OrchestratorCommand::ActivateAll => self.set_all_active(true).await,
            OrchestratorCommand::DeactivateAll => self.set_all_active(false).await,
            OrchestratorCommand::Kill(name) => self.kill(&name).await?,
            OrchestratorCommand::SelectServer(name) => self.select_server(&name).await?,
            OrchestratorCommand::Refresh(None) => {
                if let Some(server) = self.ctx.active_server().await {
                    self.ctx.cache.invalidate(&server.name).await;
                }
                let token = self.session_token().await.unwrap_or_else(cancelled_token);
                if self.reconciler.tick(&token).await {
                    "Presence refreshed".to_string()
                } else {
                    "A reconcile pass is already running".to_string()
                }
            }
            OrchestratorCommand::Refresh(Some(name)) => {
                let status = reconciler::refresh_account(&self.ctx, &name)
                    .await
                    .ok_or_else(|| anyhow!("unknown account '{}' or no active server", name))?;
                format!("{} is {}", name, status.as_str())
            }
            OrchestratorCommand::Pause => match self.stop_session().await {
                Some(_) => "Paused".to_string(),
                None => "Already paused".to_string(),
            },
            OrchestratorCommand::Resume => {
                if self.start_session().await {
                    "Resumed".to_string()
                } else {
                    "Already running".to_string()
                }
            }
            OrchestratorCommand::Status => return Ok(CommandReply::Status(self.status().await)),
            OrchestratorCommand::Shutdown => {
                self.shutdown().await;
                return Ok(CommandReply::Stopped);
            }
        };
        Ok(CommandReply::Done(reply))
    }

    async fn set_active(&self, name: &str, active: bool) -> Result<()> {
        self.ctx
            .book
            .update(name, |a| a.is_bot_active = active)
            .await
            .ok_or_else(|| anyhow!("unknown account '{}'", name))?;
        info!(account = %name, active, "Monitoring toggled");
        Ok(())
    }

    /// Activation reconnects right away when the feed already reports the
    /// character offline; otherwise the next pass decides.
    async fn activate(&self, name: &str) -> Result<String> {
        self.set_active(name, true).await?;
        let Some(token) = self.session_token().await else {
            return Ok(format!("{} activated (paused)", name));
        };
        let status = reconciler::refresh_account(&self.ctx, name).await;
        if status == Some(AccountStatus::Offline)
            && supervisor::maybe_reconnect(self.ctx.clone(), name, token)
                .await
                .is_some()
        {
            return Ok(format!("{} activated, reconnecting", name));
        }
        Ok(format!("{} activated", name))
    }

    async fn set_all_active(&self, active: bool) -> String {
        let count = {
            let mut accounts = self.ctx.book.lock().await;
            for account in accounts.iter_mut() {
                account.is_bot_active = active;
            }
            accounts.len()
        };
        info!(accounts = count, active, "Monitoring toggled for all accounts");
        if active && let Some(token) = self.session_token().await {
            self.reconciler.tick(&token).await;
        }
        format!(
            "{} account(s) {}",
            count,
            if active { "activated" } else { "deactivated" }
        )
    }

    async fn kill(&self, name: &str) -> Result<String> {
        let pid = self
            .ctx
            .book
            .update(name, |a| {
                a.is_bot_active = false;
                std::mem::take(&mut a.external_process_id)
            })
            .await
            .ok_or_else(|| anyhow!("unknown account '{}'", name))?;
        if pid == 0 || !self.ctx.automation.is_process_alive(pid) {
            return Ok(format!("{} has no running client", name));
        }
        self.ctx.automation.kill_process(pid)?;
        info!(account = %name, pid, "Client killed on request");
        Ok(format!("Killed client {} of {}", pid, name))
    }

    async fn select_server(&self, name: &str) -> Result<String> {
        self.ctx.select_server(name).await?;
        let mut accounts = self.ctx.book.lock().await;
        for account in accounts.iter_mut() {
            if account.status != AccountStatus::Editing {
                account.status = AccountStatus::Idle;
                account.clear_progress();
            }
        }
        Ok(format!("Active server is now {}", name))
    }

    pub async fn status(&self) -> StatusReport {
        StatusReport {
            server: self.ctx.board.get().await,
            paused: self.is_paused().await,
            launch_in_progress: !self.ctx.gate.is_available(),
            accounts: self.ctx.book.snapshot().await,
        }
    }

    /// Stop every loop and monitor. Clients keep running.
    pub async fn shutdown(&self) {
        if let Some(task) = self.stop_session().await
            && let Err(e) = task.await
        {
            warn!("Reconciler ended abnormally: {}", e);
        }
        self.ctx.shutdown.cancel();
        info!("Orchestrator stopped");
    }
}

fn cancelled_token() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}

#[async_trait]
impl LifecycleComponent for Orchestrator {
    fn name(&self) -> &'static str {
        "orchestrator"
    }

    async fn on_init(&self) -> Result<()> {
        self.load_accounts().await.map(|_| ())
    }

    async fn on_start(&self) -> Result<()> {
        self.start_session().await;
        Ok(())
    }

    async fn on_shutdown(&self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
