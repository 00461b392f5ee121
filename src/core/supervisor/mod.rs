//! Per-account retry loop wrapped around the connection state machine.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::account::AccountStatus;
use crate::core::connection::{self, ConnectionError};
use crate::core::context::Context;
use crate::core::reconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Connected,
    AlreadyOnline,
    Deactivated,
    Cancelled,
}

enum Assignment {
    Assigned,
    TimedOut,
    Deactivated,
    Cancelled,
}

/// Start a reconnect loop for `character` unless one is running or the
/// account does not want one. The eligibility check and the claim happen
/// under the account book lock, so concurrent triggers start at most one
/// loop. `is_reconnecting` is cleared when the loop ends, however it ends.
pub async fn maybe_reconnect(
    ctx: Arc<Context>,
    character: &str,
    session: CancellationToken,
) -> Option<JoinHandle<()>> {
    let claimed = ctx
        .book
        .update(character, |a| {
            if a.wants_reconnect() {
                a.is_reconnecting = true;
                true
            } else {
                false
            }
        })
        .await
        .unwrap_or(false);
    if !claimed {
        debug!(account = %character, "Reconnect not started");
        return None;
    }

    info!(account = %character, "Reconnect loop started");
    let character = character.to_string();
    Some(tokio::spawn(async move {
        let inner = tokio::spawn(retry_loop(ctx.clone(), character.clone(), session));
        match inner.await {
            Ok(exit) => info!(account = %character, ?exit, "Reconnect loop finished"),
            Err(e) => error!(account = %character, "Reconnect loop aborted: {}", e),
        }
        ctx.book
            .update(&character, |a| a.is_reconnecting = false)
            .await;
    }))
}

async fn is_active(ctx: &Context, character: &str) -> bool {
    ctx.book
        .get(character)
        .await
        .is_some_and(|a| a.is_bot_active)
}

async fn retry_loop(ctx: Arc<Context>, character: String, session: CancellationToken) -> LoopExit {
    let timings = ctx.timings().clone();
    let mut attempt = 0u32;
    loop {
        if session.is_cancelled() {
            return LoopExit::Cancelled;
        }
        if !is_active(&ctx, &character).await {
            return LoopExit::Deactivated;
        }

        if attempt > 0 {
            tokio::select! {
                _ = session.cancelled() => return LoopExit::Cancelled,
                _ = tokio::time::sleep(timings.retry_delay) => {}
            }
            if reconciler::refresh_account(&ctx, &character).await == Some(AccountStatus::Online) {
                return LoopExit::AlreadyOnline;
            }
            if !is_active(&ctx, &character).await {
                return LoopExit::Deactivated;
            }
        }
        attempt += 1;

        match connection::connect(ctx.clone(), &character, session.clone()).await {
            Ok(pid) => debug!(account = %character, attempt, pid, "Attempt succeeded"),
            Err(ConnectionError::Cancelled) => return LoopExit::Cancelled,
            Err(ConnectionError::AccountMissing) => return LoopExit::Deactivated,
            Err(e) => warn!(account = %character, attempt, "Reconnect attempt failed: {}", e),
        }

        match wait_for_assignment(&ctx, &character, &session).await {
            Assignment::Assigned => return LoopExit::Connected,
            Assignment::Deactivated => return LoopExit::Deactivated,
            Assignment::Cancelled => return LoopExit::Cancelled,
            Assignment::TimedOut => {
                warn!(account = %character, attempt, "Client never claimed by account, retrying");
            }
        }
    }
}

async fn wait_for_assignment(
    ctx: &Context,
    character: &str,
    session: &CancellationToken,
) -> Assignment {
    let timings = ctx.timings();
    let deadline = tokio::time::Instant::now() + timings.assignment_timeout;
    loop {
        match ctx.book.get(character).await {
            Some(a) if !a.is_bot_active => return Assignment::Deactivated,
            Some(a) if a.external_process_id != 0 => return Assignment::Assigned,
            Some(_) => {}
            None => return Assignment::Deactivated,
        }
        if tokio::time::Instant::now() >= deadline {
            return Assignment::TimedOut;
        }
        tokio::select! {
            _ = session.cancelled() => return Assignment::Cancelled,
            _ = tokio::time::sleep(timings.assignment_poll_interval) => {}
        }
    }
}
