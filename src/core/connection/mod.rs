//! Per-account login sequence that pilots the game client through its
//! screens, one attempt at a time system-wide.

pub mod probes;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::account::AccountStatus;
use crate::core::context::Context;
use crate::platform::{AutomationError, ShowMode, WindowHandle};
use probes::{
    AUTOMATION_TOGGLE_KEY, CHARACTER_SELECT, CHARACTER_SLOT, MAP_LOADED, SERVER_ENTRY,
    SERVER_SELECT, ScreenAction, ScreenSignature,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Launching,
    AwaitingWindow,
    AwaitingServerSelect,
    AwaitingCharacterSelect,
    AwaitingMapLoad,
    Connected,
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Launching => "launching",
            ConnectionState::AwaitingWindow => "awaiting_window",
            ConnectionState::AwaitingServerSelect => "awaiting_server_select",
            ConnectionState::AwaitingCharacterSelect => "awaiting_character_select",
            ConnectionState::AwaitingMapLoad => "awaiting_map_load",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }

    /// Holding the launch gate, somewhere between spawn and login.
    pub fn is_in_progress(self) -> bool {
        !matches!(
            self,
            ConnectionState::Idle | ConnectionState::Connected | ConnectionState::Failed
        )
    }
}

/// Moves forward strictly one step at a time; `Failed` is reachable from any
/// in-progress state.
pub fn can_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;
    if to == Failed {
        return from.is_in_progress();
    }
    matches!(
        (from, to),
        (Idle, Launching)
            | (Launching, AwaitingWindow)
            | (AwaitingWindow, AwaitingServerSelect)
            | (AwaitingServerSelect, AwaitingCharacterSelect)
            | (AwaitingCharacterSelect, AwaitingMapLoad)
            | (AwaitingMapLoad, Connected)
    )
}

#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub account: String,
    pub state: ConnectionState,
    pub pid: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("account is no longer monitored")]
    AccountMissing,
    #[error("no active server selected")]
    NoServer,
    #[error("cancelled before launch")]
    Cancelled,
    #[error("client failed to start: {0}")]
    Spawn(#[source] AutomationError),
    #[error("client process exited during {}", .0.as_str())]
    ProcessExited(ConnectionState),
    #[error("client window lost during {}", .0.as_str())]
    WindowLost(ConnectionState),
    #[error("no client window after {0} polls")]
    WindowTimeout(u32),
    #[error("{screen} not recognized after {polls} polls")]
    ScreenTimeout { screen: &'static str, polls: u32 },
    #[error("could not focus the client window during {}", .0.as_str())]
    Focus(ConnectionState),
    #[error("automation failed: {0}")]
    Automation(#[from] AutomationError),
    #[error("attempt aborted unexpectedly: {0}")]
    Panicked(String),
}

/// System-wide token allowing one launch/login sequence at a time. The
/// permit is returned when dropped, on every exit path.
#[derive(Clone)]
pub struct LaunchGate {
    permits: Arc<Semaphore>,
}

pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl Default for LaunchGate {
    fn default() -> Self {
        Self::new()
    }
}

impl LaunchGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    pub async fn acquire(&self) -> GatePermit {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("launch gate semaphore is never closed");
        GatePermit { _permit: permit }
    }

    #[cfg(test)]
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    pub fn is_available(&self) -> bool {
        self.permits.available_permits() > 0
    }
}

/// Ephemeral bookkeeping for one launch.
struct ConnectionAttempt {
    account: String,
    state: ConnectionState,
    pid: u32,
    window: Option<WindowHandle>,
    polls: u32,
    permit: Option<GatePermit>,
}

impl ConnectionAttempt {
    fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
            state: ConnectionState::Idle,
            pid: 0,
            window: None,
            polls: 0,
            permit: None,
        }
    }

    fn enter(&mut self, ctx: &Context, next: ConnectionState) {
        debug_assert!(
            can_transition(self.state, next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            account = %self.account,
            from = self.state.as_str(),
            to = next.as_str(),
            polls = self.polls,
            "Connection state change"
        );
        self.state = next;
        self.polls = 0;
        let _ = ctx.events.send(ConnectionEvent {
            account: self.account.clone(),
            state: next,
            pid: self.pid,
        });
    }
}

/// Run one full login attempt for `character` and return the client's pid on
/// success. Failures, including panics inside the attempt, have already been
/// cleaned up when this returns: process killed, pid cleared, account
/// Offline, gate released.
pub async fn connect(
    ctx: Arc<Context>,
    character: &str,
    cancel: CancellationToken,
) -> Result<u32, ConnectionError> {
    let task = tokio::spawn(run_attempt(ctx.clone(), character.to_string(), cancel));
    match task.await {
        Ok(result) => result,
        Err(join_err) => {
            let reason = panic_reason(join_err);
            error!(account = %character, "Connection attempt aborted: {}", reason);
            cleanup_after_abort(&ctx, character).await;
            Err(ConnectionError::Panicked(reason))
        }
    }
}

fn panic_reason(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// The attempt's own state died with it, so the pid is recovered from the
/// account record.
async fn cleanup_after_abort(ctx: &Context, character: &str) {
    let pid = ctx
        .book
        .update(character, |a| {
            let pid = a.external_process_id;
            a.external_process_id = 0;
            a.status = AccountStatus::Offline;
            pid
        })
        .await
        .unwrap_or(0);
    kill_if_alive(ctx, character, pid);
    let _ = ctx.events.send(ConnectionEvent {
        account: character.to_string(),
        state: ConnectionState::Failed,
        pid,
    });
}

fn kill_if_alive(ctx: &Context, character: &str, pid: u32) {
    if pid == 0 || !ctx.automation.is_process_alive(pid) {
        return;
    }
    match ctx.automation.kill_process(pid) {
        Ok(()) => info!(account = %character, pid, "Killed client process"),
        Err(e) => warn!(account = %character, pid, "Failed to kill client process: {}", e),
    }
}

async fn run_attempt(
    ctx: Arc<Context>,
    character: String,
    cancel: CancellationToken,
) -> Result<u32, ConnectionError> {
    let mut attempt = ConnectionAttempt::new(&character);
    match drive(&ctx, &mut attempt, &cancel).await {
        Ok(()) => Ok(attempt.pid),
        Err(e) => {
            fail(&ctx, &mut attempt, &e).await;
            Err(e)
        }
    }
}

async fn fail(ctx: &Context, attempt: &mut ConnectionAttempt, err: &ConnectionError) {
    if matches!(err, ConnectionError::Cancelled | ConnectionError::AccountMissing) {
        info!(account = %attempt.account, "Connection attempt stopped: {}", err);
        attempt.permit = None;
        return;
    }
    warn!(
        account = %attempt.account,
        state = attempt.state.as_str(),
        pid = attempt.pid,
        "Connection attempt failed: {}",
        err
    );
    if attempt.state.is_in_progress() {
        attempt.enter(ctx, ConnectionState::Failed);
    }
    kill_if_alive(ctx, &attempt.account, attempt.pid);
    let pid = attempt.pid;
    ctx.book
        .update(&attempt.account, |a| {
            if pid == 0 || a.external_process_id == pid {
                a.external_process_id = 0;
            }
            a.status = AccountStatus::Offline;
        })
        .await;
    attempt.pid = 0;
    attempt.permit = None;
}

async fn drive(
    ctx: &Arc<Context>,
    attempt: &mut ConnectionAttempt,
    cancel: &CancellationToken,
) -> Result<(), ConnectionError> {
    launch(ctx, attempt, cancel).await?;
    await_window(ctx, attempt).await?;

    let stages = [
        (
            ConnectionState::AwaitingServerSelect,
            SERVER_SELECT,
            ScreenAction::DoubleClick(SERVER_ENTRY),
        ),
        (
            ConnectionState::AwaitingCharacterSelect,
            CHARACTER_SELECT,
            ScreenAction::DoubleClick(CHARACTER_SLOT),
        ),
        (
            ConnectionState::AwaitingMapLoad,
            MAP_LOADED,
            ScreenAction::PressKey(AUTOMATION_TOGGLE_KEY),
        ),
    ];
    for (state, screen, action) in stages {
        attempt.enter(ctx, state);
        await_screen(ctx, attempt, &screen).await?;
        let window = attempt
            .window
            .ok_or(ConnectionError::WindowLost(attempt.state))?;
        ensure_focus(ctx, attempt, window).await?;
        match action {
            ScreenAction::DoubleClick(at) => {
                if let Ok((x, y)) = ctx.automation.client_to_screen(window, at) {
                    debug!(account = %attempt.account, x, y, "Double-click at screen point");
                }
                ctx.automation.double_click(window, at)?
            }
            ScreenAction::PressKey(key) => ctx.automation.press_key(window, key)?,
        }
        info!(account = %attempt.account, screen = screen.name, "Screen passed");
    }

    finish(ctx, attempt).await;
    Ok(())
}

async fn launch(
    ctx: &Context,
    attempt: &mut ConnectionAttempt,
    cancel: &CancellationToken,
) -> Result<(), ConnectionError> {
    let account = ctx
        .book
        .get(&attempt.account)
        .await
        .ok_or(ConnectionError::AccountMissing)?;
    let server = ctx.active_server().await.ok_or(ConnectionError::NoServer)?;

    let permit = tokio::select! {
        permit = ctx.gate.acquire() => permit,
        _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
    };
    attempt.permit = Some(permit);
    attempt.enter(ctx, ConnectionState::Launching);

    let args = server
        .launch
        .command_line(&account.record.username, &account.record.password);
    let pid = ctx
        .automation
        .launch(&ctx.config.client_path, &args)
        .map_err(ConnectionError::Spawn)?;
    attempt.pid = pid;
    ctx.book
        .update(&attempt.account, |a| a.external_process_id = pid)
        .await;
    info!(account = %attempt.account, server = %server.name, pid, "Client launched");

    let automation = ctx.automation.clone();
    let timeout = ctx.timings().input_idle_timeout;
    let idle = tokio::task::spawn_blocking(move || automation.wait_for_input_idle(pid, timeout))
        .await
        .unwrap_or(false);
    if !idle {
        debug!(account = %attempt.account, pid, "Client did not report input idle");
    }
    Ok(())
}

fn check_process(ctx: &Context, attempt: &ConnectionAttempt) -> Result<(), ConnectionError> {
    if ctx.automation.is_process_alive(attempt.pid) {
        Ok(())
    } else {
        Err(ConnectionError::ProcessExited(attempt.state))
    }
}

async fn await_window(ctx: &Context, attempt: &mut ConnectionAttempt) -> Result<(), ConnectionError> {
    attempt.enter(ctx, ConnectionState::AwaitingWindow);
    let timings = ctx.timings();
    while attempt.polls < timings.window_poll_attempts {
        attempt.polls += 1;
        check_process(ctx, attempt)?;
        if let Some(window) = ctx.automation.find_window(attempt.pid) {
            debug!(account = %attempt.account, ?window, "Client window found");
            attempt.window = Some(window);
            if let Err(e) = ctx.automation.show_window(window, ShowMode::Restore) {
                debug!(account = %attempt.account, "Restore window failed: {}", e);
            }
            return Ok(());
        }
        tokio::time::sleep(timings.window_poll_interval).await;
    }
    Err(ConnectionError::WindowTimeout(attempt.polls))
}

async fn await_screen(
    ctx: &Context,
    attempt: &mut ConnectionAttempt,
    screen: &ScreenSignature,
) -> Result<(), ConnectionError> {
    let timings = ctx.timings();
    let window = attempt
        .window
        .ok_or(ConnectionError::WindowLost(attempt.state))?;
    while attempt.polls < timings.screen_poll_attempts {
        attempt.polls += 1;
        check_process(ctx, attempt)?;
        if !ctx.automation.is_window(window) {
            return Err(ConnectionError::WindowLost(attempt.state));
        }
        if screen_matches(ctx, attempt, window, screen)? {
            return Ok(());
        }
        tokio::time::sleep(timings.screen_poll_interval).await;
    }
    Err(ConnectionError::ScreenTimeout {
        screen: screen.name,
        polls: attempt.polls,
    })
}

fn screen_matches(
    ctx: &Context,
    attempt: &ConnectionAttempt,
    window: WindowHandle,
    screen: &ScreenSignature,
) -> Result<bool, ConnectionError> {
    for probe in screen.probes {
        match ctx.automation.sample_pixel(window, probe.at) {
            Ok(color) if probe.matches(color) => {}
            Ok(color) => {
                debug!(
                    account = %attempt.account,
                    probe = probe.name,
                    ?color,
                    "Probe mismatch"
                );
                return Ok(false);
            }
            Err(AutomationError::WindowGone(_)) => {
                return Err(ConnectionError::WindowLost(attempt.state));
            }
            Err(e @ AutomationError::Unsupported(_)) => return Err(e.into()),
            Err(e) => {
                debug!(account = %attempt.account, probe = probe.name, "Sample failed: {}", e);
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Input is only sent to a window that holds OS focus.
async fn ensure_focus(
    ctx: &Context,
    attempt: &ConnectionAttempt,
    window: WindowHandle,
) -> Result<(), ConnectionError> {
    let timings = ctx.timings();
    for _ in 0..timings.focus_attempts {
        if ctx.automation.foreground_window() == Some(window) {
            return Ok(());
        }
        if let Err(e) = ctx.automation.show_window(window, ShowMode::Restore) {
            debug!(account = %attempt.account, "Restore window failed: {}", e);
        }
        if let Err(e) = ctx.automation.set_foreground(window) {
            debug!(account = %attempt.account, "Focus request failed: {}", e);
        }
        tokio::time::sleep(timings.focus_settle).await;
    }
    if ctx.automation.foreground_window() == Some(window) {
        Ok(())
    } else {
        Err(ConnectionError::Focus(attempt.state))
    }
}

async fn finish(ctx: &Arc<Context>, attempt: &mut ConnectionAttempt) {
    if let Some(window) = attempt.window
        && let Err(e) = ctx.automation.show_window(window, ShowMode::Minimize)
    {
        debug!(account = %attempt.account, "Minimize failed: {}", e);
    }
    spawn_liveness_monitor(ctx.clone(), attempt.account.clone(), attempt.pid);
    attempt.enter(ctx, ConnectionState::Connected);
    attempt.permit = None;
    ctx.book
        .update(&attempt.account, |a| {
            a.status = AccountStatus::Online;
            a.launched_at = Some(Utc::now());
        })
        .await;
    info!(account = %attempt.account, pid = attempt.pid, "Client connected");
}

/// Watch a connected client and clear the account's pid once it exits.
fn spawn_liveness_monitor(ctx: Arc<Context>, character: String, pid: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = ctx.timings().liveness_interval;
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            let owned = ctx
                .book
                .get(&character)
                .await
                .is_some_and(|a| a.external_process_id == pid);
            if !owned {
                debug!(account = %character, pid, "Liveness monitor released");
                return;
            }
            if !ctx.automation.is_process_alive(pid) {
                ctx.book
                    .update(&character, |a| {
                        if a.external_process_id == pid {
                            a.external_process_id = 0;
                        }
                    })
                    .await;
                info!(account = %character, pid, "Client process exited");
                return;
            }
        }
    })
}
