use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{Reconciler, ServerState, project, refresh_account};
use crate::core::account::{AccountRecord, AccountStatus, MonitoredAccount};
use crate::core::presence::PresenceSnapshot;
use crate::core::testing::{Harness, eventually, harness};
use crate::platform::fake::FakePlan;

fn snapshot() -> PresenceSnapshot {
    let mut snap = PresenceSnapshot::empty();
    snap.character_online.insert("Aria".to_string(), true);
    snap.character_level.insert("Aria".to_string(), 51);
    snap.character_experience.insert("Aria".to_string(), 12.5);
    snap.character_online.insert("Borin".to_string(), false);
    snap.online_count = 1;
    snap
}

fn account(name: &str) -> MonitoredAccount {
    MonitoredAccount::new(AccountRecord::new(name, "u", "p"))
}

#[test]
fn projection_follows_the_snapshot() {
    let snap = snapshot();

    let mut aria = account("Aria");
    project(&mut aria, Some(&snap));
    assert_eq!(aria.status, AccountStatus::Online);
    assert_eq!(aria.level, Some(51));
    assert_eq!(aria.experience, Some(12.5));

    let mut borin = account("borin");
    project(&mut borin, Some(&snap));
    assert_eq!(borin.status, AccountStatus::Offline);

    let mut cael = account("Cael");
    cael.level = Some(9);
    project(&mut cael, Some(&snap));
    assert_eq!(cael.status, AccountStatus::Idle);
    assert_eq!(cael.level, None);
}

#[test]
fn unavailable_feed_resets_to_idle_but_spares_editing() {
    let mut aria = account("Aria");
    aria.status = AccountStatus::Online;
    aria.level = Some(51);
    project(&mut aria, None);
    assert_eq!(aria.status, AccountStatus::Idle);
    assert_eq!(aria.level, None);

    let mut edited = account("Aria");
    edited.status = AccountStatus::Editing;
    edited.level = Some(51);
    project(&mut edited, Some(&snapshot()));
    assert_eq!(edited.status, AccountStatus::Editing);
    assert_eq!(edited.level, Some(51));
}

fn reconciler(h: &Harness) -> Arc<Reconciler> {
    Arc::new(Reconciler::new(h.ctx.clone()))
}

#[tokio::test]
async fn tick_applies_snapshot_and_server_status() {
    let h = harness(&["Aria", "Borin"], FakePlan::default());
    h.feed.set_online(&["Aria"], &["Borin"]);
    let r = reconciler(&h);

    assert!(r.tick(&CancellationToken::new()).await);

    let board = h.ctx.board.get().await.unwrap();
    assert_eq!(board.name, "Alpha");
    assert_eq!(board.state, ServerState::Online);
    assert_eq!(board.online_count, 1);
    assert_eq!(
        h.ctx.book.get("Aria").await.unwrap().status,
        AccountStatus::Online
    );
    assert_eq!(
        h.ctx.book.get("Borin").await.unwrap().status,
        AccountStatus::Offline
    );
    // Neither account is active, so nothing is launched.
    assert!(h.fake.launches().is_empty());
}

#[tokio::test]
async fn feed_failure_marks_server_offline() {
    let h = harness(&["Aria"], FakePlan::default());
    h.ctx
        .book
        .update("Aria", |a| {
            a.status = AccountStatus::Online;
            a.level = Some(51);
        })
        .await;
    h.feed.set(None);

    reconciler(&h).tick(&CancellationToken::new()).await;

    let board = h.ctx.board.get().await.unwrap();
    assert_eq!(board.state, ServerState::Offline);
    assert_eq!(board.online_count, 0);
    let aria = h.ctx.book.get("Aria").await.unwrap();
    assert_eq!(aria.status, AccountStatus::Idle);
    assert_eq!(aria.level, None);
}

#[tokio::test]
async fn fresh_snapshot_is_reused_between_ticks() {
    let h = harness(&["Aria"], FakePlan::default());
    h.feed.set_online(&["Aria"], &[]);
    let r = reconciler(&h);
    let session = CancellationToken::new();

    r.tick(&session).await;
    r.tick(&session).await;
    assert_eq!(h.feed.calls(), 1);

    refresh_account(&h.ctx, "Aria").await;
    assert_eq!(h.feed.calls(), 2);
}

#[tokio::test]
async fn stale_snapshot_is_refetched() {
    let h = harness(&["Aria"], FakePlan::default());
    h.feed.set_online(&["Aria"], &[]);
    let old = PresenceSnapshot::empty_at(Utc::now() - chrono::Duration::seconds(61));
    h.ctx.cache.put("Alpha", old).await;

    reconciler(&h).tick(&CancellationToken::new()).await;
    assert_eq!(h.feed.calls(), 1);
    assert_eq!(
        h.ctx.book.get("Aria").await.unwrap().status,
        AccountStatus::Online
    );
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let h = harness(&["Aria"], FakePlan::default());
    let r = reconciler(&h);
    let _running = r.pass.lock().await;
    assert!(!r.tick(&CancellationToken::new()).await);
    assert_eq!(h.feed.calls(), 0);
}

#[tokio::test]
async fn offline_active_account_gets_exactly_one_loop() {
    let h = harness(&["Aria"], FakePlan::default());
    h.ctx.book.update("Aria", |a| a.is_bot_active = true).await;
    h.feed.set_online(&[], &["Aria"]);
    let r = reconciler(&h);
    let session = CancellationToken::new();

    r.tick(&session).await;
    r.tick(&session).await;

    let book = h.ctx.book.clone();
    assert!(
        eventually(Duration::from_secs(3), || {
            let book = book.clone();
            async move {
                let a = book.get("Aria").await.unwrap();
                a.external_process_id != 0 && !a.is_reconnecting
            }
        })
        .await
    );
    // The feed still lags behind; the fresh client is within launch grace.
    r.tick(&session).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.fake.launches().len(), 1);
    assert!(h.fake.kills().is_empty());
    h.ctx.shutdown.cancel();
}

#[tokio::test]
async fn stale_client_is_killed_before_reconnect() {
    let h = harness(&["Aria"], FakePlan::default());
    let leftover = h.fake.spawn_detached();
    h.ctx
        .book
        .update("Aria", |a| {
            a.is_bot_active = true;
            a.external_process_id = leftover;
        })
        .await;
    h.feed.set_online(&[], &["Aria"]);

    reconciler(&h).tick(&CancellationToken::new()).await;
    assert_eq!(h.fake.kills(), vec![leftover]);

    let fake = h.fake.clone();
    assert!(
        eventually(Duration::from_secs(3), || {
            let fake = fake.clone();
            async move { fake.launches().len() == 1 }
        })
        .await
    );
    h.ctx.shutdown.cancel();
}

#[tokio::test]
async fn client_that_survives_kill_stays_owned() {
    let h = harness(
        &["Aria"],
        FakePlan {
            refuse_kill: true,
            ..FakePlan::default()
        },
    );
    let leftover = h.fake.spawn_detached();
    h.ctx
        .book
        .update("Aria", |a| {
            a.is_bot_active = true;
            a.external_process_id = leftover;
        })
        .await;
    h.feed.set_online(&[], &["Aria"]);

    let r = reconciler(&h);
    r.tick(&CancellationToken::new()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let aria = h.ctx.book.get("Aria").await.unwrap();
    assert_eq!(aria.external_process_id, leftover);
    assert!(!aria.is_reconnecting);
    assert!(h.fake.launches().is_empty());

    // Once the client is gone the next pass takes over.
    h.fake.crash(leftover);
    r.tick(&CancellationToken::new()).await;
    let fake = h.fake.clone();
    assert!(
        eventually(Duration::from_secs(3), || {
            let fake = fake.clone();
            async move { fake.launches().len() == 1 }
        })
        .await
    );
    h.ctx.shutdown.cancel();
}

#[tokio::test]
async fn editing_accounts_are_not_reconnected() {
    let h = harness(&["Aria"], FakePlan::default());
    h.ctx
        .book
        .update("Aria", |a| {
            a.is_bot_active = true;
            a.status = AccountStatus::Editing;
        })
        .await;
    h.feed.set_online(&[], &["Aria"]);

    reconciler(&h).tick(&CancellationToken::new()).await;
    let aria = h.ctx.book.get("Aria").await.unwrap();
    assert_eq!(aria.status, AccountStatus::Editing);
    assert!(!aria.is_reconnecting);
}

#[tokio::test]
async fn run_stops_on_cancellation() {
    let h = harness(&["Aria"], FakePlan::default());
    h.feed.set_online(&["Aria"], &[]);
    let session = CancellationToken::new();
    let task = tokio::spawn(reconciler(&h).run(session.clone()));

    let feed = h.feed.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            let feed = feed.clone();
            async move { feed.calls() >= 1 }
        })
        .await
    );
    session.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("reconciler exits")
        .unwrap();
}
