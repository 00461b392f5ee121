//! Monitored accounts and the shared account book every component mutates
//! through. Holding the book lock is the only way to touch an account, which
//! makes it the single logical execution context for account state.

mod store;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

pub use store::{AccountStore, FileAccountStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Idle,
    Checking,
    Online,
    Offline,
    Editing,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Idle => "idle",
            AccountStatus::Checking => "checking",
            AccountStatus::Online => "online",
            AccountStatus::Offline => "offline",
            AccountStatus::Editing => "editing",
        }
    }
}

/// Persisted part of an account: what the account store loads and saves.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub character: String,
    pub username: String,
    pub password: String,
}

impl AccountRecord {
    pub fn new(
        character: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            character: character.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRecord")
            .field("character", &self.character)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct MonitoredAccount {
    pub record: AccountRecord,
    pub status: AccountStatus,
    pub is_bot_active: bool,
    pub is_reconnecting: bool,
    /// Process id of the client this account owns, 0 when none.
    pub external_process_id: u32,
    pub level: Option<u32>,
    /// Experience towards the next level, in percent.
    pub experience: Option<f64>,
    pub launched_at: Option<DateTime<Utc>>,
}

impl MonitoredAccount {
    pub fn new(record: AccountRecord) -> Self {
        Self {
            record,
            status: AccountStatus::Idle,
            is_bot_active: false,
            is_reconnecting: false,
            external_process_id: 0,
            level: None,
            experience: None,
            launched_at: None,
        }
    }

    pub fn character(&self) -> &str {
        &self.record.character
    }

    pub fn clear_progress(&mut self) {
        self.level = None;
        self.experience = None;
    }

    /// Eligible for a reconnect loop right now.
    pub fn wants_reconnect(&self) -> bool {
        self.is_bot_active && self.external_process_id == 0 && !self.is_reconnecting
    }
}

impl std::fmt::Debug for MonitoredAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredAccount")
            .field("character", &self.record.character)
            .field("status", &self.status)
            .field("is_bot_active", &self.is_bot_active)
            .field("is_reconnecting", &self.is_reconnecting)
            .field("external_process_id", &self.external_process_id)
            .field("level", &self.level)
            .field("experience", &self.experience)
            .finish()
    }
}

/// Ordered, mutex-protected list of monitored accounts.
#[derive(Clone, Default)]
pub struct AccountBook {
    inner: Arc<Mutex<Vec<MonitoredAccount>>>,
}

impl AccountBook {
    #[cfg(test)]
    pub fn new(records: Vec<AccountRecord>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(
                records.into_iter().map(MonitoredAccount::new).collect(),
            )),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Vec<MonitoredAccount>> {
        self.inner.lock().await
    }

    pub async fn snapshot(&self) -> Vec<MonitoredAccount> {
        self.inner.lock().await.clone()
    }

    pub async fn get(&self, character: &str) -> Option<MonitoredAccount> {
        self.inner
            .lock()
            .await
            .iter()
            .find(|a| a.character() == character)
            .cloned()
    }

    /// Run `f` against one account while holding the book lock.
    /// Returns `None` when no account has that character name.
    pub async fn update<R>(
        &self,
        character: &str,
        f: impl FnOnce(&mut MonitoredAccount) -> R,
    ) -> Option<R> {
        let mut accounts = self.inner.lock().await;
        accounts
            .iter_mut()
            .find(|a| a.character() == character)
            .map(f)
    }

    pub async fn records(&self) -> Vec<AccountRecord> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|a| a.record.clone())
            .collect()
    }

    /// Replace the account list with `records`, keeping the runtime state of
    /// characters that survive the change.
    pub async fn replace_records(&self, records: Vec<AccountRecord>) {
        let mut accounts = self.inner.lock().await;
        let mut next = Vec::with_capacity(records.len());
        for record in records {
            match accounts
                .iter()
                .position(|a| a.character() == record.character)
            {
                Some(idx) => {
                    let mut kept = accounts.swap_remove(idx);
                    kept.record = record;
                    next.push(kept);
                }
                None => next.push(MonitoredAccount::new(record)),
            }
        }
        *accounts = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> AccountBook {
        AccountBook::new(vec![
            AccountRecord::new("Aria", "aria_login", "pw1"),
            AccountRecord::new("Borin", "borin_login", "pw2"),
        ])
    }

    #[tokio::test]
    async fn update_mutates_only_the_named_account() {
        let book = book();
        let found = book
            .update("Borin", |a| {
                a.is_bot_active = true;
                a.external_process_id = 42;
            })
            .await;
        assert!(found.is_some());
        let aria = book.get("Aria").await.unwrap();
        let borin = book.get("Borin").await.unwrap();
        assert!(!aria.is_bot_active);
        assert_eq!(borin.external_process_id, 42);
    }

    #[tokio::test]
    async fn update_unknown_character_returns_none() {
        assert!(book().update("Ghost", |_| ()).await.is_none());
    }

    #[tokio::test]
    async fn replace_records_keeps_runtime_state_of_survivors() {
        let book = book();
        book.update("Aria", |a| a.is_bot_active = true).await;
        book.replace_records(vec![
            AccountRecord::new("Cara", "c", "p"),
            AccountRecord::new("Aria", "aria_login", "new-pw"),
        ])
        .await;

        let accounts = book.snapshot().await;
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].character(), "Cara");
        assert_eq!(accounts[1].character(), "Aria");
        assert!(accounts[1].is_bot_active);
        assert_eq!(accounts[1].record.password, "new-pw");
    }

    #[test]
    fn debug_output_hides_password() {
        let record = AccountRecord::new("Aria", "login", "hunter2");
        let rendered = format!("{:?}", MonitoredAccount::new(record.clone()));
        assert!(!rendered.contains("hunter2"));
        assert!(!format!("{:?}", record).contains("hunter2"));
    }

    #[test]
    fn wants_reconnect_requires_active_idle_process_and_no_loop() {
        let mut account = MonitoredAccount::new(AccountRecord::new("Aria", "a", "b"));
        assert!(!account.wants_reconnect());
        account.is_bot_active = true;
        assert!(account.wants_reconnect());
        account.external_process_id = 7;
        assert!(!account.wants_reconnect());
        account.external_process_id = 0;
        account.is_reconnecting = true;
        assert!(!account.wants_reconnect());
    }
}
