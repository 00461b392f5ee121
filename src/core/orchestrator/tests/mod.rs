
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::core::account::{AccountRecord, AccountStore};
use crate::core::orchestrator::Orchestrator;
use crate::core::testing::Harness;

#[derive(Default)]
pub(super) struct MemoryStore {
    records: Mutex<Vec<AccountRecord>>,
}

impl MemoryStore {
    pub(super) fn with(characters: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(
                characters
                    .iter()
                    .map(|c| AccountRecord::new(*c, "user", "pw"))
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn load(&self) -> Result<Vec<AccountRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn save(&self, accounts: &[AccountRecord]) -> Result<()> {
        *self.records.lock().unwrap() = accounts.to_vec();
        Ok(())
    }
}

pub(super) fn orchestrator(h: &Harness, characters: &[&str]) -> Orchestrator {
    Orchestrator::new(h.ctx.clone(), MemoryStore::with(characters))
}
