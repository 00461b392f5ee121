use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::AccountRecord;

/// Persistence seam for the ordered account list.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load(&self) -> Result<Vec<AccountRecord>>;
    async fn save(&self, accounts: &[AccountRecord]) -> Result<()>;
}

/// Plain-text store: one `character,username,password` per line.
pub struct FileAccountStore {
    path: PathBuf,
}

impl FileAccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
    async fn load(&self) -> Result<Vec<AccountRecord>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No account file yet, starting empty");
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(parse_accounts(&content))
    }

    async fn save(&self, accounts: &[AccountRecord]) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, render_accounts(accounts))
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

pub fn parse_accounts(content: &str) -> Vec<AccountRecord> {
    let mut out = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.splitn(3, ',').map(str::trim).collect();
        if fields.len() < 3 || fields.iter().any(|f| f.is_empty()) {
            warn!(line = idx + 1, "Skipping malformed account line");
            continue;
        }
        out.push(AccountRecord::new(fields[0], fields[1], fields[2]));
    }
    out
}

pub fn render_accounts(accounts: &[AccountRecord]) -> String {
    let mut out = String::from("# character,username,password\n");
    for a in accounts {
        out.push_str(&format!("{},{},{}\n", a.character, a.username, a.password));
    }
    out
}
