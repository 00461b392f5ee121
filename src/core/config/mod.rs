use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::presence::FeedFormat;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Game client executable.
    #[serde(default)]
    pub client_path: PathBuf,

    /// Account list, relative paths resolve against the config file.
    #[serde(default = "default_accounts_file")]
    pub accounts_file: PathBuf,

    /// Name of the server selected at startup; first server when absent.
    #[serde(default)]
    pub active_server: Option<String>,

    #[serde(default)]
    pub servers: Vec<ServerTarget>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub timings: Timings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerTarget {
    pub name: String,
    pub feed_url: String,
    #[serde(default)]
    pub feed_format: FeedFormat,
    pub launch: LaunchParameters,
}

/// Positional connection fields the client expects on its command line.
/// Values are reproduced literally; the client rejects anything else.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchParameters {
    pub client_version: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_session_flag")]
    pub session_flag: String,
    #[serde(default = "default_client_type")]
    pub client_type: String,
    pub realm_code: String,
}

impl LaunchParameters {
    pub fn command_line(&self, username: &str, password: &str) -> String {
        format!(
            "{} {} {} {} {} {} {} {}",
            self.client_version,
            self.host,
            self.port,
            self.session_flag,
            username,
            password,
            self.client_type,
            self.realm_code
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Feed hosts commonly run self-signed certificates, so validation is off
    /// unless explicitly enabled.
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Polling budgets and delays. Every duration is configured in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timings {
    #[serde(rename = "reconcile_interval_ms", with = "millis")]
    pub reconcile_interval: Duration,
    #[serde(rename = "input_idle_timeout_ms", with = "millis")]
    pub input_idle_timeout: Duration,
    #[serde(rename = "window_poll_interval_ms", with = "millis")]
    pub window_poll_interval: Duration,
    pub window_poll_attempts: u32,
    #[serde(rename = "screen_poll_interval_ms", with = "millis")]
    pub screen_poll_interval: Duration,
    pub screen_poll_attempts: u32,
    pub focus_attempts: u32,
    #[serde(rename = "focus_settle_ms", with = "millis")]
    pub focus_settle: Duration,
    #[serde(rename = "liveness_interval_ms", with = "millis")]
    pub liveness_interval: Duration,
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,
    #[serde(rename = "assignment_poll_interval_ms", with = "millis")]
    pub assignment_poll_interval: Duration,
    #[serde(rename = "assignment_timeout_ms", with = "millis")]
    pub assignment_timeout: Duration,
    #[serde(rename = "stale_kill_grace_ms", with = "millis")]
    pub stale_kill_grace: Duration,
    #[serde(rename = "launch_grace_ms", with = "millis")]
    pub launch_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(15),
            input_idle_timeout: Duration::from_secs(5),
            window_poll_interval: Duration::from_millis(500),
            window_poll_attempts: 30,
            screen_poll_interval: Duration::from_millis(500),
            screen_poll_attempts: 20,
            focus_attempts: 3,
            focus_settle: Duration::from_millis(200),
            liveness_interval: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
            assignment_poll_interval: Duration::from_millis(500),
            assignment_timeout: Duration::from_secs(30),
            stale_kill_grace: Duration::from_secs(5),
            launch_grace: Duration::from_secs(90),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

fn default_accounts_file() -> PathBuf {
    PathBuf::from("accounts.txt")
}
fn default_session_flag() -> String {
    "0".to_string()
}
fn default_client_type() -> String {
    "1".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_accept_invalid_certs() -> bool {
    true
}
fn default_user_agent() -> String {
    format!("relog/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            accept_invalid_certs: default_accept_invalid_certs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_path: PathBuf::new(),
            accounts_file: default_accounts_file(),
            active_server: None,
            servers: Vec::new(),
            http: HttpConfig::default(),
            timings: Timings::default(),
        }
    }
}

/// `<config dir>/relog/config.toml`, falling back to the working directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("relog"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.toml")
}

impl AppConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file found, using defaults.");
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;

        if config.accounts_file.is_relative()
            && let Some(base) = path.parent()
        {
            config.accounts_file = base.join(&config.accounts_file);
        }

        info!(
            "Loaded config: servers={}, active={:?}, client={}",
            config.servers.len(),
            config.active_server,
            config.client_path.display()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (i, server) in self.servers.iter().enumerate() {
            if server.name.trim().is_empty() {
                bail!("servers[{}] has an empty name", i);
            }
            if self.servers[..i].iter().any(|s| s.name == server.name) {
                bail!("duplicate server name '{}'", server.name);
            }
            if server.feed_url.trim().is_empty() && server.feed_format != FeedFormat::Empty {
                warn!(server = %server.name, "Server has no feed URL; it will always read as offline");
            }
        }
        if let Some(active) = &self.active_server
            && !self.servers.iter().any(|s| &s.name == active)
        {
            bail!("active_server '{}' is not a configured server", active);
        }
        Ok(())
    }

    pub fn server(&self, name: &str) -> Option<&ServerTarget> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Server selected at startup.
    pub fn initial_server(&self) -> Option<&ServerTarget> {
        match &self.active_server {
            Some(name) => self.server(name),
            None => self.servers.first(),
        }
    }
}
