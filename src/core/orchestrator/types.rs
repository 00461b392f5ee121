use crate::core::account::MonitoredAccount;
use crate::core::reconciler::ServerStatus;

/// Every operator action the orchestrator accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorCommand {
    Activate(String),
    Deactivate(String),
    ActivateAll,
    DeactivateAll,
    /// Kill the account's client and stop monitoring it.
    Kill(String),
    SelectServer(String),
    /// Refresh one account, or run a full pass when `None`.
    Refresh(Option<String>),
    Pause,
    Resume,
    Status,
    Shutdown,
}

impl OrchestratorCommand {
    /// Parse one control line such as `activate Aria` or `refresh`.
    /// Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();
        let arg = if rest.is_empty() {
            None
        } else {
            Some(rest.join(" "))
        };
        let need = |what: &str| {
            arg.clone()
                .ok_or_else(|| format!("'{}' needs {}", verb, what))
        };

        let cmd = match verb.to_ascii_lowercase().as_str() {
            "activate" | "start" => match arg.as_deref() {
                Some("all") => OrchestratorCommand::ActivateAll,
                _ => OrchestratorCommand::Activate(need("a character name")?),
            },
            "deactivate" | "stop" => match arg.as_deref() {
                Some("all") => OrchestratorCommand::DeactivateAll,
                _ => OrchestratorCommand::Deactivate(need("a character name")?),
            },
            "kill" => OrchestratorCommand::Kill(need("a character name")?),
            "server" => OrchestratorCommand::SelectServer(need("a server name")?),
            "refresh" => OrchestratorCommand::Refresh(arg.clone()),
            "pause" => OrchestratorCommand::Pause,
            "resume" => OrchestratorCommand::Resume,
            "status" => OrchestratorCommand::Status,
            "quit" | "exit" | "shutdown" => OrchestratorCommand::Shutdown,
            other => return Err(format!("unknown command '{}'", other)),
        };
        Ok(Some(cmd))
    }
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub server: Option<ServerStatus>,
    pub paused: bool,
    /// A login sequence currently holds the launch gate.
    pub launch_in_progress: bool,
    pub accounts: Vec<MonitoredAccount>,
}

#[derive(Debug, Clone)]
pub enum CommandReply {
    Done(String),
    Status(StatusReport),
    Stopped,
}
