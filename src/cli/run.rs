use anyhow::{Result, bail};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use super::{Activation, CommonFlags, load_config};
use crate::core::account::{AccountBook, FileAccountStore};
use crate::core::context::Context;
use crate::core::lifecycle::LifecycleManager;
use crate::core::orchestrator::{CommandReply, Orchestrator, OrchestratorCommand, StatusReport};
use crate::core::presence::HttpPresenceFeed;
use crate::core::terminal::{self, GuideSection};
use crate::platform::{Automation, NativeAutomation};

pub async fn run_orchestrator(flags: &CommonFlags, activation: Activation) -> Result<()> {
    let config = load_config(flags).await?;
    if config.servers.is_empty() {
        bail!(
            "No servers configured. Add a [[servers]] entry to {}",
            flags.config_path().display()
        );
    }

    let feed = Arc::new(HttpPresenceFeed::new(&config.http)?);
    let automation: Arc<dyn Automation> = Arc::new(NativeAutomation);
    let store = Arc::new(FileAccountStore::new(config.accounts_file.clone()));
    let ctx = Context::new(config, AccountBook::default(), feed, automation);
    let orchestrator = Arc::new(Orchestrator::new(ctx.clone(), store));

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(orchestrator.clone());
    lifecycle.start().await?;

    let initial = match activation {
        Activation::None => Vec::new(),
        Activation::All => vec![OrchestratorCommand::ActivateAll],
        Activation::Names(names) => names
            .into_iter()
            .map(OrchestratorCommand::Activate)
            .collect(),
    };
    for cmd in initial {
        match orchestrator.dispatch(cmd).await {
            Ok(reply) => print_reply(&reply),
            Err(e) => terminal::print_warn(&format!("{:#}", e)),
        }
    }

    spawn_event_printer(&ctx);

    GuideSection::new("Monitoring")
        .status(
            "Server",
            &ctx.active_server()
                .await
                .map(|s| s.name)
                .unwrap_or_else(|| "-".to_string()),
        )
        .status("Accounts", &ctx.book.snapshot().await.len().to_string())
        .blank()
        .text("Commands: activate NAME|all, deactivate NAME|all, kill NAME, server NAME,")
        .text("          refresh [NAME], pause, resume, status, quit")
        .print();
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                let cmd = match OrchestratorCommand::parse(&line) {
                    Ok(Some(cmd)) => cmd,
                    Ok(None) => continue,
                    Err(e) => {
                        terminal::print_warn(&e);
                        continue;
                    }
                };
                match orchestrator.dispatch(cmd).await {
                    Ok(CommandReply::Stopped) => break,
                    Ok(reply) => print_reply(&reply),
                    Err(e) => terminal::print_error(&format!("{:#}", e)),
                }
            }
        }
    }

    lifecycle.shutdown().await?;
    terminal::print_info("Stopped. Game clients were left running.");
    Ok(())
}

fn spawn_event_printer(ctx: &Arc<Context>) {
    let mut events = ctx.events.subscribe();
    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => terminal::print_event(&event.account, event.state.as_str(), event.pid),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            }
        }
    });
}

fn print_reply(reply: &CommandReply) {
    match reply {
        CommandReply::Done(msg) => terminal::print_success(msg),
        CommandReply::Status(report) => print_report(report),
        CommandReply::Stopped => {}
    }
}

fn print_report(report: &StatusReport) {
    let server = match &report.server {
        Some(s) => format!("{} ({}, {} online)", s.name, s.state.as_str(), s.online_count),
        None => "not checked yet".to_string(),
    };
    let mut section = GuideSection::new("Status")
        .status("Server", &server)
        .status("Session", if report.paused { "paused" } else { "running" })
        .status(
            "Launch gate",
            if report.launch_in_progress { "busy" } else { "free" },
        )
        .blank();
    for a in &report.accounts {
        let level = a.level.map(|l| format!("Lv {}", l)).unwrap_or_default();
        let exp = a
            .experience
            .map(|e| format!("{:.2}%", e))
            .unwrap_or_default();
        let pid = if a.external_process_id != 0 {
            format!("pid {}", a.external_process_id)
        } else {
            String::new()
        };
        section = section.text(&format!(
            "{:<16} {:<9} {:<7} {:<8} {:<10} {}{}",
            a.character(),
            a.status.as_str(),
            if a.is_bot_active { "active" } else { "-" },
            level,
            exp,
            pid,
            if a.is_reconnecting { " (reconnecting)" } else { "" }
        ));
    }
    section.print();
}
