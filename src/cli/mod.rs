mod accounts;
mod check;
mod run;
mod servers;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::config::{AppConfig, default_config_path};
use crate::core::terminal::{self, GuideSection, print_error};
use crate::logging;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Monitoring")
        .command("run", "Watch accounts and reconnect them when they drop")
        .command("check", "Fetch and print the active server's presence feed")
        .print();

    GuideSection::new("Setup")
        .command("accounts list", "List monitored accounts")
        .command("accounts add CHAR USER PASS", "Add or replace an account")
        .command("accounts remove CHAR", "Remove an account")
        .command("servers", "List configured servers")
        .print();

    GuideSection::new("Options")
        .text("--config, -c <path>        Config file (default: platform config dir)")
        .text("--activate, -a <all|A,B>   run: accounts to activate on start")
        .text("--server, -s <name>        check: server to query")
        .text("--verbose, -v              Debug logging")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("relog").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommonFlags {
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

impl CommonFlags {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) enum Activation {
    #[default]
    None,
    All,
    Names(Vec<String>),
}

/// Flags that take a value; their value is never a positional argument.
const VALUE_FLAGS: &[&str] = &[
    "--config",
    "-c",
    "--activate",
    "-a",
    "--server",
    "-s",
];

fn flag_value(args: &[String], start: usize, names: &[&str]) -> Option<String> {
    let mut i = start;
    let mut found = None;
    while i < args.len() {
        if names.contains(&args[i].as_str()) {
            if i + 1 < args.len() {
                found = Some(args[i + 1].clone());
                i += 2;
            } else {
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    found
}

pub(crate) fn parse_common_flags(args: &[String], start: usize) -> CommonFlags {
    CommonFlags {
        config: flag_value(args, start, &["--config", "-c"]).map(PathBuf::from),
        verbose: args
            .iter()
            .skip(start)
            .any(|a| a == "--verbose" || a == "-v"),
    }
}

pub(crate) fn parse_activation(args: &[String], start: usize) -> Activation {
    match flag_value(args, start, &["--activate", "-a"]) {
        None => Activation::None,
        Some(v) if v.eq_ignore_ascii_case("all") => Activation::All,
        Some(v) => {
            let names: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
            if names.is_empty() {
                Activation::None
            } else {
                Activation::Names(names)
            }
        }
    }
}

pub(crate) fn parse_server_flag(args: &[String], start: usize) -> Option<String> {
    flag_value(args, start, &["--server", "-s"])
}

/// Arguments that are neither flags nor flag values.
pub(crate) fn positional(args: &[String], start: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = start;
    while i < args.len() {
        let arg = args[i].as_str();
        if VALUE_FLAGS.contains(&arg) {
            i += 2;
        } else {
            if !arg.starts_with('-') {
                out.push(args[i].clone());
            }
            i += 1;
        }
    }
    out
}

pub(crate) async fn load_config(flags: &CommonFlags) -> Result<AppConfig> {
    AppConfig::load(flags.config_path()).await
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");
    let common = parse_common_flags(&args, 2);

    match cmd {
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("relog {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "run" => {
            logging::init(common.verbose);
            run::run_orchestrator(&common, parse_activation(&args, 2)).await
        }
        "check" => {
            logging::init(common.verbose);
            check::run_check(&common, parse_server_flag(&args, 2)).await
        }
        "accounts" => {
            logging::init(common.verbose);
            accounts::run_accounts_command(&common, &positional(&args, 2)).await
        }
        "servers" => {
            logging::init(common.verbose);
            servers::list_servers(&common).await
        }
        other => {
            print_error(&format!("Unknown command '{}'", other));
            print_help();
            Ok(())
        }
    }
}
