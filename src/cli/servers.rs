use anyhow::Result;
use console::style;

use super::{CommonFlags, load_config};
use crate::core::terminal::{self, GLOBE};

pub async fn list_servers(flags: &CommonFlags) -> Result<()> {
    let config = load_config(flags).await?;
    if config.servers.is_empty() {
        terminal::print_warn(&format!(
            "No servers configured in {}",
            flags.config_path().display()
        ));
        return Ok(());
    }

    let active = config.initial_server().map(|s| s.name.clone());
    println!();
    for server in &config.servers {
        let marker = if active.as_deref() == Some(server.name.as_str()) {
            style("*").green().bold().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{} {}{} {}:{} (client {})",
            marker,
            GLOBE,
            style(&server.name).bold(),
            server.launch.host,
            server.launch.port,
            server.launch.client_version
        );
        println!(
            "     feed: {} [{}]",
            if server.feed_url.is_empty() {
                "-"
            } else {
                server.feed_url.as_str()
            },
            server.feed_format.as_str()
        );
    }
    println!();
    Ok(())
}
