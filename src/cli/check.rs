use anyhow::{Result, anyhow};

use super::{CommonFlags, load_config};
use crate::core::presence::{HttpPresenceFeed, PresenceFeed, PresenceSnapshot};
use crate::core::terminal::{self, GuideSection};

pub async fn run_check(flags: &CommonFlags, server: Option<String>) -> Result<()> {
    let config = load_config(flags).await?;
    let target = match &server {
        Some(name) => config
            .server(name)
            .ok_or_else(|| anyhow!("Unknown server '{}'", name))?,
        None => config
            .initial_server()
            .ok_or_else(|| anyhow!("No servers configured"))?,
    };

    let feed = HttpPresenceFeed::new(&config.http)?;
    terminal::print_info(&format!(
        "Fetching {} feed for {}...",
        target.feed_format.as_str(),
        target.name
    ));
    let snapshot = feed
        .fetch(&target.feed_url, target.feed_format)
        .await
        .ok_or_else(|| anyhow!("Presence feed for '{}' is unavailable", target.name))?;

    print_snapshot(&target.name, &snapshot);
    Ok(())
}

pub(crate) fn snapshot_lines(snapshot: &PresenceSnapshot) -> Vec<String> {
    let mut names: Vec<&String> = snapshot.character_online.keys().collect();
    names.sort_by_key(|n| n.to_lowercase());
    names
        .into_iter()
        .map(|name| {
            let online = snapshot.character_online[name];
            let level = snapshot
                .character_level
                .get(name)
                .map(|l| format!("Lv {}", l))
                .unwrap_or_default();
            let exp = snapshot
                .character_experience
                .get(name)
                .map(|e| format!("{:.2}%", e))
                .unwrap_or_default();
            format!(
                "{:<16} {:<8} {:<7} {}",
                name,
                if online { "online" } else { "offline" },
                level,
                exp
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

fn print_snapshot(server: &str, snapshot: &PresenceSnapshot) {
    let mut section = GuideSection::new(server)
        .status("Online", &snapshot.online_count.to_string())
        .status(
            "Captured",
            &snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
        .blank();
    let lines = snapshot_lines(snapshot);
    if lines.is_empty() {
        section = section.text("No characters listed.");
    }
    for line in &lines {
        section = section.text(line);
    }
    section.print();
    println!();
}
