use anyhow::{Result, bail};
use console::style;

use super::{CommonFlags, load_config};
use crate::core::account::{AccountRecord, AccountStore, FileAccountStore};
use crate::core::terminal::{self, GuideSection};

pub async fn run_accounts_command(flags: &CommonFlags, args: &[String]) -> Result<()> {
    let config = load_config(flags).await?;
    let store = FileAccountStore::new(config.accounts_file.clone());
    let sub = args.first().map(String::as_str).unwrap_or("list");

    match sub {
        "list" | "ls" => {
            let records = store.load().await?;
            if records.is_empty() {
                terminal::print_info(&format!(
                    "No accounts in {}",
                    store.path().display()
                ));
                return Ok(());
            }
            println!();
            for (i, r) in records.iter().enumerate() {
                println!(
                    "  {:>2}. {:<16} {}",
                    i + 1,
                    style(&r.character).bold(),
                    style(&r.username).dim()
                );
            }
            println!();
        }
        "add" => {
            let [_, character, username, password] = args else {
                bail!("Usage: relog accounts add CHARACTER USERNAME PASSWORD");
            };
            if character.contains(',') || username.contains(',') {
                bail!("Character and username may not contain ','");
            }
            let mut records = store.load().await?;
            let replaced = upsert(
                &mut records,
                AccountRecord::new(character.as_str(), username.as_str(), password.as_str()),
            );
            store.save(&records).await?;
            terminal::print_success(&format!(
                "{} {}",
                if replaced { "Updated" } else { "Added" },
                character
            ));
        }
        "remove" | "rm" => {
            let [_, character] = args else {
                bail!("Usage: relog accounts remove CHARACTER");
            };
            let mut records = store.load().await?;
            if !remove(&mut records, character) {
                bail!("No account named '{}'", character);
            }
            store.save(&records).await?;
            terminal::print_success(&format!("Removed {}", character));
        }
        _ => {
            GuideSection::new("relog accounts")
                .command("list", "List monitored accounts")
                .command("add CHAR USER PASS", "Add or replace an account")
                .command("remove CHAR", "Remove an account")
                .print();
            println!();
        }
    }
    Ok(())
}

/// Replace the record with the same character name, or append. True when
/// an existing record was replaced.
pub(crate) fn upsert(records: &mut Vec<AccountRecord>, record: AccountRecord) -> bool {
    match records.iter_mut().find(|r| r.character == record.character) {
        Some(existing) => {
            *existing = record;
            true
        }
        None => {
            records.push(record);
            false
        }
    }
}

pub(crate) fn remove(records: &mut Vec<AccountRecord>, character: &str) -> bool {
    let before = records.len();
    records.retain(|r| r.character != character);
    records.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_keeps_order_and_replaces_in_place() {
        let mut records = vec![
            AccountRecord::new("Aria", "a", "1"),
            AccountRecord::new("Borin", "b", "2"),
        ];
        assert!(!upsert(&mut records, AccountRecord::new("Cael", "c", "3")));
        assert!(upsert(&mut records, AccountRecord::new("Aria", "a2", "9")));
        let names: Vec<_> = records.iter().map(|r| r.character.as_str()).collect();
        assert_eq!(names, vec!["Aria", "Borin", "Cael"]);
        assert_eq!(records[0].username, "a2");
    }

    #[test]
    fn remove_reports_missing() {
        let mut records = vec![AccountRecord::new("Aria", "a", "1")];
        assert!(!remove(&mut records, "Borin"));
        assert!(remove(&mut records, "Aria"));
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn edits_survive_a_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAccountStore::new(dir.path().join("accounts.txt"));
        let mut records = store.load().await.unwrap();
        upsert(&mut records, AccountRecord::new("Aria", "aria_login", "pw,with,commas"));
        store.save(&records).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].password, "pw,with,commas");
    }
}
