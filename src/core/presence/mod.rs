//! Presence feed parsing and the per-server snapshot cache.

mod cache;
mod feed;
mod parse;

use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub use cache::PresenceCache;
pub use feed::{HttpPresenceFeed, PresenceFeed};

/// Markup layout of a server's presence feed. Chosen by configuration,
/// never sniffed from the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    #[default]
    HtmlTable,
    HtmlAnchor,
    Xml,
    /// Server variant that publishes nothing; every fetch reads empty.
    Empty,
}

impl FeedFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedFormat::HtmlTable => "html_table",
            FeedFormat::HtmlAnchor => "html_anchor",
            FeedFormat::Xml => "xml",
            FeedFormat::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceSnapshot {
    pub character_online: HashMap<String, bool>,
    pub character_level: HashMap<String, u32>,
    pub character_experience: HashMap<String, f64>,
    pub online_count: usize,
    pub captured_at: DateTime<Utc>,
}

/// Per-character view extracted from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacterPresence {
    pub online: bool,
    pub level: Option<u32>,
    pub experience: Option<f64>,
}

impl PresenceSnapshot {
    pub fn empty() -> Self {
        Self::empty_at(Utc::now())
    }

    pub fn empty_at(captured_at: DateTime<Utc>) -> Self {
        Self {
            character_online: HashMap::new(),
            character_level: HashMap::new(),
            character_experience: HashMap::new(),
            online_count: 0,
            captured_at,
        }
    }

    /// Character names in feeds do not keep a stable case, so an exact match
    /// is preferred and a case-insensitive one accepted.
    pub fn lookup(&self, character: &str) -> Option<CharacterPresence> {
        let key = if self.character_online.contains_key(character) {
            character.to_string()
        } else {
            self.character_online
                .keys()
                .find(|k| k.eq_ignore_ascii_case(character))?
                .clone()
        };
        Some(CharacterPresence {
            online: self.character_online[&key],
            level: self.character_level.get(&key).copied(),
            experience: self.character_experience.get(&key).copied(),
        })
    }
}
