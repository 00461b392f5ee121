use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use std::sync::LazyLock;

use super::feed::FeedError;
use super::{FeedFormat, PresenceSnapshot};

static ONLINE_ICON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bonline\.(?:gif|png)\b").expect("valid regex"));
static OFFLINE_ICON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\boffline\.(?:gif|png)\b").expect("valid regex"));
static TABLE_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("valid regex"));
static TABLE_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>").expect("valid regex"));
static ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
static LEVEL_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:lv|lvl|level)\.?\s*:?\s*(\d+)").expect("valid regex")
});
static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)\s*%").expect("valid regex"));

/// Parse a feed body in the given layout, stamped with `captured_at`.
pub fn parse_feed(
    body: &str,
    format: FeedFormat,
    captured_at: DateTime<Utc>,
) -> Result<PresenceSnapshot, FeedError> {
    match format {
        FeedFormat::HtmlTable => parse_html_table(body, captured_at),
        FeedFormat::HtmlAnchor => parse_html_anchor(body, captured_at),
        FeedFormat::Xml => parse_xml(body, captured_at),
        FeedFormat::Empty => Ok(PresenceSnapshot::empty_at(captured_at)),
    }
}

fn strip_tags(fragment: &str) -> String {
    let text = TAG.replace_all(fragment, " ");
    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn icon_status(fragment: &str) -> Option<bool> {
    if ONLINE_ICON.is_match(fragment) {
        Some(true)
    } else if OFFLINE_ICON.is_match(fragment) {
        Some(false)
    } else {
        None
    }
}

fn percent(text: &str) -> Option<f64> {
    PERCENT
        .captures(text)
        .and_then(|c| c[1].replace(',', ".").parse().ok())
}

fn ensure_markup(body: &str) -> Result<(), FeedError> {
    if body.contains('<') {
        Ok(())
    } else {
        Err(FeedError::Parse("body contains no markup".to_string()))
    }
}

fn insert(
    snap: &mut PresenceSnapshot,
    name: String,
    online: bool,
    level: Option<u32>,
    experience: Option<f64>,
) {
    if let Some(level) = level {
        snap.character_level.insert(name.clone(), level);
    }
    if let Some(exp) = experience {
        snap.character_experience.insert(name.clone(), exp);
    }
    snap.character_online.insert(name, online);
}

/// One character per `<tr>`: name cell first, then level digits, an
/// experience percentage and the status icon somewhere in the row.
fn parse_html_table(body: &str, captured_at: DateTime<Utc>) -> Result<PresenceSnapshot, FeedError> {
    ensure_markup(body)?;
    let mut snap = PresenceSnapshot::empty_at(captured_at);
    snap.online_count = ONLINE_ICON.find_iter(body).count();

    for row in TABLE_ROW.captures_iter(body) {
        let row = &row[1];
        let Some(online) = icon_status(row) else {
            continue;
        };
        let cells: Vec<String> = TABLE_CELL
            .captures_iter(row)
            .map(|c| strip_tags(&c[1]))
            .collect();
        let Some(name) = cells.first().filter(|n| !n.is_empty()).cloned() else {
            continue;
        };
        let level = cells
            .iter()
            .skip(1)
            .filter(|c| !c.contains('%'))
            .find_map(|c| DIGITS.find(c).and_then(|m| m.as_str().parse().ok()));
        let experience = cells.iter().skip(1).find_map(|c| percent(c));
        insert(&mut snap, name, online, level, experience);
    }
    Ok(snap)
}

/// One anchor per character; the markup up to the next anchor carries that
/// character's icon, level label and percentage.
fn parse_html_anchor(body: &str, captured_at: DateTime<Utc>) -> Result<PresenceSnapshot, FeedError> {
    ensure_markup(body)?;
    let mut snap = PresenceSnapshot::empty_at(captured_at);
    snap.online_count = ONLINE_ICON.find_iter(body).count();

    let anchors: Vec<_> = ANCHOR.captures_iter(body).collect();
    for (i, anchor) in anchors.iter().enumerate() {
        let (Some(whole), Some(inner)) = (anchor.get(0), anchor.get(1)) else {
            continue;
        };
        let segment_end = anchors
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(body.len());
        let segment = &body[whole.end()..segment_end];
        // Icons sometimes sit inside the anchor itself.
        let Some(online) = icon_status(segment).or_else(|| icon_status(inner.as_str())) else {
            continue;
        };
        let name = strip_tags(inner.as_str());
        if name.is_empty() {
            continue;
        }
        let text = strip_tags(segment);
        let level = LEVEL_LABEL
            .captures(&text)
            .and_then(|c| c[1].parse().ok());
        let experience = percent(&text);
        insert(&mut snap, name, online, level, experience);
    }
    Ok(snap)
}

#[derive(Default)]
struct XmlItem {
    name: Option<String>,
    status: Option<String>,
    level: Option<String>,
    exp: Option<String>,
}

fn parse_xml(body: &str, captured_at: DateTime<Utc>) -> Result<PresenceSnapshot, FeedError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut snap = PresenceSnapshot::empty_at(captured_at);
    let mut item: Option<XmlItem> = None;
    let mut field: Option<String> = None;
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                if name == "item" {
                    item = Some(XmlItem::default());
                } else if item.is_some() {
                    field = Some(name);
                }
            }
            Ok(Event::End(e)) => {
                depth = depth.saturating_sub(1);
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                if name == "item" {
                    if let Some(done) = item.take() {
                        push_xml_item(&mut snap, done);
                    }
                } else {
                    field = None;
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| FeedError::Parse(e.to_string()))?
                    .trim()
                    .to_string();
                set_xml_field(item.as_mut(), field.as_deref(), text);
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(&t.into_inner()).trim().to_string();
                set_xml_field(item.as_mut(), field.as_deref(), text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(FeedError::Parse(format!(
                    "at byte {}: {}",
                    reader.error_position(),
                    e
                )));
            }
        }
    }

    if depth != 0 {
        return Err(FeedError::Parse("unexpected end of document".to_string()));
    }
    Ok(snap)
}

fn set_xml_field(item: Option<&mut XmlItem>, field: Option<&str>, text: String) {
    let (Some(item), Some(field)) = (item, field) else {
        return;
    };
    match field {
        "character_name" => item.name = Some(text),
        "status" => item.status = Some(text),
        "level" => item.level = Some(text),
        "exp" => item.exp = Some(text),
        _ => {}
    }
}

fn push_xml_item(snap: &mut PresenceSnapshot, item: XmlItem) {
    let Some(name) = item.name.filter(|n| !n.is_empty()) else {
        return;
    };
    let online = item
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("online"));
    if online {
        snap.online_count += 1;
    }
    let level = item
        .level
        .as_deref()
        .and_then(|l| DIGITS.find(l))
        .and_then(|m| m.as_str().parse().ok());
    let experience = item.exp.as_deref().and_then(|e| {
        percent(e).or_else(|| e.trim().replace(',', ".").parse().ok())
    });
    insert(snap, name, online, level, experience);
}
