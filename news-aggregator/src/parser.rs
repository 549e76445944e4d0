use chrono::Utc;
use feed_rs::parser;
use tracing::debug;

use crate::types::{AggregatorError, ParsedFeed, RawEntry, Result};

/// Parse an RSS, Atom or JSON Feed document into raw entries.
pub fn parse_feed(content: &str) -> Result<ParsedFeed> {
    debug!("Parsing feed content ({} bytes)", content.len());

    let feed = parser::parse(content.as_bytes())
        .map_err(|e| AggregatorError::Parse(format!("Failed to parse feed: {}", e)))?;

    let title = feed.title.map(|t| t.content);
    let entries: Vec<RawEntry> = feed.entries.into_iter().map(parse_entry).collect();

    debug!("Parsed feed with {} entries", entries.len());
    Ok(ParsedFeed { title, entries })
}

fn parse_entry(entry: feed_rs::model::Entry) -> RawEntry {
    // Prefer an alternate link; fall back to the first one, then a URL-shaped id.
    let url = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone())
        .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))
        .unwrap_or_default();

    let title = entry.title.map(|t| t.content).unwrap_or_default();

    let description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .unwrap_or_default();

    let author = entry
        .authors
        .first()
        .map(|a| a.name.clone())
        .filter(|name| !name.trim().is_empty());

    let published_at = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.with_timezone(&Utc));

    RawEntry {
        url,
        title,
        description,
        author,
        published_at,
        score: None,
    }
}
