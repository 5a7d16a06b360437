use crate::types::{EnricherError, RawEntry, Result, MAX_ENTRIES_PER_FETCH};
use feed_rs::parser;
use tracing::debug;

pub struct FeedParser;

impl FeedParser {
    /// Decode an RSS or Atom document into at most [`MAX_ENTRIES_PER_FETCH`]
    /// raw entries, in document order.
    ///
    /// Parsing is all or nothing. A document feed-rs rejects, for example one
    /// with a single malformed entry, yields [`EnricherError::Parse`] and the
    /// whole source counts as failed for that cycle; no entries are salvaged.
    pub fn parse(content: &[u8]) -> Result<Vec<RawEntry>> {
        let feed = parser::parse(content)
            .map_err(|e| EnricherError::Parse(format!("Failed to parse feed: {}", e)))?;

        let total = feed.entries.len();
        let entries: Vec<RawEntry> = feed
            .entries
            .into_iter()
            .take(MAX_ENTRIES_PER_FETCH)
            .map(Self::convert_entry)
            .collect();

        debug!(total, kept = entries.len(), "Parsed feed");
        Ok(entries)
    }

    fn convert_entry(entry: feed_rs::model::Entry) -> RawEntry {
        let summary = entry.summary.map(|s| s.content);

        // Full content wins over the description when the feed carries both.
        let body = entry
            .content
            .and_then(|c| c.body)
            .filter(|b| !b.trim().is_empty())
            .or(summary);

        RawEntry {
            link: entry_link(&entry.links),
            title: entry.title.map(|t| t.content),
            body,
            author: entry.authors.first().map(|a| a.name.clone()),
            published_at: entry.published,
        }
    }
}

/// The entry's page: an `alternate` link, or one without a `rel`, before
/// anything else. Atom entries often list `self` or `edit` links first.
fn entry_link(links: &[feed_rs::model::Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}
