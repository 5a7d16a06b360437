use crate::feed_store::FeedStore;
use crate::types::{Item, RawEntry, Result, MAX_ITEM_CONTENT_CHARS};
use crate::utils::{html::clean_html, text::truncate_chars, url::content_hash};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

/// Turns raw feed entries into stored items, at most once per dedup key.
#[derive(Clone)]
pub struct IngestionGate {
    store: FeedStore,
}

impl IngestionGate {
    pub fn new(store: FeedStore) -> Self {
        Self { store }
    }

    /// Store `entry` as a new item with a pending enrichment request.
    ///
    /// Returns `Ok(true)` only when this call created the item. Entries without
    /// a link or title, and entries whose dedup key is already known, yield
    /// `Ok(false)` and leave storage untouched.
    pub async fn ingest(&self, entry: &RawEntry, source_id: Uuid) -> Result<bool> {
        let (Some(url), Some(title)) = (non_blank(&entry.link), non_blank(&entry.title)) else {
            debug!(%source_id, "Skipping entry without link or title");
            return Ok(false);
        };

        let dedup_key = content_hash(url, title);

        let mut tx = self.store.begin_write().await?;

        if FeedStore::item_exists(tx.conn(), &dedup_key).await? {
            return Ok(false);
        }

        let content = entry
            .body
            .as_deref()
            .map(clean_html)
            .unwrap_or_default();

        let item = Item {
            id: Uuid::new_v4(),
            dedup_key,
            url: url.to_string(),
            title: title.to_string(),
            content: truncate_chars(&content, MAX_ITEM_CONTENT_CHARS).to_string(),
            author: entry.author.clone(),
            published_at: entry.published_at,
            source_id,
            created_at: Utc::now(),
        };

        // A concurrent writer may have committed the same key since the check.
        if !FeedStore::insert_item(tx.conn(), &item).await? {
            return Ok(false);
        }

        if !FeedStore::request_exists_for_item(tx.conn(), item.id).await? {
            FeedStore::insert_pending_request(tx.conn(), item.id).await?;
        }

        tx.commit().await?;

        debug!(%source_id, item_id = %item.id, url = %item.url, "Ingested new item");
        Ok(true)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
