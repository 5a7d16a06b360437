#![allow(dead_code)]

use async_trait::async_trait;
use rss_enricher::providers::{PromptStrategy, SummaryProvider};
use rss_enricher::{FeedStore, ProviderError, RawEntry, RetryPolicy, Source, SummaryPayload};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub async fn store_with_source(url: &str) -> (FeedStore, Source) {
    let store = FeedStore::in_memory().await.unwrap();
    let source = store.add_source(url, "Test source", 30, true).await.unwrap();
    (store, source)
}

/// A migrated store in a fresh temp directory with a multi-connection pool,
/// so concurrent writers really contend for the SQLite lock.
pub struct FileStore {
    pub store: FeedStore,
    dir: PathBuf,
}

impl FileStore {
    pub async fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("rss-enricher-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let url = format!("sqlite://{}", dir.join("test.db").display());

        let store = FeedStore::connect(&url, 5).await.unwrap();
        store.migrate().await.unwrap();
        Self { store, dir }
    }

    pub async fn close(self) {
        self.store.pool().close().await;
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

pub fn entry(link: &str, title: &str) -> RawEntry {
    RawEntry {
        link: Some(link.to_string()),
        title: Some(title.to_string()),
        body: Some(format!("<p>Body of <b>{}</b></p>", title)),
        ..Default::default()
    }
}

/// RSS 2.0 document with one `<item>` per (link, title) pair.
pub fn rss_feed(items: &[(String, String)]) -> String {
    let items: String = items
        .iter()
        .map(|(link, title)| {
            format!(
                "<item><title>{}</title><link>{}</link><description>About {}</description></item>",
                title, link, title
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test</title><link>https://example.com</link><description>d</description>{}</channel></rss>"#,
        items
    )
}

pub fn numbered_items(prefix: &str, count: usize) -> Vec<(String, String)> {
    (0..count)
        .map(|i| {
            (
                format!("https://example.com/{}/{}", prefix, i),
                format!("{} post {}", prefix, i),
            )
        })
        .collect()
}

/// Millisecond-scale retries so tests exercise the retry path quickly.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(10),
    }
}

pub fn payload(summary: &str) -> SummaryPayload {
    SummaryPayload {
        summary: summary.to_string(),
        highlight: "Worth a read".to_string(),
        keywords: vec!["rust".into(), "feeds".into(), "ai".into()],
    }
}

type Script = Box<dyn Fn(usize, &str) -> Result<String, ProviderError> + Send + Sync>;

/// Provider whose raw replies are produced by a closure and then decoded with
/// the shared prompt strategy, exactly like the real providers.
pub struct ScriptedProvider {
    script: Script,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    titles: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(usize, &str) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
            titles: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with a valid payload.
    pub fn ok() -> Self {
        Self::new(|_, title| {
            Ok(format!(
                r#"{{"summary":"Summary of {}","highlight":"Good","keywords":["a","b","c"]}}"#,
                title
            ))
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }
}

#[async_trait]
impl SummaryProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn summarize(&self, title: &str, _body: &str) -> Result<SummaryPayload, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.titles.lock().unwrap().push(title.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let raw = (self.script)(call, title)?;
        PromptStrategy::default().parse_response(&raw)
    }
}
