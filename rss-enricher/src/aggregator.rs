use crate::feed_store::FeedStore;
use crate::fetcher::Fetcher;
use crate::ingest::IngestionGate;
use crate::parser::FeedParser;
use crate::types::{FetchConfig, FetchReport, Result, Source};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Fetches every active source concurrently and feeds new entries through the
/// ingestion gate.
#[derive(Clone)]
pub struct FeedAggregator {
    store: FeedStore,
    fetcher: Arc<Fetcher>,
    gate: IngestionGate,
    max_concurrent: usize,
}

impl FeedAggregator {
    pub fn new(store: FeedStore, fetch_config: FetchConfig) -> Result<Self> {
        let max_concurrent = fetch_config.max_concurrent_fetches.max(1);
        let fetcher = Arc::new(Fetcher::new(fetch_config)?);
        let gate = IngestionGate::new(store.clone());

        Ok(Self {
            store,
            fetcher,
            gate,
            max_concurrent,
        })
    }

    /// Run one fetch cycle over all active sources.
    ///
    /// A failing source is logged and counted; it never aborts the cycle.
    pub async fn fetch_all(&self) -> Result<FetchReport> {
        let sources = self.store.list_active_sources().await?;
        let mut report = FetchReport {
            sources: sources.len(),
            ..Default::default()
        };

        info!("Fetching {} sources", sources.len());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for source in sources {
            let aggregator = self.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                // Acquire only fails on a closed semaphore.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (source, None),
                };
                let result = aggregator.fetch_source(&source).await;
                (source, Some(result))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source, Some(Ok(new_items)))) => {
                    report.succeeded += 1;
                    report.new_items += new_items;
                    info!(source_id = %source.id, url = %source.url, new_items, "Fetched source");
                }
                Ok((source, Some(Err(e)))) => {
                    report.failed += 1;
                    warn!(source_id = %source.id, url = %source.url, error = %e, "Failed to fetch source");
                }
                Ok((source, None)) => {
                    report.failed += 1;
                    warn!(source_id = %source.id, "Fetch slot unavailable");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, "Fetch task aborted");
                }
            }
        }

        info!(
            sources = report.sources,
            succeeded = report.succeeded,
            failed = report.failed,
            new_items = report.new_items,
            "Fetch cycle finished"
        );
        Ok(report)
    }

    /// Fetch, parse and ingest a single source. Returns the number of new items.
    ///
    /// A single entry that fails to store is logged and skipped. When every
    /// entry fails, the last store error is returned instead.
    pub async fn fetch_source(&self, source: &Source) -> Result<usize> {
        let body = self.fetcher.fetch(&source.url, source.verify_tls).await?;
        let entries = FeedParser::parse(&body)?;

        let mut new_items = 0;
        let mut store_errors = 0;
        let mut last_error = None;
        for entry in &entries {
            match self.gate.ingest(entry, source.id).await {
                Ok(true) => new_items += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(source_id = %source.id, link = ?entry.link, error = %e, "Failed to store entry");
                    store_errors += 1;
                    last_error = Some(e);
                }
            }
        }

        // Nothing from this document reached storage; leave last_fetched_at
        // alone so the source shows up as failed.
        if store_errors == entries.len() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        self.store.mark_source_fetched(source.id, Utc::now()).await?;
        Ok(new_items)
    }
}
