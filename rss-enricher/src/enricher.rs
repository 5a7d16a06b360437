use crate::feed_store::FeedStore;
use crate::providers::DynProvider;
use crate::retry::RetryPolicy;
use crate::types::{EnrichConfig, EnrichOutcome, EnrichReport, EnrichmentStatus, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Works through pending enrichment requests with a bounded number of
/// provider calls in flight.
///
/// Each request is handled as an isolated unit: it reloads its own rows,
/// talks to the provider without holding a connection, and writes its
/// outcome in a transaction of its own. A unit that errors or panics ends
/// with its request marked failed and never affects its siblings.
#[derive(Clone)]
pub struct Enricher {
    store: FeedStore,
    provider: DynProvider,
    retry: RetryPolicy,
    config: EnrichConfig,
}

impl Enricher {
    pub fn new(
        store: FeedStore,
        provider: DynProvider,
        retry: RetryPolicy,
        config: EnrichConfig,
    ) -> Self {
        Self {
            store,
            provider,
            retry,
            config,
        }
    }

    /// Run one enrichment cycle over the oldest pending requests.
    pub async fn process_pending(&self) -> Result<EnrichReport> {
        let ids = self
            .store
            .pending_request_ids(self.config.batch_size)
            .await?;

        let mut report = EnrichReport {
            selected: ids.len(),
            ..Default::default()
        };
        if ids.is_empty() {
            debug!("No pending enrichment requests");
            return Ok(report);
        }

        info!(
            count = ids.len(),
            provider = self.provider.name(),
            "Processing pending enrichment requests"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut units = JoinSet::new();

        for request_id in ids {
            let enricher = self.clone();
            let semaphore = semaphore.clone();

            units.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return EnrichOutcome::Skipped,
                };
                enricher.run_isolated(request_id).await
            });
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(EnrichOutcome::Completed) => report.completed += 1,
                Ok(EnrichOutcome::Failed) => report.failed += 1,
                Ok(EnrichOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, "Enrichment task aborted");
                }
            }
        }

        info!(
            selected = report.selected,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            "Enrichment cycle finished"
        );
        Ok(report)
    }

    /// Enrich a single request and record its terminal state.
    pub async fn enrich_one(&self, request_id: Uuid) -> EnrichOutcome {
        match self.try_enrich(request_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%request_id, error = %e, "Enrichment failed");
                self.record_failure(request_id, &e.to_string()).await;
                EnrichOutcome::Failed
            }
        }
    }

    async fn run_isolated(&self, request_id: Uuid) -> EnrichOutcome {
        match AssertUnwindSafe(self.enrich_one(request_id))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(%request_id, panic = %message, "Enrichment unit panicked");
                self.record_failure(request_id, &format!("panicked: {}", message))
                    .await;
                EnrichOutcome::Failed
            }
        }
    }

    async fn try_enrich(&self, request_id: Uuid) -> Result<EnrichOutcome> {
        let Some(request) = self.store.get_request(request_id).await? else {
            debug!(%request_id, "Request vanished before processing");
            return Ok(EnrichOutcome::Skipped);
        };
        if request.status != EnrichmentStatus::Pending {
            debug!(%request_id, status = %request.status, "Request no longer pending");
            return Ok(EnrichOutcome::Skipped);
        }

        let Some(item) = self.store.get_item(request.item_id).await? else {
            warn!(%request_id, item_id = %request.item_id, "Item not found");
            self.record_failure(request_id, "item not found").await;
            return Ok(EnrichOutcome::Failed);
        };

        let provider = &self.provider;
        let title = item.title.as_str();
        let body = item.content.as_str();

        let payload = self
            .retry
            .run(move |attempt| {
                debug!(%request_id, attempt, provider = provider.name(), "Calling provider");
                provider.summarize(title, body)
            })
            .await?;

        if self
            .store
            .complete_request(request_id, &payload, self.provider.model())
            .await?
        {
            info!(%request_id, item_id = %item.id, model = self.provider.model(), "Enrichment completed");
            Ok(EnrichOutcome::Completed)
        } else {
            Ok(EnrichOutcome::Skipped)
        }
    }

    /// Mark the request failed in a fresh transaction. Errors here are logged
    /// and swallowed.
    async fn record_failure(&self, request_id: Uuid, message: &str) {
        if let Err(e) = self.store.fail_request(request_id, message).await {
            error!(%request_id, error = %e, "Could not record enrichment failure");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
