use crate::aggregator::FeedAggregator;
use crate::enricher::Enricher;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub fetch_interval: Duration,
    pub enrich_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_secs(30 * 60),
            enrich_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Drives the fetch and enrichment cycles on fixed intervals until cancelled.
pub struct Scheduler {
    aggregator: FeedAggregator,
    enricher: Enricher,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(aggregator: FeedAggregator, enricher: Enricher, config: SchedulerConfig) -> Self {
        Self {
            aggregator,
            enricher,
            config,
        }
    }

    /// Run both loops until `shutdown` fires. A cycle already running when
    /// the token is cancelled is allowed to finish before this returns.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            fetch_interval = ?self.config.fetch_interval,
            enrich_interval = ?self.config.enrich_interval,
            "Scheduler starting"
        );

        let aggregator = self.aggregator;
        let enricher = self.enricher;

        let fetch_loop = run_every(
            "fetch",
            self.config.fetch_interval,
            shutdown.clone(),
            move || {
                let aggregator = aggregator.clone();
                async move {
                    if let Err(e) = aggregator.fetch_all().await {
                        error!(error = %e, "Fetch cycle failed");
                    }
                }
            },
        );

        let enrich_loop = run_every(
            "enrich",
            self.config.enrich_interval,
            shutdown.clone(),
            move || {
                let enricher = enricher.clone();
                async move {
                    if let Err(e) = enricher.process_pending().await {
                        error!(error = %e, "Enrichment cycle failed");
                    }
                }
            },
        );

        let fetch = tokio::spawn(fetch_loop);
        let enrich = tokio::spawn(enrich_loop);

        for (name, handle) in [("fetch", fetch), ("enrich", enrich)] {
            if let Err(e) = handle.await {
                error!(job = name, error = %e, "Scheduler loop terminated abnormally");
            }
        }

        info!("Scheduler stopped");
    }
}

/// Call `job` every `period`, starting one period from now. Late ticks are
/// delayed rather than fired in a burst.
pub async fn run_every<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        info!(job = name, "Starting scheduled cycle");
        // Not raced against the token: an in-flight cycle always completes.
        job().await;
    }

    info!(job = name, "Scheduled job stopped");
}
