use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rss_enricher::providers::{build_provider, ProviderKind, ProviderSettings};
use rss_enricher::utils::url::is_valid_feed_url;
use rss_enricher::{
    EnrichConfig, Enricher, FeedAggregator, FeedStore, FetchConfig, RetryPolicy, Scheduler,
    SchedulerConfig,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "rss-enricher",
    version,
    about = "Fetch syndication feeds, deduplicate entries and enrich them with AI summaries."
)]
struct Cli {
    /// SQLite database location.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://rss.db", global = true)]
    database_url: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(clap::Args)]
struct PipelineArgs {
    #[arg(long, env = "FETCH_INTERVAL_MINUTES", default_value_t = 30, global = true)]
    fetch_interval_minutes: u64,

    #[arg(long, env = "ENRICH_INTERVAL_MINUTES", default_value_t = 5, global = true)]
    enrich_interval_minutes: u64,

    #[arg(long, env = "FETCH_MAX_CONCURRENCY", default_value_t = 10, global = true)]
    fetch_max_concurrency: usize,

    #[arg(long, env = "ENRICH_MAX_CONCURRENCY", default_value_t = 3, global = true)]
    enrich_max_concurrency: usize,

    #[arg(long, env = "ENRICH_BATCH_SIZE", default_value_t = 50, global = true)]
    enrich_batch_size: usize,

    /// Characters of item content sent to the provider.
    #[arg(long, env = "MAX_CONTENT_LENGTH", default_value_t = 3000, global = true)]
    max_content_length: usize,

    /// anthropic, openai or zhipu.
    #[arg(long, env = "PROVIDER", default_value = "anthropic", global = true)]
    provider: String,

    #[arg(long, env = "PROVIDER_API_KEY", hide_env_values = true, global = true)]
    provider_api_key: Option<String>,

    #[arg(long, env = "PROVIDER_MODEL", global = true)]
    provider_model: Option<String>,

    #[arg(long, env = "PROVIDER_BASE_URL", global = true)]
    provider_base_url: Option<String>,

    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value_t = 5, global = true)]
    retry_max_attempts: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_SECS", default_value_t = 1, global = true)]
    retry_base_delay_secs: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_SECS", default_value_t = 60, global = true)]
    retry_max_delay_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Run the fetch and enrichment loops until interrupted.
    Serve,
    /// Fetch every active source once.
    Fetch,
    /// Run one enrichment cycle.
    Process,
    /// Keep running enrichment cycles until nothing is pending.
    Drain {
        /// Stop after this many requests have been handled.
        #[arg(long)]
        max: Option<usize>,
    },
    /// Register a feed.
    AddSource {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value_t = 30)]
        interval_minutes: u32,
        /// Skip TLS certificate verification for this feed.
        #[arg(long)]
        insecure: bool,
    },
    /// Print pipeline statistics.
    Stats,
    /// Put failed enrichment requests back in the queue.
    RetryFailed {
        #[arg(long)]
        limit: Option<usize>,
    },
}

impl PipelineArgs {
    fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            max_concurrent_fetches: self.fetch_max_concurrency,
            ..Default::default()
        }
    }

    fn enrich_config(&self) -> EnrichConfig {
        EnrichConfig {
            batch_size: self.enrich_batch_size,
            max_concurrency: self.enrich_max_concurrency,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
            ..Default::default()
        }
    }

    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            fetch_interval: Duration::from_secs(self.fetch_interval_minutes.max(1) * 60),
            enrich_interval: Duration::from_secs(self.enrich_interval_minutes.max(1) * 60),
        }
    }

    fn provider_settings(&self) -> Result<ProviderSettings> {
        let kind: ProviderKind = self.provider.parse()?;
        Ok(ProviderSettings {
            kind,
            api_key: self.provider_api_key.clone(),
            model: self.provider_model.clone(),
            base_url: self.provider_base_url.clone(),
            max_content_chars: self.max_content_length,
            ..Default::default()
        })
    }

    fn enricher(&self, store: &FeedStore) -> Result<Enricher> {
        let provider = build_provider(&self.provider_settings()?)
            .context("Failed to configure summary provider")?;
        info!(provider = provider.name(), model = provider.model(), "Provider ready");

        Ok(Enricher::new(
            store.clone(),
            provider,
            self.retry_policy(),
            self.enrich_config(),
        ))
    }
}

fn init_tracing(format: &LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rss_enricher=info,info"));

    match format {
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
        LogFormat::Json => fmt().json().with_env_filter(env_filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_format);

    let store = FeedStore::connect(&cli.database_url, 5)
        .await
        .with_context(|| format!("Failed to open database {}", cli.database_url))?;
    store.migrate().await.context("Failed to apply migrations")?;

    let args = &cli.pipeline;

    match cli.command {
        Command::Serve => {
            let aggregator = FeedAggregator::new(store.clone(), args.fetch_config())?;
            let enricher = args.enricher(&store)?;
            let scheduler = Scheduler::new(aggregator, enricher, args.scheduler_config());

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Shutdown requested, waiting for running cycles"),
                    Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
                }
                signal.cancel();
            });

            scheduler.run(shutdown).await;
        }
        Command::Fetch => {
            let aggregator = FeedAggregator::new(store.clone(), args.fetch_config())?;
            let report = aggregator.fetch_all().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Process => {
            let report = args.enricher(&store)?.process_pending().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Drain { max } => {
            let enricher = args.enricher(&store)?;
            let mut handled = 0usize;

            loop {
                let report = enricher.process_pending().await?;
                handled += report.completed + report.failed;
                info!(
                    completed = report.completed,
                    failed = report.failed,
                    handled,
                    "Drain cycle finished"
                );

                if report.selected == 0 || max.is_some_and(|max| handled >= max) {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            println!("Handled {} enrichment requests", handled);
        }
        Command::AddSource {
            url,
            title,
            interval_minutes,
            insecure,
        } => {
            if !is_valid_feed_url(&url) {
                bail!("Not an http(s) feed URL: {}", url);
            }
            if insecure {
                warn!(url = %url, "Registering source without TLS verification");
            }
            let title = title.unwrap_or_else(|| url.clone());
            let source = store
                .add_source(&url, &title, interval_minutes, !insecure)
                .await?;
            println!("{}", serde_json::to_string_pretty(&source)?);
        }
        Command::Stats => {
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::RetryFailed { limit } => {
            let reset = store.reset_failed(limit).await?;
            println!("Reset {} failed requests to pending", reset);
        }
    }

    Ok(())
}
