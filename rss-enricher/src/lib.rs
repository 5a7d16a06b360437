pub mod aggregator;
pub mod enricher;
pub mod feed_store;
pub mod fetcher;
pub mod ingest;
pub mod parser;
pub mod providers;
pub mod retry;
pub mod scheduler;
pub mod types;
pub mod utils;

pub use aggregator::FeedAggregator;
pub use enricher::Enricher;
pub use feed_store::{FeedStore, WriteTransaction};
pub use fetcher::Fetcher;
pub use ingest::IngestionGate;
pub use parser::FeedParser;
pub use providers::{build_provider, PromptStrategy, ProviderKind, ProviderSettings, SummaryProvider};
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use types::*;
