use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use interfaces::defs::{
    EnrichmentRequest, EnrichmentStatus, Item, RawEntry, Source, SummaryPayload,
};

/// Entries beyond this many in a single feed document are ignored.
pub const MAX_ENTRIES_PER_FETCH: usize = 50;

/// Stored item bodies are capped at this many characters.
pub const MAX_ITEM_CONTENT_CHARS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_concurrent_fetches: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("RSS-Enricher/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_seconds: 30,
            max_concurrent_fetches: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// Pending requests picked up per cycle.
    pub batch_size: usize,
    /// Provider calls in flight at once.
    pub max_concurrency: usize,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_concurrency: 3,
        }
    }
}

/// Outcome of one fetch cycle over all active sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReport {
    pub sources: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_items: usize,
}

/// Outcome of one enrichment cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichReport {
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichOutcome {
    Completed,
    Failed,
    /// The request was no longer pending when the unit reloaded it.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_sources: i64,
    pub active_sources: i64,
    pub total_items: i64,
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub completion_rate: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider configuration error: {0}")]
    Config(String),

    #[error("provider network error: {0}")]
    Network(reqwest::Error),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("provider response parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network(e)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnricherError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Source already registered: {url}")]
    SourceExists { url: String },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: Uuid },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EnricherError>;
