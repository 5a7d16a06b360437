//! Language-model providers that turn an item into a [`SummaryPayload`].
//!
//! Every provider shares one [`PromptStrategy`], so the request wording and
//! the response contract stay identical across vendors. Only the transport
//! differs.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use crate::types::{ProviderError, SummaryPayload};
use crate::utils::text::{preview, truncate_chars};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait SummaryProvider: Send + Sync {
    /// Short vendor name used in logs.
    fn name(&self) -> &str;

    /// Model identifier recorded on completed requests.
    fn model(&self) -> &str;

    async fn summarize(&self, title: &str, body: &str) -> Result<SummaryPayload, ProviderError>;
}

pub type DynProvider = Arc<dyn SummaryProvider>;

/// Prompt construction and response decoding shared by all providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptStrategy {
    pub max_content_chars: usize,
}

impl Default for PromptStrategy {
    fn default() -> Self {
        Self {
            max_content_chars: 3000,
        }
    }
}

impl PromptStrategy {
    pub fn new(max_content_chars: usize) -> Self {
        Self { max_content_chars }
    }

    pub fn system_prompt(&self) -> &'static str {
        "You are a concise technical editor. You summarize articles for a \
         reading list and always answer with a single JSON object."
    }

    pub fn build_prompt(&self, title: &str, body: &str) -> String {
        let body = truncate_chars(body, self.max_content_chars);
        format!(
            r#"Read the following article and summarize it.

Title: {title}
Body: {body}

Reply with exactly this JSON object and nothing else:
{{
  "summary": "a summary of at most 200 characters",
  "highlight": "one sentence on why it is worth reading, at most 30 characters",
  "keywords": ["keyword1", "keyword2", "keyword3"]
}}"#
        )
    }

    /// Decode a model reply, tolerating a surrounding markdown code fence.
    pub fn parse_response(&self, text: &str) -> Result<SummaryPayload, ProviderError> {
        let json = strip_code_fence(text.trim());

        serde_json::from_str::<SummaryPayload>(json).map_err(|e| {
            ProviderError::Parse(format!(
                "malformed summary payload ({}): {}",
                e,
                preview(text.trim(), 200)
            ))
        })
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") up to the first newline.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches("json"),
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    /// Zhipu GLM through its OpenAI-compatible endpoint.
    Zhipu,
}

impl ProviderKind {
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-3-5-sonnet-20241022",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Zhipu => "glm-4-flash",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Zhipu => "https://open.bigmodel.cn/api/paas/v4",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Zhipu => "zhipu",
        })
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "zhipu" | "glm" => Ok(ProviderKind::Zhipu),
            other => Err(ProviderError::Config(format!("unknown provider: {}", other))),
        }
    }
}

/// Everything needed to construct a provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_content_chars: usize,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Anthropic,
            api_key: None,
            model: None,
            base_url: None,
            max_content_chars: PromptStrategy::default().max_content_chars,
            timeout: Duration::from_secs(60),
            max_tokens: 1000,
        }
    }
}

impl ProviderSettings {
    pub(crate) fn require_api_key(&self) -> Result<String, ProviderError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::Config(format!("no API key configured for {}", self.kind))
            })
    }

    pub(crate) fn model_or_default(&self) -> String {
        self.model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.kind.default_model().to_string())
    }

    pub(crate) fn base_url_or_default(&self) -> String {
        self.base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(self.kind.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("RSS-Enricher/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()?;
        Ok(client)
    }
}

/// Build the provider selected by `settings`.
pub fn build_provider(settings: &ProviderSettings) -> Result<DynProvider, ProviderError> {
    let provider: DynProvider = match settings.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(settings)?),
        ProviderKind::OpenAi | ProviderKind::Zhipu => Arc::new(OpenAiProvider::new(settings)?),
    };
    Ok(provider)
}

/// Read an error body for inclusion in [`ProviderError::Api`].
pub(crate) async fn api_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ProviderError::Api {
        status,
        body: preview(&body, 500),
    }
}
