use super::{api_error, PromptStrategy, ProviderSettings, SummaryProvider};
use crate::types::{ProviderError, SummaryPayload};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API.
pub struct AnthropicProvider {
    http: Client,
    api_key: String,
    model: String,
    endpoint: String,
    max_tokens: u32,
    prompt: PromptStrategy,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            http: settings.http_client()?,
            api_key: settings.require_api_key()?,
            model: settings.model_or_default(),
            endpoint: format!("{}/v1/messages", settings.base_url_or_default()),
            max_tokens: settings.max_tokens,
            prompt: PromptStrategy::new(settings.max_content_chars),
        })
    }
}

#[async_trait]
impl SummaryProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn summarize(&self, title: &str, body: &str) -> Result<SummaryPayload, ProviderError> {
        let prompt = self.prompt.build_prompt(title, body);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: self.prompt.system_prompt(),
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let parsed: MessagesResponse = response.json().await?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        if text.trim().is_empty() {
            return Err(ProviderError::Parse("empty completion".to_string()));
        }

        debug!(model = %self.model, title, "Anthropic summary received");
        self.prompt.parse_response(&text)
    }
}
