use super::{api_error, PromptStrategy, ProviderSettings, SummaryProvider};
use crate::types::{ProviderError, SummaryPayload};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OpenAI Chat Completions, or any gateway speaking the same protocol.
pub struct OpenAiProvider {
    http: Client,
    api_key: String,
    model: String,
    endpoint: String,
    max_tokens: u32,
    prompt: PromptStrategy,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            http: settings.http_client()?,
            api_key: settings.require_api_key()?,
            model: settings.model_or_default(),
            endpoint: format!("{}/chat/completions", settings.base_url_or_default()),
            max_tokens: settings.max_tokens,
            prompt: PromptStrategy::new(settings.max_content_chars),
        })
    }
}

#[async_trait]
impl SummaryProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn summarize(&self, title: &str, body: &str) -> Result<SummaryPayload, ProviderError> {
        let prompt = self.prompt.build_prompt(title, body);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.prompt.system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.3,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::Parse("empty completion".to_string()))?;

        debug!(model = %self.model, title, "Chat completion received");
        self.prompt.parse_response(&text)
    }
}
