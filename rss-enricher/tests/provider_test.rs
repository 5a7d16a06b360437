use rss_enricher::providers::{
    build_provider, AnthropicProvider, OpenAiProvider, ProviderKind, ProviderSettings,
    SummaryProvider,
};
use rss_enricher::ProviderError;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPLY: &str = r#"{"summary":"A short summary","highlight":"Read this","keywords":["rust","rss","ai"]}"#;

fn settings(kind: ProviderKind, server: &MockServer) -> ProviderSettings {
    ProviderSettings {
        kind,
        api_key: Some("test-key".to_string()),
        model: Some("test-model".to_string()),
        base_url: Some(server.uri()),
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test]
async fn anthropic_provider_calls_messages_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({ "model": "test-model" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "text", "text": format!("```json\n{}\n```", REPLY) }],
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new(&settings(ProviderKind::Anthropic, &server)).unwrap();
    assert_eq!(provider.name(), "anthropic");
    assert_eq!(provider.model(), "test-model");

    let payload = provider.summarize("Title", "Body").await.unwrap();
    assert_eq!(payload.summary, "A short summary");
    assert_eq!(payload.highlight, "Read this");
    assert_eq!(payload.keywords, vec!["rust", "rss", "ai"]);
}

#[tokio::test]
async fn openai_provider_calls_chat_completions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": REPLY },
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = build_provider(&settings(ProviderKind::OpenAi, &server)).unwrap();
    assert_eq!(provider.name(), "openai");

    let payload = provider.summarize("Title", "Body").await.unwrap();
    assert_eq!(payload.keywords.len(), 3);
}

#[tokio::test]
async fn error_status_becomes_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&settings(ProviderKind::Zhipu, &server)).unwrap();
    match provider.summarize("Title", "Body").await {
        Err(ProviderError::Api { status, body }) => {
            assert_eq!(status, 429);
            assert_eq!(body, "rate limited");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn empty_completion_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": [] })))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new(&settings(ProviderKind::Anthropic, &server)).unwrap();
    assert!(matches!(
        provider.summarize("Title", "Body").await,
        Err(ProviderError::Parse(_))
    ));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&ProviderSettings {
        timeout: Duration::from_millis(200),
        ..settings(ProviderKind::OpenAi, &server)
    })
    .unwrap();

    assert!(matches!(
        provider.summarize("Title", "Body").await,
        Err(ProviderError::Timeout)
    ));
}
