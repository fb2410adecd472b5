use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{AiChatClient, AiRequest, AiResponse, ChatMessage};
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};

const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1/";
const COMPLETIONS_PATH: &str = "chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Longest slice of an error body carried into error messages.
const ERROR_BODY_PREVIEW: usize = 512;

type ContentField = fn(&Value) -> Option<&str>;

/// Where the generated text may live inside `choices[0]`, in priority order.
/// Reasoning models sometimes leave `content` empty and answer in `reasoning`;
/// legacy completion shapes use `text`.
pub const CONTENT_FIELDS: [(&str, ContentField); 3] = [
    ("message.content", message_content),
    ("message.reasoning", message_reasoning),
    ("text", choice_text),
];

fn message_content(choice: &Value) -> Option<&str> {
    choice.get("message")?.get("content")?.as_str()
}

fn message_reasoning(choice: &Value) -> Option<&str> {
    choice.get("message")?.get("reasoning")?.as_str()
}

fn choice_text(choice: &Value) -> Option<&str> {
    choice.get("text")?.as_str()
}

/// Pull the first non-blank content field out of a chat-completion body.
pub fn extract_content(body: &Value) -> PipelineResult<String> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| PipelineError::ai("response has no choices"))?;

    for (field, read) in CONTENT_FIELDS {
        if let Some(text) = read(choice).filter(|t| !t.trim().is_empty()) {
            debug!(field, len = text.len(), "using response field");
            return Ok(text.to_string());
        }
    }
    Err(PipelineError::ai(
        "response carried no content, reasoning or text",
    ))
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
}

/// OpenRouter-compatible chat-completions client. Immutable once built.
#[derive(Clone)]
pub struct OpenRouterClient {
    http: Client,
    base_url: Url,
    api_key: String,
    referer: Option<String>,
    app_title: Option<String>,
}

impl fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> PipelineResult<Self> {
        let base_url = Url::parse(OPENROUTER_API_BASE)
            .map_err(|e| PipelineError::ai(format!("invalid default base URL: {}", e)))?;
        Self::with_base_url(api_key, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(api_key: String, base_url: Url, timeout: Duration) -> PipelineResult<Self> {
        let http = Client::builder()
            .user_agent("studyflow-gen/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| PipelineError::ai(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
            api_key,
            referer: None,
            app_title: None,
        })
    }

    pub fn from_config(cfg: &Config) -> PipelineResult<Self> {
        let base_url = Url::parse(&cfg.ai.base_url)
            .map_err(|e| PipelineError::ai(format!("invalid ai.base_url: {}", e)))?;
        let client = Self::with_base_url(
            cfg.ai.api_key.clone(),
            base_url,
            Duration::from_secs(cfg.ai.timeout_seconds),
        )?;
        Ok(client.with_attribution(cfg.ai.referer.clone(), cfg.ai.app_title.clone()))
    }

    /// Attribution headers OpenRouter shows on its dashboards.
    pub fn with_attribution(mut self, referer: Option<String>, app_title: Option<String>) -> Self {
        self.referer = referer.filter(|s| !s.trim().is_empty());
        self.app_title = app_title.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn build_request(&self, body: &Value) -> PipelineResult<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(COMPLETIONS_PATH)
            .map_err(|e| PipelineError::ai(format!("invalid provider base URL: {}", e)))?;
        let mut builder = self
            .http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.app_title {
            builder = builder.header("X-Title", title);
        }
        builder
            .json(body)
            .build()
            .map_err(|e| PipelineError::ai(format!("failed to build provider request: {}", e)))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_PREVIEW) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl AiChatClient for OpenRouterClient {
    async fn send(&self, request: &AiRequest) -> PipelineResult<AiResponse> {
        let body = serde_json::to_value(CompletionBody {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        })
        .map_err(|e| PipelineError::ai(format!("failed to encode request: {}", e)))?;
        let http_request = self.build_request(&body)?;
        info!(
            url = %http_request.url(),
            model = %request.model,
            messages = request.messages.len(),
            max_tokens = request.max_tokens,
            "sending chat completion"
        );

        let res = self.http.execute(http_request).await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::ai(format!("provider request timed out: {}", e))
            } else {
                PipelineError::ai(format!("failed to reach provider: {}", e))
            }
        })?;

        let status = res.status();
        let raw_body = res
            .text()
            .await
            .map_err(|e| PipelineError::ai_status(status.as_u16(), format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            warn!(%status, body = %preview(&raw_body), "provider returned an error");
            return Err(PipelineError::ai_status(
                status.as_u16(),
                format!("provider returned {}: {}", status, preview(&raw_body)),
            ));
        }

        let parsed: Value = serde_json::from_str(&raw_body).map_err(|e| {
            PipelineError::ai_status(status.as_u16(), format!("invalid response JSON: {}", e))
        })?;
        let content = extract_content(&parsed).map_err(|e| match e {
            PipelineError::AiProvider { message, .. } => {
                PipelineError::ai_status(status.as_u16(), message)
            }
            other => other,
        })?;
        debug!(status = status.as_u16(), len = content.len(), "chat completion received");

        Ok(AiResponse {
            content,
            status: status.as_u16(),
            raw_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_request_sets_headers() {
        let client = OpenRouterClient::new("key-123".into())
            .unwrap()
            .with_attribution(Some("https://studyflow.test".into()), Some("Studyflow".into()));
        let request = client.build_request(&json!({ "model": "m" })).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "https://openrouter.ai/api/v1/chat/completions");
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|h| h.to_str().ok())
                .unwrap()
                .to_string()
        };
        assert_eq!(header("Authorization"), "Bearer key-123");
        assert_eq!(header("Content-Type"), "application/json");
        assert_eq!(header("HTTP-Referer"), "https://studyflow.test");
        assert_eq!(header("X-Title"), "Studyflow");
    }

    #[test]
    fn base_url_without_trailing_slash_keeps_its_path() {
        let client = OpenRouterClient::with_base_url(
            "k".into(),
            Url::parse("http://localhost:9000/api/v1").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        let request = client.build_request(&json!({})).unwrap();
        assert_eq!(request.url().path(), "/api/v1/chat/completions");
        assert!(request.headers().get("X-Title").is_none());
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let client = OpenRouterClient::new("super-secret".into()).unwrap();
        let out = format!("{:?}", client);
        assert!(!out.contains("super-secret"));
        assert!(out.contains("REDACTED"));
    }

    #[test]
    fn content_fields_fall_back_in_order() {
        let body = json!({"choices": [{"message": {"content": "answer", "reasoning": "thinking"}}]});
        assert_eq!(extract_content(&body).unwrap(), "answer");

        let body = json!({"choices": [{"message": {"content": "  ", "reasoning": "thinking"}}]});
        assert_eq!(extract_content(&body).unwrap(), "thinking");

        let body = json!({"choices": [{"message": {"content": null}, "text": "legacy"}]});
        assert_eq!(extract_content(&body).unwrap(), "legacy");
    }

    #[test]
    fn blank_or_missing_content_is_an_error() {
        let body = json!({"choices": [{"message": {"content": "", "reasoning": ""}, "text": ""}]});
        assert!(matches!(
            extract_content(&body),
            Err(PipelineError::AiProvider { .. })
        ));
        assert!(extract_content(&json!({"choices": []})).is_err());
        assert!(extract_content(&json!({"error": "x"})).is_err());
    }

    #[test]
    fn preview_cuts_long_bodies_on_char_boundaries() {
        let long = "é".repeat(ERROR_BODY_PREVIEW + 10);
        assert_eq!(preview(&long).chars().count(), ERROR_BODY_PREVIEW);
        assert_eq!(preview("short"), "short");
    }
}
