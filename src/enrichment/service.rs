//! The external text service boundary.
//!
//! One request carries the text plus every mode wanted from it; the
//! enrichment client never makes separate translate/summarize/classify calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::retry::{retry_decision_for_status, RetryDecision};
use crate::config::EnrichmentConfig;
use crate::domain::EventType;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichMode {
    Translate,
    Summarize,
    Classify,
}

impl EnrichMode {
    pub const ALL: [EnrichMode; 3] = [EnrichMode::Translate, EnrichMode::Summarize, EnrichMode::Classify];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentRequest {
    pub title: String,
    pub text: String,
    pub target_language: String,
    pub modes: Vec<EnrichMode>,
}

/// What the service returned. Either field may be missing when its mode
/// was not requested or the service chose not to answer it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnrichmentResponse {
    #[serde(default, alias = "summary")]
    pub result_text: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
}

/// Translate + summarize + classify in one round trip.
///
/// Implementations classify failures: [`PipelineError::EnrichmentTransient`]
/// is retried by the caller, [`PipelineError::EnrichmentPermanent`] is not.
#[async_trait]
pub trait TextService: Send + Sync {
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResponse>;
}

/// [`TextService`] over an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiTextService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    summary_min_chars: usize,
    summary_max_chars: usize,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiTextService {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("enrichment needs an API key".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            summary_min_chars: config.summary_min_chars,
            summary_max_chars: config.summary_max_chars,
        })
    }

    fn body(&self, request: &EnrichmentRequest) -> serde_json::Value {
        json!({
            "model": self.model,
            "temperature": 0.5,
            "response_format": { "type": "json_object" },
            "messages": [
                {
                    "role": "system",
                    "content": "You are a helpful assistant that describes local events for tourists in clear and engaging language. Always answer with a single JSON object."
                },
                {
                    "role": "user",
                    "content": build_prompt(request, self.summary_min_chars, self.summary_max_chars)
                }
            ]
        })
    }
}

#[async_trait]
impl TextService for OpenAiTextService {
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| PipelineError::EnrichmentTransient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("status {}: {}", status.as_u16(), truncate_for_log(&body));
            return Err(match retry_decision_for_status(status) {
                RetryDecision::Retryable => PipelineError::EnrichmentTransient(message),
                RetryDecision::NonRetryable => PipelineError::EnrichmentPermanent(message),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::EnrichmentTransient(format!("unreadable response: {}", e)))?;
        debug!("Text service answered for '{}'", request.title);
        parse_chat_response(chat)
    }
}

/// Prompt asking for one JSON object with `summary` and `event_type`.
pub fn build_prompt(request: &EnrichmentRequest, min_chars: usize, max_chars: usize) -> String {
    let mut tasks: Vec<String> = Vec::new();
    let mut wants_summary = false;
    for mode in &request.modes {
        match mode {
            // Translation and summary come back as the same field.
            EnrichMode::Translate | EnrichMode::Summarize if wants_summary => {}
            EnrichMode::Translate | EnrichMode::Summarize => {
                wants_summary = true;
                tasks.push(format!(
                    "\"summary\": the event rewritten in {} as a compelling, informative summary for a \
                     tourist audience, between {} and {} characters long. Include what the event is, \
                     where it happens and its highlights. Leave out the date unless it is part of the \
                     core description.",
                    request.target_language, min_chars, max_chars
                ));
            }
            EnrichMode::Classify => tasks.push(format!(
                "\"event_type\": exactly one of {}.",
                EventType::ALL.map(|t| t.as_str()).join(", ")
            )),
        }
    }

    format!(
        "Answer with a JSON object with these keys:\n{}\n\nTitle: {}\n\nOriginal text:\n\"\"\"\n{}\n\"\"\"",
        tasks.join("\n"),
        request.title,
        request.text
    )
}

fn parse_chat_response(chat: ChatResponse) -> Result<EnrichmentResponse> {
    let choice = chat
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::EnrichmentTransient("response without choices".to_string()))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(PipelineError::EnrichmentPermanent(
            "content_filter: rejected by the service's content policy".to_string(),
        ));
    }

    let content = choice
        .message
        .content
        .ok_or_else(|| PipelineError::EnrichmentTransient("empty message content".to_string()))?;
    serde_json::from_str(content.trim())
        .map_err(|e| PipelineError::EnrichmentTransient(format!("undocumented response shape: {}", e)))
}

fn truncate_for_log(body: &str) -> String {
    body.chars().take(200).collect()
}
