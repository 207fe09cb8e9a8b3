//! Answer normalisation through an `OpenAI`-compatible chat completion

use crate::config::ValidatorConfig;
use crate::services::AnswerValidator;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const SYSTEM_PROMPT: &str = "You check answers given over the phone. \
You receive a JSON object with the question that was asked, the purpose of the \
question and the transcribed answer. Clean up the answer: fix transcription \
errors, drop filler words and keep only the information the question asks for. \
Reply with a single JSON object {\"purpose\": string, \"answer\": string, \
\"complete\": boolean} and nothing else. Keep the purpose unchanged. Set \
complete to false when the answer does not address the question.";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("validator is not configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unparseable validator reply: {0}")]
    Parse(String),
    #[error("validator returned an empty answer")]
    Empty,
}

/// Validator backed by a chat-completion endpoint
pub struct LlmAnswerValidator {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl LlmAnswerValidator {
    pub fn new(config: &ValidatorConfig) -> Result<Self, ValidationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ValidationError::Request(format!("Failed to create HTTP client: {e}")))?;

        if config.api_key.is_none() {
            tracing::warn!("No validator API key configured, raw transcripts will be stored");
        }

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl AnswerValidator for LlmAnswerValidator {
    async fn validate(
        &self,
        question: &str,
        purpose: &str,
        raw_answer: &str,
    ) -> Result<String, ValidationError> {
        let api_key = self.api_key.as_deref().ok_or(ValidationError::NotConfigured)?;

        let user = serde_json::to_string(&AnswerPayload {
            question,
            purpose,
            answer: raw_answer,
        })
        .map_err(|e| ValidationError::Request(e.to_string()))?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ValidationError::Request(format!("Request timeout: {e}"))
                } else {
                    ValidationError::Request(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ValidationError::Request(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(ValidationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ValidationError::Parse(format!("{e} - body: {body}")))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ValidationError::Parse("no choices in reply".to_string()))?;

        parse_verdict(&content)
    }
}

/// Extract the normalised answer from the model's JSON reply
fn parse_verdict(content: &str) -> Result<String, ValidationError> {
    let verdict: Verdict =
        serde_json::from_str(content.trim()).map_err(|e| ValidationError::Parse(e.to_string()))?;

    if verdict.complete == Some(false) {
        tracing::debug!(purpose = %verdict.purpose, "Validator marked answer incomplete");
    }

    let answer = verdict.answer.trim();
    if answer.is_empty() {
        return Err(ValidationError::Empty);
    }
    Ok(answer.to_string())
}

#[derive(Serialize)]
struct AnswerPayload<'a> {
    question: &'a str,
    purpose: &'a str,
    answer: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Verdict {
    #[serde(default)]
    purpose: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    complete: Option<bool>,
}
