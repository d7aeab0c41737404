//! Chat-completion oracle.
//!
//! Speaks the OpenAI-compatible `/v1/chat/completions` protocol, which covers
//! hosted APIs as well as llama.cpp, vLLM and Ollama servers.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use coordination::workflow::{Oracle, OracleError, OracleReply, Role, StateRecord};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::config::{FoundryConfig, LlmEndpoint, Temperatures};
use crate::prompts::{self, Prompt, PROMPT_VERSION};
use crate::telemetry::elapsed_ms;

/// Response bodies longer than this are cut in error messages.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    /// Reasoning models (DeepSeek-R1, Qwen3 thinking) put their scratch work here.
    reasoning_content: Option<String>,
}

/// Extract the assistant text from a chat-completion response body.
///
/// Falls back to `reasoning_content` only when `content` is empty, so the
/// structured answer is never mixed with the model's scratch work.
pub fn parse_completion(body: &str) -> Result<String, OracleError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| OracleError::Malformed(format!("Failed to parse response: {}", e)))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| OracleError::Malformed("No response from LLM".to_string()))?;

    let content = choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .or(choice.message.reasoning_content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(OracleError::Malformed("LLM returned empty content".to_string()));
    }
    Ok(content)
}

/// Map a non-success HTTP status to an oracle error.
pub fn status_error(status: StatusCode, body: &str) -> OracleError {
    let body = truncate(body, MAX_ERROR_BODY);
    if status == StatusCode::TOO_MANY_REQUESTS {
        OracleError::RateLimited(body)
    } else {
        OracleError::Api {
            status: status.as_u16(),
            body,
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// [`Oracle`] backed by an OpenAI-compatible chat-completion endpoint.
#[derive(Clone)]
pub struct LlmOracle {
    endpoint: LlmEndpoint,
    temperatures: Temperatures,
    http: reqwest::Client,
}

impl LlmOracle {
    pub fn new(config: &FoundryConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            endpoint: config.llm.clone(),
            temperatures: config.temperatures.clone(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.llm.timeout_secs))
                .build()?,
        })
    }

    pub fn endpoint(&self) -> &LlmEndpoint {
        &self.endpoint
    }

    /// Request body for `role`, exposed for inspection and tests.
    pub fn request_for(&self, role: Role, prompt: &Prompt) -> serde_json::Value {
        serde_json::to_value(self.chat_request(role, prompt)).unwrap_or_default()
    }

    fn chat_request(&self, role: Role, prompt: &Prompt) -> ChatRequest {
        ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![
                ChatMessage::system(prompt.system),
                ChatMessage::user(prompt.user.clone()),
            ],
            max_tokens: self.endpoint.max_tokens,
            temperature: self.temperatures.for_role(role),
        }
    }

    async fn query_llm(&self, request: &ChatRequest) -> Result<String, OracleError> {
        let mut builder = self.http.post(&self.endpoint.url).json(request);
        if let Some(key) = &self.endpoint.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        parse_completion(&body)
    }

    fn transport_error(&self, e: reqwest::Error) -> OracleError {
        if e.is_timeout() {
            OracleError::Timeout {
                secs: self.endpoint.timeout_secs,
            }
        } else {
            OracleError::Transport(format!("HTTP request failed: {}", e))
        }
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn complete(&self, role: Role, state: &StateRecord) -> Result<OracleReply, OracleError> {
        // Rejected locally: the Supervisor routes without a model, and a
        // Drafter with no request has nothing to write about.
        let prompt = prompts::build(role, state).ok_or_else(|| OracleError::Api {
            status: StatusCode::BAD_REQUEST.as_u16(),
            body: format!("no prompt can be built for {} on this thread", role),
        })?;
        let request = self.chat_request(role, &prompt);

        let span = info_span!(
            "oracle_call",
            thread_id = %state.thread_id,
            role = %role,
            model = %self.endpoint.model,
            prompt_version = PROMPT_VERSION,
        );
        async move {
            let started = Instant::now();
            let result = self.query_llm(&request).await;
            let ms = elapsed_ms(started);
            match &result {
                Ok(text) => debug!(elapsed_ms = ms, chars = text.len(), "Oracle replied"),
                Err(e) => warn!(elapsed_ms = ms, error = %e, "Oracle call failed"),
            }
            result.map(OracleReply::text)
        }
        .instrument(span)
        .await
    }
}
