use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use maitre_core::config::{LlmConfig, LlmProvider};
use maitre_core::domain::conversation::{ConversationTurn, Role};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("text generator is not configured: {0}")]
    NotConfigured(String),
    #[error("text generator request failed: {0}")]
    Transport(String),
    #[error("text generator returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("text generator response could not be decoded: {0}")]
    Decode(String),
}

impl GeneratorError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::NotConfigured(_) | Self::Decode(_) => false,
        }
    }
}

/// Produces the assistant's prose for one turn. `instruction` is the system
/// text; `history` holds the conversation so far, newest user turn last.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        instruction: &str,
        history: &[ConversationTurn],
    ) -> Result<String, GeneratorError>;
}

pub struct HttpTextGenerator {
    client: Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_tokens: u32,
    max_retries: u32,
}

impl HttpTextGenerator {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GeneratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| GeneratorError::NotConfigured(error.to_string()))?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string())
            .trim_end_matches('/')
            .to_string();

        if config.provider != LlmProvider::Ollama && config.api_key.is_none() {
            return Err(GeneratorError::NotConfigured(format!(
                "provider {:?} requires llm.api_key",
                config.provider
            )));
        }

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn request(&self, instruction: &str, history: &[ConversationTurn]) -> RequestBuilder {
        match self.provider {
            LlmProvider::Ollama => self
                .client
                .post(format!("{}/api/chat", self.base_url))
                .json(&json!({
                    "model": self.model,
                    "messages": chat_messages(instruction, history),
                    "stream": false,
                    "options": { "num_predict": self.max_tokens },
                })),
            LlmProvider::OpenAi => {
                let request = self
                    .client
                    .post(format!("{}/chat/completions", self.base_url))
                    .json(&json!({
                        "model": self.model,
                        "messages": chat_messages(instruction, history),
                        "max_tokens": self.max_tokens,
                    }));
                match &self.api_key {
                    Some(key) => request.bearer_auth(key.expose_secret()),
                    None => request,
                }
            }
            LlmProvider::Anthropic => {
                let messages = history
                    .iter()
                    .filter(|turn| turn.role != Role::System)
                    .map(|turn| json!({ "role": turn.role.as_str(), "content": turn.content }))
                    .collect::<Vec<_>>();
                let request = self
                    .client
                    .post(format!("{}/messages", self.base_url))
                    .header("anthropic-version", "2023-06-01")
                    .json(&json!({
                        "model": self.model,
                        "system": instruction,
                        "messages": messages,
                        "max_tokens": self.max_tokens,
                    }));
                match &self.api_key {
                    Some(key) => request.header("x-api-key", key.expose_secret()),
                    None => request,
                }
            }
        }
    }

    async fn attempt(
        &self,
        instruction: &str,
        history: &[ConversationTurn],
    ) -> Result<String, GeneratorError> {
        let response = self
            .request(instruction, history)
            .send()
            .await
            .map_err(|error| GeneratorError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Status { status: status.as_u16(), body });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| GeneratorError::Decode(error.to_string()))?;
        reply_text(self.provider, &payload)
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(
        &self,
        instruction: &str,
        history: &[ConversationTurn],
    ) -> Result<String, GeneratorError> {
        let mut attempt = 0;
        loop {
            match self.attempt(instruction, history).await {
                Ok(text) => return Ok(text),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = retry_backoff(attempt);
                    warn!(
                        event_name = "llm.generate.retry",
                        provider = ?self.provider,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "retrying text generation"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(4);

/// Delay before retry number `attempt` (1-based): doubles each time, capped.
fn retry_backoff(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    RETRY_BASE_DELAY.saturating_mul(factor).min(RETRY_MAX_DELAY)
}

/// Stand-in when no generator could be built; every call fails so the
/// orchestrator answers with its apology.
pub struct UnconfiguredGenerator {
    reason: String,
}

impl UnconfiguredGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl TextGenerator for UnconfiguredGenerator {
    async fn generate(
        &self,
        _instruction: &str,
        _history: &[ConversationTurn],
    ) -> Result<String, GeneratorError> {
        Err(GeneratorError::NotConfigured(self.reason.clone()))
    }
}

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Ollama => "http://localhost:11434",
        LlmProvider::OpenAi => "https://api.openai.com/v1",
        LlmProvider::Anthropic => "https://api.anthropic.com/v1",
    }
}

/// Chat-completion message list: the instruction first, then the history
/// without its own system turn.
fn chat_messages(instruction: &str, history: &[ConversationTurn]) -> Vec<Value> {
    std::iter::once(json!({ "role": "system", "content": instruction }))
        .chain(
            history
                .iter()
                .filter(|turn| turn.role != Role::System)
                .map(|turn| json!({ "role": turn.role.as_str(), "content": turn.content })),
        )
        .collect()
}

fn reply_text(provider: LlmProvider, payload: &Value) -> Result<String, GeneratorError> {
    let text = match provider {
        LlmProvider::Ollama => payload.pointer("/message/content"),
        LlmProvider::OpenAi => payload.pointer("/choices/0/message/content"),
        LlmProvider::Anthropic => payload.pointer("/content/0/text"),
    };

    text.and_then(Value::as_str).map(str::to_string).ok_or_else(|| {
        GeneratorError::Decode(format!("{provider:?} response is missing the reply text"))
    })
}
