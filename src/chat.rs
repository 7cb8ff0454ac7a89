//! Chat completion clients
//!
//! One-shot, non-streaming calls: the whole history goes up, one reply
//! comes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ChatConfig, ChatProvider};
use crate::conversation::ConversationTurn;
use crate::synthesis::error_message;
use crate::{Error, Result};

/// Produces the next assistant reply for a conversation
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// Reply to `history`, whose last turn is the user's message
    ///
    /// # Errors
    ///
    /// Returns `Chat` if the call fails or the reply is empty
    async fn complete(&self, history: &[ConversationTurn]) -> Result<String>;
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ReplyMessage,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP chat client for Ollama or an OpenAI-compatible API
pub struct ChatClient {
    client: reqwest::Client,
    provider: ChatProvider,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    /// Create a client from the chat settings
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty, or if the `OpenAI` provider
    /// has no API key
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("chat base URL required".to_string()));
        }

        let api_key = config.api_key.clone().filter(|k| !k.is_empty());
        if config.provider == ChatProvider::OpenAi && api_key.is_none() {
            return Err(Error::Config("OpenAI API key required for chat".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let mut request = self.client.post(format!("{}{path}", self.base_url)).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "chat request failed");
            Error::Chat(e.to_string())
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let message = error_message(status.as_u16(), &body);
            tracing::error!(status = %status, message = %message, "chat API error");
            return Err(Error::Chat(format!("chat API error {status}: {message}")));
        }

        Ok(response)
    }

    async fn complete_ollama(&self, history: &[ConversationTurn]) -> Result<Option<String>> {
        let body = OllamaRequest {
            model: &self.model,
            messages: history,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response: OllamaResponse = self
            .post("/api/chat", &body)
            .await?
            .json()
            .await
            .map_err(|e| Error::Chat(format!("invalid chat response: {e}")))?;

        Ok(response.message.content)
    }

    async fn complete_openai(&self, history: &[ConversationTurn]) -> Result<Option<String>> {
        let body = OpenAiRequest {
            model: &self.model,
            messages: history,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response: OpenAiResponse = self
            .post("/chat/completions", &body)
            .await?
            .json()
            .await
            .map_err(|e| Error::Chat(format!("invalid chat response: {e}")))?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content))
    }
}

#[async_trait]
impl ChatCompleter for ChatClient {
    async fn complete(&self, history: &[ConversationTurn]) -> Result<String> {
        tracing::debug!(
            provider = ?self.provider,
            model = %self.model,
            turns = history.len(),
            "requesting chat completion"
        );

        let reply = match self.provider {
            ChatProvider::Ollama => self.complete_ollama(history).await?,
            ChatProvider::OpenAi => self.complete_openai(history).await?,
        };

        let reply = reply.as_deref().map(str::trim).unwrap_or_default();
        if reply.is_empty() {
            return Err(Error::Chat("empty reply".to_string()));
        }

        tracing::info!(reply_chars = reply.len(), "chat completion received");
        Ok(reply.to_string())
    }
}
