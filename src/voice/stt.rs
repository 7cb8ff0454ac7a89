//! Speech-to-text (STT) processing

use async_trait::async_trait;

use super::Transcriber;
use crate::config::TranscriptionConfig;
use crate::synthesis::error_message;
use crate::{Error, Result};

/// Response from a Whisper-compatible transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech to text through a Whisper-compatible endpoint
pub struct TranscriptionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl TranscriptionClient {
    /// Create a client from the transcription settings
    ///
    /// # Errors
    ///
    /// Returns error if the base URL or model is empty
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::Config("transcription base URL required".to_string()));
        }
        if config.model.is_empty() {
            return Err(Error::Config("transcription model required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{base_url}/audio/transcriptions"),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Transcriber for TranscriptionClient {
    async fn transcribe(&self, audio: &[u8], file_name: &str, language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), language, "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec()).file_name(file_name.to_string()),
            )
            .text("model", self.model.clone())
            .text("response_format", "json")
            .text("language", language.to_string())
            .text("temperature", self.temperature.to_string());

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "Whisper request failed");
            Error::Transcription(e.to_string())
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let message = error_message(status.as_u16(), &body);
            tracing::error!(status = %status, message = %message, "Whisper API error");
            return Err(Error::Transcription(format!("Whisper API error {status}: {message}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            Error::Transcription(format!("invalid transcription response: {e}"))
        })?;

        let text = result.text.trim();
        if text.is_empty() {
            return Err(Error::Transcription("no speech recognised".to_string()));
        }

        tracing::info!(transcript = %text, "transcription complete");
        Ok(text.to_string())
    }
}
