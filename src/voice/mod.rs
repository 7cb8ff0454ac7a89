//! Voice processing module
//!
//! Turns uploaded recordings into text for the chat stage.

mod stt;

use async_trait::async_trait;

pub use stt::TranscriptionClient;

use crate::Result;

/// Converts a recording into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio`, named `file_name` so the backend can tell its format
    ///
    /// # Errors
    ///
    /// Returns `Transcription` if the call fails or nothing was recognised
    async fn transcribe(&self, audio: &[u8], file_name: &str, language: &str) -> Result<String>;
}
