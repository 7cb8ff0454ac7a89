//! Shared test utilities

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use voicechat_gateway::conversation::ConversationTurn;
use voicechat_gateway::{
    ChatCompleter, Error, Orchestrator, PipelineSettings, Result, SpeechStream, SpeechSynthesizer,
    StreamRequest, SynthesisModel, Transcriber, VoiceSettings,
};

/// Transcriber returning a fixed transcript and recording requested languages
#[derive(Default)]
pub struct MockTranscriber {
    pub transcript: Option<String>,
    pub languages: Mutex<Vec<String>>,
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio: &[u8], _file_name: &str, language: &str) -> Result<String> {
        self.languages.lock().unwrap().push(language.to_string());
        self.transcript
            .clone()
            .ok_or_else(|| Error::Transcription("whisper unavailable".to_string()))
    }
}

/// Chat model with a canned reply
pub struct MockChat(pub Option<String>);

#[async_trait]
impl ChatCompleter for MockChat {
    async fn complete(&self, _history: &[ConversationTurn]) -> Result<String> {
        self.0
            .clone()
            .ok_or_else(|| Error::Chat("model offline".to_string()))
    }
}

/// What the mock synthesis peer does
#[derive(Clone)]
pub enum Peer {
    /// Stream these chunks, then optionally fail
    Stream { chunks: Vec<Vec<u8>>, fail: bool },
    /// Reject with a status and message before any audio
    Reject(u16, String),
}

pub struct MockSynthesizer(pub Peer);

struct MockStream {
    chunks: VecDeque<Vec<u8>>,
    fail: bool,
}

#[async_trait]
impl SpeechStream for MockStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None if self.fail => {
                self.fail = false;
                Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "peer reset",
                )))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn stream(&self, _request: &StreamRequest) -> Result<Box<dyn SpeechStream>> {
        match &self.0 {
            Peer::Stream { chunks, fail } => Ok(Box::new(MockStream {
                chunks: chunks.clone().into(),
                fail: *fail,
            })),
            Peer::Reject(status, message) => Err(Error::RemoteApi {
                status: *status,
                message: message.clone(),
            }),
        }
    }
}

/// Orchestrator over mocks, writing into `dir`
pub fn orchestrator(
    dir: &Path,
    transcriber: Arc<MockTranscriber>,
    reply: Option<&str>,
    peer: Peer,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        transcriber,
        Arc::new(MockChat(reply.map(ToString::to_string))),
        Arc::new(MockSynthesizer(peer)),
        settings(dir),
    ))
}

/// Pipeline settings writing into `dir`
#[must_use]
pub fn settings(dir: &Path) -> PipelineSettings {
    PipelineSettings {
        voice_id: "test_voice".to_string(),
        model: SynthesisModel::default(),
        voice_settings: VoiceSettings::default(),
        system_prompt: "You are a test.".to_string(),
        output_dir: output_dir(dir),
        history_file: dir.join("history").join("conversation.json"),
        chat_timeout: Duration::from_secs(5),
    }
}

#[must_use]
pub fn output_dir(dir: &Path) -> PathBuf {
    dir.join("uploads")
}

/// Files currently in the output directory
#[must_use]
pub fn output_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(output_dir(dir))
        .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
        .unwrap_or_default()
}

pub const BOUNDARY: &str = "voicechat-test-boundary";

/// Encode a single-field multipart body
#[must_use]
pub fn multipart_body(field: &str, content_type: Option<&str>, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; \
         filename=\"clip.webm\"\r\n"
    );
    if let Some(content_type) = content_type {
        body.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    body.push_str("\r\n");

    let mut bytes = body.into_bytes();
    bytes.extend_from_slice(data);
    bytes.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    bytes
}
