//! Voice chat pipeline: transcription, chat, then streamed narration
//!
//! Each run moves through [`PipelineState`] in order. Audio is fanned out to
//! an output file and a live sink chunk by chunk, file first. A run that
//! fails while narrating deletes its file; the conversation history is only
//! stored after the chat stage succeeds.

mod sink;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::Instrument;

pub use sink::{ChannelSink, DiscardSink, FileSink, LiveSink};

use crate::chat::{ChatClient, ChatCompleter};
use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::synthesis::{
    SpeechSynthesizer, StreamRequest, StreamingSpeechClient, SynthesisModel, VoiceSettings,
};
use crate::voice::{Transcriber, TranscriptionClient};
use crate::{Error, Result};

/// Stage of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Transcribing,
    Chatting,
    Synthesizing,
    Done,
    Failed,
}

/// One uploaded recording to answer
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub audio: Vec<u8>,

    /// Original upload name; its extension tells the transcriber the format
    pub file_name: String,

    pub language: String,
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub transcript: String,
    pub reply: String,
    pub narration: Narration,
}

/// A narrated reply saved to disk
#[derive(Debug, Clone)]
pub struct Narration {
    pub path: PathBuf,
    pub bytes: usize,
    pub chunks: usize,
}

/// Voice, model, and output settings for narration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub voice_id: String,
    pub model: SynthesisModel,
    pub voice_settings: VoiceSettings,
    pub system_prompt: String,
    pub output_dir: PathBuf,
    pub history_file: PathBuf,

    /// Longest the conversation stays locked waiting for a reply
    pub chat_timeout: Duration,
}

impl PipelineSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            voice_id: config.synthesis.voice_id.clone(),
            model: config.synthesis.model,
            voice_settings: config.synthesis.voice_settings(),
            system_prompt: config.chat.system_prompt.clone(),
            output_dir: config.storage.output_dir.clone(),
            history_file: config.storage.history_file.clone(),
            chat_timeout: config.chat.timeout,
        }
    }
}

/// Runs the transcription → chat → synthesis sequence
pub struct Orchestrator {
    transcriber: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatCompleter>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    store: ConversationStore,

    /// Serializes load → chat → store for the single conversation identity
    history_lock: Mutex<()>,

    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        chat: Arc<dyn ChatCompleter>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            transcriber,
            chat,
            synthesizer,
            store: ConversationStore::new(settings.history_file.clone()),
            history_lock: Mutex::new(()),
            settings,
        }
    }

    /// Wire up the HTTP-backed collaborators described by `config`
    ///
    /// # Errors
    ///
    /// Returns `Config` if a client cannot be built from the settings
    pub fn from_config(config: &Config) -> Result<Self> {
        let transcriber = TranscriptionClient::new(&config.transcription)?;
        let chat = ChatClient::new(&config.chat)?;
        let synthesizer =
            StreamingSpeechClient::new(config.synthesis.target(), config.synthesis.timeout)?;

        Ok(Self::new(
            Arc::new(transcriber),
            Arc::new(chat),
            Arc::new(synthesizer),
            PipelineSettings::from_config(config),
        ))
    }

    #[must_use]
    pub const fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Answer a recording, streaming the spoken reply to `live`
    ///
    /// # Errors
    ///
    /// Returns the error of whichever stage failed; see [`Self::narrate`]
    /// for what is cleaned up
    pub async fn run(
        &self,
        input: PipelineInput,
        live: &mut dyn LiveSink,
    ) -> Result<PipelineOutcome> {
        let span = tracing::info_span!("pipeline", run = %uuid::Uuid::new_v4());

        async {
            let mut state = PipelineState::Idle;
            let result = self.run_stages(&input, live, &mut state).await;

            match &result {
                Ok(outcome) => {
                    advance(&mut state, PipelineState::Done);
                    tracing::info!(
                        path = %outcome.narration.path.display(),
                        bytes = outcome.narration.bytes,
                        "pipeline complete"
                    );
                }
                Err(e) => {
                    tracing::warn!(stage = ?state, code = e.code(), error = %e, "pipeline failed");
                    advance(&mut state, PipelineState::Failed);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        input: &PipelineInput,
        live: &mut dyn LiveSink,
        state: &mut PipelineState,
    ) -> Result<PipelineOutcome> {
        advance(state, PipelineState::Transcribing);
        let transcript = self
            .transcriber
            .transcribe(&input.audio, &input.file_name, &input.language)
            .await?;

        advance(state, PipelineState::Chatting);
        let reply = self.converse(&transcript).await?;

        advance(state, PipelineState::Synthesizing);
        let narration = self.narrate(&reply, live).await?;

        Ok(PipelineOutcome {
            transcript,
            reply,
            narration,
        })
    }

    /// Append the user's turn, get a reply, and store both
    ///
    /// Nothing is written unless the chat call succeeds.
    async fn converse(&self, transcript: &str) -> Result<String> {
        let _guard = self.history_lock.lock().await;

        let mut history = self.store.load_or_seed(&self.settings.system_prompt)?;
        history.push_user(transcript);

        let reply = tokio::time::timeout(
            self.settings.chat_timeout,
            self.chat.complete(history.turns()),
        )
        .await
        .map_err(|_| Error::Chat("timed out waiting for a reply".to_string()))??;
        history.push_assistant(reply.as_str());
        self.store.save(&history)?;

        Ok(reply)
    }

    /// Synthesize `text`, writing every chunk to a new file and then to `live`
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` before anything is opened, or the synthesis,
    /// file, or live sink error; in the latter cases the output file is
    /// deleted before returning
    pub async fn narrate(&self, text: &str, live: &mut dyn LiveSink) -> Result<Narration> {
        let request = StreamRequest::new(
            text,
            self.settings.voice_id.as_str(),
            self.settings.model,
            self.settings.voice_settings,
        )?;

        let mut file = FileSink::create(&self.settings.output_dir).await?;

        match self.pump(&request, &mut file, live).await {
            Ok(chunks) => {
                let bytes = file.written();
                let path = file.commit().await?;
                Ok(Narration {
                    path,
                    bytes,
                    chunks,
                })
            }
            Err(e) => {
                tracing::debug!(bytes = file.written(), "discarding partial narration");
                file.abort().await;
                Err(e)
            }
        }
    }

    async fn pump(
        &self,
        request: &StreamRequest,
        file: &mut FileSink,
        live: &mut dyn LiveSink,
    ) -> Result<usize> {
        let mut stream = self.synthesizer.stream(request).await?;
        let mut chunks = 0;

        while let Some(chunk) = stream.next_chunk().await? {
            file.write(&chunk).await?;
            live.send(&chunk).await?;
            chunks += 1;
        }

        Ok(chunks)
    }
}

fn advance(state: &mut PipelineState, next: PipelineState) {
    tracing::debug!(from = ?*state, to = ?next, "pipeline stage");
    *state = next;
}
