//! Voicechat Gateway - spoken conversations with a chat model
//!
//! A recording is transcribed, answered by a chat model with the stored
//! conversation as context, and the reply is synthesized and streamed back
//! while it is also saved to disk.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 HTTP API (/api/chat)                  │
//! └──────────────────────────┬───────────────────────────┘
//!                            │
//! ┌──────────────────────────▼───────────────────────────┐
//! │                    Orchestrator                       │
//! │  Transcriber → ChatCompleter (+ history) → Synthesis  │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ chunks
//!                ┌───────────┴───────────┐
//!                ▼                       ▼
//!          output file              live response
//! ```

pub mod api;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod error;
pub mod pipeline;
pub mod synthesis;
pub mod voice;

pub use chat::{ChatClient, ChatCompleter};
pub use config::Config;
pub use conversation::{ConversationHistory, ConversationStore, ConversationTurn, Role};
pub use error::{Error, Result};
pub use pipeline::{
    ChannelSink, DiscardSink, FileSink, LiveSink, Narration, Orchestrator, PipelineInput,
    PipelineOutcome, PipelineSettings, PipelineState,
};
pub use synthesis::{
    SpeechStream, SpeechSynthesizer, StreamRequest, StreamingSpeechClient, SynthesisModel,
    VoiceSettings,
};
pub use voice::{Transcriber, TranscriptionClient};
