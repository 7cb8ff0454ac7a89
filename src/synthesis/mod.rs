//! Streaming text-to-speech over a raw TLS socket
//!
//! One request per connection. The response head is parsed incrementally so
//! success or failure is known before the audio body arrives, and the body
//! is handed out read by read without buffering the whole reply.

mod client;
mod parser;
mod request;

use async_trait::async_trait;

pub use client::{AudioStream, Connector, StreamingSpeechClient, TlsConnector};
pub(crate) use client::error_message;
pub use parser::{MAX_HEAD_BYTES, ParseState, ResponseHead, ResponseParser};
pub use request::{StreamRequest, SynthesisModel, SynthesisTarget, VoiceSettings, redact_head};

use crate::Result;

/// A finite, non-restartable sequence of audio chunks
#[async_trait]
pub trait SpeechStream: Send {
    /// Next chunk in arrival order, `None` at clean end of stream
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails mid-body or the body framing is
    /// broken; no further chunks follow an error
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Something that turns a [`StreamRequest`] into a [`SpeechStream`]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesis; returns only once the peer reported success
    ///
    /// # Errors
    ///
    /// Returns `Connection`, `Protocol`, or `RemoteApi` before any audio
    /// is produced
    async fn stream(&self, request: &StreamRequest) -> Result<Box<dyn SpeechStream>>;
}
