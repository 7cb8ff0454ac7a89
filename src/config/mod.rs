//! Configuration management for the voice chat gateway

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::synthesis::{SynthesisModel, SynthesisTarget, VoiceSettings};
use crate::{Error, Result};

use self::file::VoicechatConfigFile;

/// Default system prompt seeded into a fresh conversation
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly voice assistant. \
    Your replies are read aloud, so keep them short and conversational. \
    Answer in the language the user speaks.";

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API server configuration
    pub server: ServerConfig,

    /// Speech-to-text configuration
    pub transcription: TranscriptionConfig,

    /// Chat completion configuration
    pub chat: ChatConfig,

    /// Speech synthesis configuration
    pub synthesis: SynthesisConfig,

    /// Data and output locations
    pub storage: StorageConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (browser recorder UI)
    pub static_dir: Option<PathBuf>,
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// Whisper-compatible API base URL
    pub base_url: String,

    /// Bearer token, optional for local servers
    pub api_key: Option<String>,

    /// Model identifier (e.g. "whisper-1")
    pub model: String,

    /// Language used when the request carries no hint
    pub language: String,

    /// Sampling temperature (0-1)
    pub temperature: f32,

    /// Bound on one transcription request
    pub timeout: Duration,
}

/// Chat backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatProvider {
    #[default]
    Ollama,
    OpenAi,
}

impl ChatProvider {
    /// Base URL used when none is configured
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => "llama3.1:8b",
            Self::OpenAi => "gpt-4o",
        }
    }
}

impl FromStr for ChatProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown chat provider: {other}"))),
        }
    }
}

/// Chat completion configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub provider: ChatProvider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,

    /// First turn of every fresh conversation
    pub system_prompt: String,

    /// Bound on one completion request
    pub timeout: Duration,
}

/// Speech synthesis configuration
#[derive(Clone)]
pub struct SynthesisConfig {
    pub host: String,
    pub port: u16,

    /// Request path with a `{voice_id}` placeholder
    pub path_template: String,

    pub api_key: String,
    pub voice_id: String,
    pub model: SynthesisModel,
    pub stability: f32,
    pub similarity_boost: f32,

    /// Value of the `Accept` request header
    pub accept: String,

    /// Bound on connect, write, and every socket read
    pub timeout: Duration,
}

impl std::fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path_template", &self.path_template)
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model", &self.model)
            .field("stability", &self.stability)
            .field("similarity_boost", &self.similarity_boost)
            .field("accept", &self.accept)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SynthesisConfig {
    /// Connection target for the streaming client
    #[must_use]
    pub fn target(&self) -> SynthesisTarget {
        SynthesisTarget {
            host: self.host.clone(),
            port: self.port,
            path_template: self.path_template.clone(),
            api_key: self.api_key.clone(),
            accept: self.accept.clone(),
        }
    }

    #[must_use]
    pub const fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            stability: self.stability,
            similarity_boost: self.similarity_boost,
        }
    }
}

/// Data and output locations
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root data directory
    pub data_dir: PathBuf,

    /// Where synthesized replies are written
    pub output_dir: PathBuf,

    /// Conversation history JSON file
    pub history_file: PathBuf,
}

/// Return the default data directory, `~/.local/share/voicechat` on Linux
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "voicechat", "voicechat")
        .map_or_else(|| PathBuf::from("data"), |d| d.data_dir().to_path_buf())
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but malformed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed config file and an environment lookup
    ///
    /// Environment values take precedence over the file, which takes
    /// precedence over built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but malformed
    pub fn from_sources(
        fc: VoicechatConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let port = match env("VOICECHAT_PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| Error::Config(format!("invalid VOICECHAT_PORT: {p}")))?,
            None => fc.server.port.unwrap_or(18790),
        };

        let server = ServerConfig {
            port,
            static_dir: env("VOICECHAT_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
        };

        let openai_key = env("OPENAI_API_KEY");

        let transcription = TranscriptionConfig {
            base_url: env("VOICECHAT_STT_URL")
                .or(fc.transcription.base_url)
                .unwrap_or_else(|| "http://localhost:8000/v1".to_string()),
            api_key: openai_key.clone().or(fc.transcription.api_key),
            model: env("VOICECHAT_STT_MODEL")
                .or(fc.transcription.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            language: env("VOICECHAT_LANGUAGE")
                .or(fc.transcription.language)
                .unwrap_or_else(|| "en".to_string()),
            temperature: fc.transcription.temperature.unwrap_or(0.0),
            timeout: Duration::from_secs(fc.transcription.timeout_secs.unwrap_or(60)),
        };

        let provider = env("VOICECHAT_CHAT_PROVIDER")
            .or(fc.chat.provider)
            .map(|p| p.parse::<ChatProvider>())
            .transpose()?
            .unwrap_or_default();

        let chat = ChatConfig {
            provider,
            base_url: env("VOICECHAT_CHAT_URL")
                .or(fc.chat.base_url)
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            api_key: openai_key.or(fc.chat.api_key),
            model: env("VOICECHAT_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or_else(|| provider.default_model().to_string()),
            temperature: fc.chat.temperature.unwrap_or(0.7),
            max_tokens: fc.chat.max_tokens.unwrap_or(1000),
            system_prompt: env("VOICECHAT_SYSTEM_PROMPT")
                .or(fc.chat.system_prompt)
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            timeout: Duration::from_secs(fc.chat.timeout_secs.unwrap_or(120)),
        };

        let model = env("ELEVENLABS_MODEL_ID")
            .or(fc.synthesis.model_id)
            .map(|m| m.parse::<SynthesisModel>())
            .transpose()?
            .unwrap_or_default();

        let synthesis = SynthesisConfig {
            host: fc
                .synthesis
                .host
                .unwrap_or_else(|| "api.elevenlabs.io".to_string()),
            port: fc.synthesis.port.unwrap_or(443),
            path_template: fc
                .synthesis
                .path_template
                .unwrap_or_else(|| "/v1/text-to-speech/{voice_id}".to_string()),
            api_key: env("ELEVENLABS_API_KEY")
                .or(fc.synthesis.api_key)
                .unwrap_or_default(),
            voice_id: env("ELEVENLABS_VOICE_ID")
                .or(fc.synthesis.voice_id)
                .unwrap_or_default(),
            model,
            stability: fc.synthesis.stability.unwrap_or(0.5),
            similarity_boost: fc.synthesis.similarity_boost.unwrap_or(0.75),
            accept: fc
                .synthesis
                .accept
                .unwrap_or_else(|| "audio/mpeg".to_string()),
            timeout: Duration::from_secs(fc.synthesis.timeout_secs.unwrap_or(30)),
        };

        let data_dir = env("VOICECHAT_DATA_DIR")
            .or(fc.storage.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let storage = StorageConfig {
            output_dir: fc
                .storage
                .output_dir
                .map_or_else(|| data_dir.join("uploads"), PathBuf::from),
            history_file: fc.storage.history_file.map_or_else(
                || data_dir.join("history").join("conversation.json"),
                PathBuf::from,
            ),
            data_dir,
        };

        Ok(Self {
            server,
            transcription,
            chat,
            synthesis,
            storage,
        })
    }

    /// Check that everything needed to serve a full exchange is present
    ///
    /// # Errors
    ///
    /// Returns error naming the first missing value
    pub fn validate(&self) -> Result<()> {
        if self.synthesis.api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required (ELEVENLABS_API_KEY)".to_string(),
            ));
        }
        if self.synthesis.voice_id.is_empty() {
            return Err(Error::Config(
                "ElevenLabs voice id required (ELEVENLABS_VOICE_ID)".to_string(),
            ));
        }
        if self.chat.provider == ChatProvider::OpenAi && self.chat.api_key.is_none() {
            return Err(Error::Config(
                "OpenAI API key required for the openai chat provider".to_string(),
            ));
        }
        Ok(())
    }
}
