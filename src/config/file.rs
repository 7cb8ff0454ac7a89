//! TOML configuration file loading
//!
//! Supports `~/.config/voicechat/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoicechatConfigFile {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Speech-to-text configuration
    #[serde(default)]
    pub transcription: TranscriptionFileConfig,

    /// Chat completion configuration
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub synthesis: SynthesisFileConfig,

    /// Data and output locations
    #[serde(default)]
    pub storage: StorageFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Directory holding the browser recorder UI
    pub static_dir: Option<String>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct TranscriptionFileConfig {
    /// Whisper-compatible base URL (e.g. "http://localhost:8000/v1")
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Default language hint when the request carries none
    pub language: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
}

/// Chat completion configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// "ollama" or "openai"
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Seed for a fresh conversation history
    pub system_prompt: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SynthesisFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Request path, `{voice_id}` is substituted
    pub path_template: Option<String>,
    pub api_key: Option<String>,
    pub voice_id: Option<String>,
    pub model_id: Option<String>,
    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub accept: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Data and output locations
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    pub data_dir: Option<String>,
    pub output_dir: Option<String>,
    pub history_file: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoicechatConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoicechatConfigFile {
    let Some(path) = config_file_path() else {
        return VoicechatConfigFile::default();
    };

    if !path.exists() {
        return VoicechatConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoicechatConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoicechatConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voicechat/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voicechat").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let fc: VoicechatConfigFile = toml::from_str("").unwrap();
        assert!(fc.server.port.is_none());
        assert!(fc.synthesis.voice_id.is_none());
    }

    #[test]
    fn partial_sections_parse() {
        let fc: VoicechatConfigFile = toml::from_str(
            r#"
            [server]
            port = 9000

            [chat]
            provider = "openai"
            max_tokens = 256

            [synthesis]
            voice_id = "21m00Tcm4TlvDq8ikWAM"
            stability = 0.3
            "#,
        )
        .unwrap();

        assert_eq!(fc.server.port, Some(9000));
        assert_eq!(fc.chat.provider.as_deref(), Some("openai"));
        assert_eq!(fc.chat.max_tokens, Some(256));
        assert_eq!(fc.synthesis.voice_id.as_deref(), Some("21m00Tcm4TlvDq8ikWAM"));
        assert_eq!(fc.synthesis.stability, Some(0.3));
        assert!(fc.storage.data_dir.is_none());
    }
}
