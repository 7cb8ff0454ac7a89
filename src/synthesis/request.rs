//! Synthesis request parameters and HTTP/1.1 request encoding

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::{Error, Result};

/// Synthesis models accepted by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SynthesisModel {
    #[default]
    #[serde(rename = "eleven_multilingual_v2")]
    ElevenMultilingualV2,
    #[serde(rename = "eleven_multilingual_v1")]
    ElevenMultilingualV1,
    #[serde(rename = "eleven_monolingual_v1")]
    ElevenMonolingualV1,
    #[serde(rename = "eleven_turbo_v2")]
    ElevenTurboV2,
    #[serde(rename = "eleven_turbo_v2_5")]
    ElevenTurboV25,
    #[serde(rename = "eleven_flash_v2")]
    ElevenFlashV2,
    #[serde(rename = "eleven_flash_v2_5")]
    ElevenFlashV25,
}

impl SynthesisModel {
    /// Every accepted model
    pub const ALL: [Self; 7] = [
        Self::ElevenMultilingualV2,
        Self::ElevenMultilingualV1,
        Self::ElevenMonolingualV1,
        Self::ElevenTurboV2,
        Self::ElevenTurboV25,
        Self::ElevenFlashV2,
        Self::ElevenFlashV25,
    ];

    /// Wire identifier
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ElevenMultilingualV2 => "eleven_multilingual_v2",
            Self::ElevenMultilingualV1 => "eleven_multilingual_v1",
            Self::ElevenMonolingualV1 => "eleven_monolingual_v1",
            Self::ElevenTurboV2 => "eleven_turbo_v2",
            Self::ElevenTurboV25 => "eleven_turbo_v2_5",
            Self::ElevenFlashV2 => "eleven_flash_v2",
            Self::ElevenFlashV25 => "eleven_flash_v2_5",
        }
    }
}

impl fmt::Display for SynthesisModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SynthesisModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unsupported synthesis model: {s}")))
    }
}

/// Voice tuning sent with every request
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

/// Parameters for one synthesis call
///
/// Immutable once built; construct through [`StreamRequest::new`] so the
/// text, voice id, and settings are validated up front.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    text: String,
    voice_id: String,
    model: SynthesisModel,
    settings: VoiceSettings,
}

/// JSON body of the synthesis call
#[derive(Serialize)]
struct RequestBody<'a> {
    text: &'a str,
    model_id: SynthesisModel,
    voice_settings: VoiceSettings,
}

/// Where and how to send a [`StreamRequest`]
#[derive(Clone)]
pub struct SynthesisTarget {
    pub host: String,
    pub port: u16,

    /// Request path with a `{voice_id}` placeholder
    pub path_template: String,

    pub api_key: String,
    pub accept: String,
}

impl fmt::Debug for SynthesisTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path_template", &self.path_template)
            .field("api_key", &"[REDACTED]")
            .field("accept", &self.accept)
            .finish()
    }
}

impl StreamRequest {
    /// Build and validate a synthesis request
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the text is blank, the voice id contains
    /// anything but ASCII letters, digits, `-` or `_`, or a voice setting
    /// falls outside `0.0..=1.0`
    pub fn new(
        text: impl Into<String>,
        voice_id: impl Into<String>,
        model: SynthesisModel,
        settings: VoiceSettings,
    ) -> Result<Self> {
        let text = text.into();
        let voice_id = voice_id.into();

        if text.trim().is_empty() {
            return Err(Error::InvalidRequest("text is empty".to_string()));
        }

        if voice_id.is_empty()
            || !voice_id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(Error::InvalidRequest(format!("invalid voice id: {voice_id:?}")));
        }

        for (name, value) in [
            ("stability", settings.stability),
            ("similarity_boost", settings.similarity_boost),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidRequest(format!(
                    "{name} must be within 0.0..=1.0, got {value}"
                )));
            }
        }

        Ok(Self {
            text,
            voice_id,
            model,
            settings,
        })
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    #[must_use]
    pub const fn model(&self) -> SynthesisModel {
        self.model
    }

    #[must_use]
    pub const fn settings(&self) -> VoiceSettings {
        self.settings
    }

    /// Serialize the JSON request body
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn body(&self) -> Result<Vec<u8>> {
        let body = RequestBody {
            text: &self.text,
            model_id: self.model,
            voice_settings: self.settings,
        };
        Ok(serde_json::to_vec(&body)?)
    }

    /// Encode the complete request: request line, headers, and JSON body
    ///
    /// The connection is marked `Connection: close` so the peer's close
    /// ends an unframed body.
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot be serialized or the target header
    /// values contain line breaks
    pub fn encode(&self, target: &SynthesisTarget) -> Result<Vec<u8>> {
        for (name, value) in [
            ("host", target.host.as_str()),
            ("api key", target.api_key.as_str()),
            ("accept", target.accept.as_str()),
            ("path", target.path_template.as_str()),
        ] {
            if value.contains(['\r', '\n']) {
                return Err(Error::InvalidRequest(format!("{name} contains a line break")));
            }
        }

        let path = target.path_template.replace("{voice_id}", &self.voice_id);
        let body = self.body()?;

        let head = format!(
            "POST {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Connection: close\r\n\
             xi-api-key: {key}\r\n\
             Content-Type: application/json\r\n\
             Accept: {accept}\r\n\
             Content-Length: {len}\r\n\
             \r\n",
            host = target.host,
            key = target.api_key,
            accept = target.accept,
            len = body.len(),
        );

        let mut request = Vec::with_capacity(head.len() + body.len());
        request.extend_from_slice(head.as_bytes());
        request.extend_from_slice(&body);
        Ok(request)
    }
}

/// Render a request head for logs with the API key blanked out
#[must_use]
pub fn redact_head(request: &[u8]) -> String {
    let end = request
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map_or(request.len(), |p| p + 4);

    String::from_utf8_lossy(&request[..end])
        .split("\r\n")
        .map(|line| {
            if line.to_ascii_lowercase().starts_with("xi-api-key:") {
                "xi-api-key: [REDACTED]"
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SynthesisTarget {
        SynthesisTarget {
            host: "api.elevenlabs.io".to_string(),
            port: 443,
            path_template: "/v1/text-to-speech/{voice_id}".to_string(),
            api_key: "secret-key".to_string(),
            accept: "audio/mpeg".to_string(),
        }
    }

    fn request(text: &str) -> StreamRequest {
        StreamRequest::new(
            text,
            "voice_1",
            SynthesisModel::default(),
            VoiceSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn body_has_wire_shape() {
        let body: serde_json::Value =
            serde_json::from_slice(&request("Hello").body().unwrap()).unwrap();

        assert_eq!(body["text"], "Hello");
        assert_eq!(body["model_id"], "eleven_multilingual_v2");
        assert_eq!(body["voice_settings"]["stability"], 0.5);
        assert_eq!(body["voice_settings"]["similarity_boost"], 0.75);
    }

    #[test]
    fn encode_writes_head_then_body() {
        let req = request("Hello");
        let bytes = req.encode(&target()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();

        assert!(head.starts_with("POST /v1/text-to-speech/voice_1 HTTP/1.1\r\n"));
        assert!(head.contains("\r\nHost: api.elevenlabs.io"));
        assert!(head.contains("\r\nxi-api-key: secret-key"));
        assert!(head.contains("\r\nAccept: audio/mpeg"));
        assert!(head.contains(&format!("\r\nContent-Length: {}", body.len())));
        assert_eq!(body.as_bytes(), req.body().unwrap().as_slice());
    }

    #[test]
    fn rejects_blank_text() {
        let err = StreamRequest::new(
            "  ",
            "voice",
            SynthesisModel::default(),
            VoiceSettings::default(),
        );
        assert!(matches!(err, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn rejects_unsafe_voice_id() {
        for voice in ["", "a/b", "abc\r\nX-Evil: 1", "voice id"] {
            let err = StreamRequest::new(
                "hi",
                voice,
                SynthesisModel::default(),
                VoiceSettings::default(),
            );
            assert!(matches!(err, Err(Error::InvalidRequest(_))), "{voice:?} accepted");
        }
    }

    #[test]
    fn rejects_out_of_range_settings() {
        let settings = VoiceSettings {
            stability: 1.5,
            similarity_boost: 0.75,
        };
        let err = StreamRequest::new("hi", "voice", SynthesisModel::default(), settings);
        assert!(matches!(err, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn model_allow_list() {
        assert_eq!(
            "eleven_turbo_v2_5".parse::<SynthesisModel>().unwrap(),
            SynthesisModel::ElevenTurboV25
        );
        assert!("gpt-4o".parse::<SynthesisModel>().is_err());
        for model in SynthesisModel::ALL {
            assert_eq!(model.as_str().parse::<SynthesisModel>().unwrap(), model);
        }
    }

    #[test]
    fn redacted_head_hides_key() {
        let bytes = request("Hello").encode(&target()).unwrap();
        let logged = redact_head(&bytes);

        assert!(!logged.contains("secret-key"));
        assert!(logged.contains("xi-api-key: [REDACTED]"));
        assert!(!logged.contains("\"text\""));
    }
}
