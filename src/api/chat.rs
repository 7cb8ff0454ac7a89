//! Voice chat endpoint: recording in, spoken reply streamed out

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use super::ApiState;
use crate::Error;
use crate::pipeline::{ChannelSink, PipelineInput, PipelineOutcome};

/// Upper bound on an uploaded recording
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Declared upload types that are accepted
pub const ALLOWED_AUDIO_TYPES: &[&str] = &[
    "video/mp4",
    "audio/wav",
    "audio/webm",
    "audio/webm;codecs=opus",
    "audio/ogg;codecs=opus",
    "audio/mp3",
    "audio/mpeg",
    "audio/ogg",
    "audio/x-wav",
    "audio/wave",
    "audio/mp4",
    "application/ogg",
    "video/webm",
    "application/octet-stream",
];

const LANGUAGE_HEADER: &str = "api-language";
const TESTMODE_HEADER: &str = "api-testmode";

/// Build chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Whether a declared content type is on the allow-list
///
/// Parameters are compared with whitespace removed; a type whose
/// parameters are not listed is still accepted if its bare type is.
#[must_use]
pub fn is_allowed_type(content_type: &str) -> bool {
    let normalized: String = content_type
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    let essence = normalized.split(';').next().unwrap_or_default();

    ALLOWED_AUDIO_TYPES
        .iter()
        .any(|allowed| *allowed == normalized || *allowed == essence)
}

struct Upload {
    audio: Vec<u8>,
    file_name: String,
}

/// Answer an uploaded recording with synthesized speech
///
/// The reply is streamed as `audio/mpeg` while it is being synthesized.
/// Failures before the first audio byte produce a JSON error; a failure
/// after that aborts the response body.
async fn chat(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ChatError> {
    let upload = read_upload(multipart).await?;

    if header_value(&headers, TESTMODE_HEADER) == Some("1") {
        tracing::debug!(bytes = upload.audio.len(), "test mode, echoing upload");
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "audio/mpeg"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=processed_audio.mp3",
                ),
            ],
            upload.audio,
        )
            .into_response());
    }

    let language = header_value(&headers, LANGUAGE_HEADER)
        .unwrap_or(&state.default_language)
        .to_string();

    let input = PipelineInput {
        audio: upload.audio,
        file_name: upload.file_name,
        language,
    };

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1);
    let orchestrator = state.orchestrator.clone();
    let run = tokio::spawn(async move {
        let mut live = ChannelSink::new(tx);
        orchestrator.run(input, &mut live).await
    });

    // Nothing was streamed, so the outcome can still pick the status code
    let Some(first) = rx.recv().await else {
        return match run.await {
            Ok(Ok(_)) => Ok(audio_response(Body::empty())),
            Ok(Err(e)) => Err(ChatError::Pipeline(e)),
            Err(e) => Err(ChatError::Internal(format!("pipeline task failed: {e}"))),
        };
    };

    let head = futures::stream::once(async move { Ok::<_, std::io::Error>(first) });
    let rest = ReceiverStream::new(rx).map(Ok::<_, std::io::Error>);
    let tail = futures::stream::once(finish(run))
        .filter_map(|result| async move { result.err().map(Err::<Vec<u8>, _>) });

    Ok(audio_response(Body::from_stream(head.chain(rest).chain(tail))))
}

/// Wait for a run whose audio is already streaming; an error aborts the body
async fn finish(run: JoinHandle<crate::Result<PipelineOutcome>>) -> std::io::Result<()> {
    match run.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            tracing::warn!(code = e.code(), error = %e, "audio stream aborted");
            Err(std::io::Error::other(e))
        }
        Err(e) => {
            tracing::error!(error = %e, "pipeline task failed");
            Err(std::io::Error::other(e))
        }
    }
}

fn audio_response(body: Body) -> Response {
    ([(header::CONTENT_TYPE, "audio/mpeg")], body).into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ChatError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ChatError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("audio") {
            continue;
        }

        if let Some(content_type) = field.content_type() {
            if !is_allowed_type(content_type) {
                return Err(ChatError::BadRequest(format!(
                    "invalid file type {content_type}; allowed types: MP3, WAV, WebM, OGG"
                )));
            }
        }

        let file_name = field
            .file_name()
            .filter(|n| !n.is_empty())
            .unwrap_or("audio.webm")
            .to_string();

        let audio = field
            .bytes()
            .await
            .map_err(|e| ChatError::BadRequest(format!("failed to read audio upload: {e}")))?;

        if audio.is_empty() {
            return Err(ChatError::BadRequest("audio upload is empty".to_string()));
        }

        tracing::debug!(bytes = audio.len(), file_name = %file_name, "received audio upload");
        return Ok(Upload {
            audio: audio.to_vec(),
            file_name,
        });
    }

    Err(ChatError::BadRequest("no audio file uploaded".to_string()))
}

/// Chat API errors
#[derive(Debug)]
pub enum ChatError {
    BadRequest(String),
    Pipeline(Error),
    Internal(String),
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Pipeline(e @ Error::Config(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, e.code(), e.to_string())
            }
            Self::Pipeline(e) => {
                tracing::warn!(code = e.code(), error = %e, "voice chat failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.code(), e.to_string())
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_matches_browser_types() {
        assert!(is_allowed_type("audio/webm"));
        assert!(is_allowed_type("audio/webm;codecs=opus"));
        assert!(is_allowed_type("audio/webm; codecs=opus"));
        assert!(is_allowed_type("Audio/MPEG"));
        assert!(is_allowed_type("audio/mp4;codecs=mp4a.40.2"));
        assert!(is_allowed_type("application/octet-stream"));
    }

    #[test]
    fn allow_list_rejects_other_types() {
        assert!(!is_allowed_type("text/plain"));
        assert!(!is_allowed_type("image/png"));
        assert!(!is_allowed_type("audio/flac"));
    }

    #[test]
    fn header_value_ignores_blank() {
        let mut headers = HeaderMap::new();
        headers.insert(LANGUAGE_HEADER, " nl ".parse().unwrap());
        headers.insert(TESTMODE_HEADER, "".parse().unwrap());

        assert_eq!(header_value(&headers, LANGUAGE_HEADER), Some("nl"));
        assert_eq!(header_value(&headers, TESTMODE_HEADER), None);
        assert_eq!(header_value(&headers, "missing"), None);
    }
}
