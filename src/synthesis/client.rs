//! Streaming synthesis client

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::Instrument;

use super::parser::{ResponseHead, ResponseParser};
use super::request::{StreamRequest, SynthesisTarget, redact_head};
use super::{SpeechStream, SpeechSynthesizer};
use crate::{Error, Result};

/// Size of a single socket read
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Cap on how much of an error body is collected
const MAX_ERROR_BODY: usize = 64 * 1024;

/// Opens the byte stream a request is sent over
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `host:port`
    ///
    /// # Errors
    ///
    /// Returns `Connection` on DNS, TCP, handshake, or timeout failure
    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream>;
}

/// TLS over TCP, verified against the webpki root set
pub struct TlsConnector {
    config: Arc<rustls::ClientConfig>,
    timeout: Duration,
}

impl TlsConnector {
    /// Create a connector with the given connect/handshake timeout
    ///
    /// # Errors
    ///
    /// Returns error if the TLS configuration cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("TLS setup failed: {e}")))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            timeout,
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = tokio_rustls::client::TlsStream<TcpStream>;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream> {
        let addr = format!("{host}:{port}");

        let tcp = timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Connection(format!("timed out connecting to {addr}")))?
            .map_err(|e| Error::Connection(format!("failed to connect to {addr}: {e}")))?;

        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(error = %e, "could not disable Nagle");
        }

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::Connection(format!("invalid server name {host}: {e}")))?;

        let tls = timeout(
            self.timeout,
            tokio_rustls::TlsConnector::from(self.config.clone()).connect(server_name, tcp),
        )
        .await
        .map_err(|_| Error::Connection(format!("TLS handshake with {host} timed out")))?
        .map_err(|e| Error::Connection(format!("TLS handshake with {host} failed: {e}")))?;

        Ok(tls)
    }
}

/// Sends one synthesis request per connection and streams the audio back
pub struct StreamingSpeechClient<C: Connector = TlsConnector> {
    connector: C,
    target: SynthesisTarget,
    timeout: Duration,
    span: tracing::Span,
}

impl StreamingSpeechClient<TlsConnector> {
    /// Create a client that talks TLS to `target`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or TLS cannot be configured
    pub fn new(target: SynthesisTarget, timeout: Duration) -> Result<Self> {
        if target.api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }
        Ok(Self::with_connector(TlsConnector::new(timeout)?, target, timeout))
    }
}

impl<C: Connector> StreamingSpeechClient<C> {
    /// Create a client over an arbitrary connector
    pub fn with_connector(connector: C, target: SynthesisTarget, timeout: Duration) -> Self {
        let span = tracing::info_span!("tts", host = %target.host);
        Self {
            connector,
            target,
            timeout,
            span,
        }
    }

    /// Log socket events inside `span` instead of the default one
    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Send `request` and wait for the response head
    ///
    /// On success the returned stream yields the body, starting with any
    /// bytes that arrived together with the head.
    ///
    /// # Errors
    ///
    /// - `Connection` if connecting or sending the request fails
    /// - `Protocol` if the status line or header block is malformed or the
    ///   peer closes before the head is complete
    /// - `RemoteApi` if the status is not 2xx, with the error detail from
    ///   the body
    /// - `Io` if a read fails or times out while waiting for the head
    pub async fn open(&self, request: &StreamRequest) -> Result<AudioStream<C::Stream>> {
        let span = self.span.clone();
        async move {
            let payload = request.encode(&self.target)?;

            tracing::debug!(port = self.target.port, voice = request.voice_id(), "connecting");
            let mut io = self
                .connector
                .connect(&self.target.host, self.target.port)
                .await?;
            tracing::debug!("connected");

            tracing::trace!(request = %redact_head(&payload), "sending request");
            let sent = timeout(self.timeout, async {
                io.write_all(&payload).await?;
                io.flush().await
            })
            .await;
            match sent {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(Error::Connection(format!("failed to send request: {e}"))),
                Err(_) => return Err(Error::Connection("timed out sending request".to_string())),
            }

            let mut stream = AudioStream::new(io, self.timeout, self.span.clone());
            let head = stream.read_head().await?;
            tracing::debug!(status = head.status, headers = ?head.headers, "response head");

            if !head.is_success() {
                let body = stream.drain_error_body().await;
                let message = error_message(head.status, &body);
                tracing::warn!(status = head.status, message = %message, "synthesis rejected");
                return Err(Error::RemoteApi {
                    status: head.status,
                    message,
                });
            }

            Ok(stream)
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<C: Connector> SpeechSynthesizer for StreamingSpeechClient<C> {
    async fn stream(&self, request: &StreamRequest) -> Result<Box<dyn SpeechStream>> {
        Ok(Box::new(self.open(request).await?))
    }
}

/// Live body of one synthesis response
///
/// Owns the socket; it is closed when the body ends, on the first error, or
/// when the stream is dropped.
pub struct AudioStream<S> {
    io: Option<S>,
    parser: ResponseParser,
    pending: Vec<u8>,
    read_buf: Box<[u8]>,
    timeout: Duration,
    span: tracing::Span,
    finished: bool,
    chunks: u64,
    bytes: u64,
}

impl<S: AsyncRead + Unpin + Send> AudioStream<S> {
    fn new(io: S, timeout: Duration, span: tracing::Span) -> Self {
        Self {
            io: Some(io),
            parser: ResponseParser::new(),
            pending: Vec::new(),
            read_buf: vec![0; READ_BUFFER_SIZE].into_boxed_slice(),
            timeout,
            span,
            finished: false,
            chunks: 0,
            bytes: 0,
        }
    }

    /// Response status line and headers
    #[must_use]
    pub const fn head(&self) -> Option<&ResponseHead> {
        self.parser.head()
    }

    /// Next body chunk, `None` once the body has ended
    ///
    /// # Errors
    ///
    /// Returns `Io` on a failed or timed-out read or a truncated framed
    /// body, `Protocol` on broken chunk framing
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let span = self.span.clone();
        self.next_chunk_inner().instrument(span).await
    }

    async fn next_chunk_inner(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if !self.pending.is_empty() {
                let chunk = std::mem::take(&mut self.pending);
                self.chunks += 1;
                self.bytes += chunk.len() as u64;
                tracing::trace!(len = chunk.len(), "audio chunk");
                return Ok(Some(chunk));
            }

            if self.parser.is_done() {
                self.end_of_stream();
                return Ok(None);
            }

            let n = match self.read_some().await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, chunks = self.chunks, "read failed mid-stream");
                    self.fail();
                    return Err(e);
                }
            };

            if n == 0 {
                if let Err(e) = self.parser.finish() {
                    tracing::warn!(error = %e, chunks = self.chunks, "body ended early");
                    self.fail();
                    return Err(e);
                }
                self.end_of_stream();
                return Ok(None);
            }

            match self.parser.push(&self.read_buf[..n]) {
                Ok(body) => self.pending = body,
                Err(e) => {
                    self.fail();
                    return Err(e);
                }
            }
        }
    }

    /// Read until the response head is parsed, stashing early body bytes
    async fn read_head(&mut self) -> Result<ResponseHead> {
        while self.parser.head().is_none() {
            let n = self.read_some().await?;
            if n == 0 {
                self.close();
                self.parser.finish()?;
                return Err(Error::Protocol(
                    "connection closed before end of header block".to_string(),
                ));
            }
            let body = self.parser.push(&self.read_buf[..n]).inspect_err(|_| self.close())?;
            self.pending.extend_from_slice(&body);
        }
        self.parser
            .head()
            .cloned()
            .ok_or_else(|| Error::Protocol("missing response head".to_string()))
    }

    /// Collect what is left of an error response, best effort
    async fn drain_error_body(&mut self) -> Vec<u8> {
        let mut body = std::mem::take(&mut self.pending);

        while !self.parser.is_done() && body.len() < MAX_ERROR_BODY {
            match self.read_some().await {
                Ok(0) => {
                    if let Err(e) = self.parser.finish() {
                        tracing::debug!(error = %e, "error body incomplete");
                    }
                    break;
                }
                Ok(n) => match self.parser.push(&self.read_buf[..n]) {
                    Ok(more) => body.extend_from_slice(&more),
                    Err(e) => {
                        tracing::debug!(error = %e, "error body framing broken");
                        break;
                    }
                },
                Err(e) => {
                    tracing::debug!(error = %e, "error body read failed");
                    break;
                }
            }
        }

        self.fail();
        body
    }

    /// One bounded read; `Ok(0)` on end of stream or once closed
    async fn read_some(&mut self) -> Result<usize> {
        let Some(io) = self.io.as_mut() else {
            return Ok(0);
        };

        let result = timeout(self.timeout, io.read(&mut self.read_buf)).await;
        match result {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => {
                self.close();
                Err(Error::Io(e))
            }
            Err(_) => {
                self.close();
                Err(Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("socket read timed out after {:?}", self.timeout),
                )))
            }
        }
    }

    fn end_of_stream(&mut self) {
        if !self.finished {
            tracing::debug!(chunks = self.chunks, bytes = self.bytes, "stream complete");
        }
        self.fail();
    }

    fn fail(&mut self) {
        self.close();
        self.finished = true;
    }

    fn close(&mut self) {
        if self.io.take().is_some() {
            tracing::trace!("socket closed");
        }
    }
}

#[async_trait]
impl<S: AsyncRead + Unpin + Send> SpeechStream for AudioStream<S> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Self::next_chunk(self).await
    }
}

/// Human-readable message from an error body
///
/// Understands `{"detail": "..."}` and `{"detail": {"message": "..."}}`,
/// falling back to the raw body text.
pub(crate) fn error_message(status: u16, body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: serde_json::Value,
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return format!("HTTP error {status}");
    }

    match serde_json::from_str::<ErrorBody>(text) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(message),
        }) => message,
        Ok(ErrorBody { detail }) => detail
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| detail.to_string(), ToString::to_string),
        Err(_) => text.to_string(),
    }
}
