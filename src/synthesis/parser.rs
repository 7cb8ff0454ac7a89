//! Incremental HTTP/1.1 response parser
//!
//! Sans-IO state machine fed with whatever each socket read returned:
//!
//! ```text
//! AwaitingStatusLine ──▶ AwaitingHeaders ──▶ StreamingBody ──▶ Done
//!          │                    │                  │
//!          └────────────────────┴──────────────────┴──▶ error
//! ```
//!
//! The header/body boundary is found no matter how the head is split across
//! reads. Body bytes that arrive in the same read as the end of the head are
//! returned, never dropped. `Content-Length` and chunked bodies end cleanly
//! on their own framing; anything else ends when the peer closes.

use std::collections::HashMap;
use std::io;
use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

/// Largest header block accepted before giving up on finding its end
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Longest chunk-size or trailer line accepted in a chunked body
const MAX_CHUNK_LINE: usize = 4096;

static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^HTTP/\d\.\d (\d{3})(?: (.*))?$").expect("valid regex")
});

/// Where the parser is in the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitingStatusLine,
    AwaitingHeaders,
    StreamingBody,
    Done,
}

/// Status line and headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    /// Header keys as sent by the peer; use [`ResponseHead::header`] for lookups
    pub headers: HashMap<String, String>,
}

impl ResponseHead {
    /// Case-insensitive header lookup
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the status is in the 2xx range
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// How the body is delimited
#[derive(Debug)]
enum Framing {
    /// Peer close ends the body
    UntilClose,
    Length { remaining: u64 },
    Chunked(ChunkedDecoder),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: u64 },
    DataEnd,
    Trailers,
    Done,
}

/// Decoder for `Transfer-Encoding: chunked` bodies
#[derive(Debug)]
struct ChunkedDecoder {
    state: ChunkState,
    line: Vec<u8>,
}

impl ChunkedDecoder {
    const fn new() -> Self {
        Self {
            state: ChunkState::Size,
            line: Vec::new(),
        }
    }

    /// Consume bytes up to and including the next `\n`, returning the line
    /// without its terminator once complete
    fn take_line(&mut self, input: &[u8], pos: &mut usize) -> Result<Option<Vec<u8>>> {
        while *pos < input.len() {
            let b = input[*pos];
            *pos += 1;
            if b == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            self.line.push(b);
            if self.line.len() > MAX_CHUNK_LINE {
                return Err(Error::Protocol("chunk line too long".to_string()));
            }
        }
        Ok(None)
    }

    fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let mut pos = 0;
        while pos < input.len() {
            match self.state {
                ChunkState::Size => {
                    let Some(line) = self.take_line(input, &mut pos)? else {
                        break;
                    };
                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data { remaining: size }
                    };
                }
                ChunkState::Data { remaining } => {
                    let available = input.len() - pos;
                    let take = usize::try_from(remaining).map_or(available, |r| r.min(available));
                    out.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data { remaining: left }
                    };
                }
                ChunkState::DataEnd => {
                    let Some(line) = self.take_line(input, &mut pos)? else {
                        break;
                    };
                    if !line.is_empty() {
                        return Err(Error::Protocol(
                            "chunk data not followed by CRLF".to_string(),
                        ));
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(line) = self.take_line(input, &mut pos)? else {
                        break;
                    };
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => break,
            }
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let text = String::from_utf8_lossy(line);
    let digits = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(digits, 16)
        .map_err(|_| Error::Protocol(format!("invalid chunk size line: {text:?}")))
}

/// Incremental response parser for one exchange
#[derive(Debug)]
pub struct ResponseParser {
    state: ParseState,
    buffer: Vec<u8>,
    cursor: usize,
    status: Option<(u16, String)>,
    headers: HashMap<String, String>,
    head: Option<ResponseHead>,
    framing: Option<Framing>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ParseState::AwaitingStatusLine,
            buffer: Vec::new(),
            cursor: 0,
            status: None,
            headers: HashMap::new(),
            head: None,
            framing: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ParseState {
        self.state
    }

    /// Status line and headers, available once the blank line was seen
    #[must_use]
    pub const fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == ParseState::Done
    }

    /// Feed the bytes of one read, returning any body bytes they completed
    ///
    /// Bytes arriving after a framed body has ended are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for a malformed status line, header line, or chunk
    /// framing, or when the header block outgrows [`MAX_HEAD_BYTES`]
    pub fn push(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        match self.state {
            ParseState::Done => return Ok(Vec::new()),
            ParseState::StreamingBody => {
                let mut out = Vec::with_capacity(input.len());
                self.decode_body(input, &mut out)?;
                return Ok(out);
            }
            ParseState::AwaitingStatusLine | ParseState::AwaitingHeaders => {}
        }

        self.buffer.extend_from_slice(input);

        while !matches!(self.state, ParseState::StreamingBody | ParseState::Done) {
            let Some(offset) = find_crlf(&self.buffer[self.cursor..]) else {
                if self.buffer.len() > MAX_HEAD_BYTES {
                    return Err(Error::Protocol(format!(
                        "header block exceeds {MAX_HEAD_BYTES} bytes"
                    )));
                }
                return Ok(Vec::new());
            };

            let line = String::from_utf8_lossy(&self.buffer[self.cursor..self.cursor + offset])
                .into_owned();
            self.cursor += offset + 2;
            if self.cursor > MAX_HEAD_BYTES {
                return Err(Error::Protocol(format!(
                    "header block exceeds {MAX_HEAD_BYTES} bytes"
                )));
            }

            match self.state {
                ParseState::AwaitingStatusLine => {
                    self.status = Some(parse_status_line(&line)?);
                    self.state = ParseState::AwaitingHeaders;
                }
                ParseState::AwaitingHeaders if line.is_empty() => self.complete_head()?,
                ParseState::AwaitingHeaders => {
                    let (key, value) = line.split_once(':').ok_or_else(|| {
                        Error::Protocol(format!("malformed header line: {line:?}"))
                    })?;
                    let key = key.trim();
                    if key.is_empty() {
                        return Err(Error::Protocol(format!("empty header name: {line:?}")));
                    }
                    self.headers.insert(key.to_string(), value.trim().to_string());
                }
                ParseState::StreamingBody | ParseState::Done => unreachable!(),
            }
        }

        let rest = self.buffer.split_off(self.cursor);
        self.buffer = Vec::new();
        self.cursor = 0;

        let mut out = Vec::with_capacity(rest.len());
        if self.state == ParseState::StreamingBody {
            self.decode_body(&rest, &mut out)?;
        }
        Ok(out)
    }

    /// Signal that the peer closed the connection
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the header block never terminated, or an
    /// `UnexpectedEof` IO error if a framed body is incomplete
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            ParseState::AwaitingStatusLine | ParseState::AwaitingHeaders => Err(Error::Protocol(
                "connection closed before end of header block".to_string(),
            )),
            ParseState::Done => Ok(()),
            ParseState::StreamingBody => match &self.framing {
                Some(Framing::Length { remaining }) => Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("body truncated, {remaining} bytes missing"),
                ))),
                Some(Framing::Chunked(_)) => Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "chunked body ended without terminal chunk",
                ))),
                Some(Framing::UntilClose) | None => {
                    self.state = ParseState::Done;
                    Ok(())
                }
            },
        }
    }

    fn complete_head(&mut self) -> Result<()> {
        let (status, reason) = self
            .status
            .take()
            .ok_or_else(|| Error::Protocol("missing status line".to_string()))?;
        let headers = std::mem::take(&mut self.headers);

        // Interim responses carry no body; the real one follows
        if (100..200).contains(&status) && status != 101 {
            tracing::trace!(status, "skipping interim response");
            self.state = ParseState::AwaitingStatusLine;
            return Ok(());
        }

        let head = ResponseHead {
            status,
            reason,
            headers,
        };

        let framing = if status == 204 || status == 304 {
            Framing::Length { remaining: 0 }
        } else if head
            .header("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().trim_end().ends_with("chunked"))
        {
            Framing::Chunked(ChunkedDecoder::new())
        } else if let Some(len) = head.header("content-length") {
            let remaining = len
                .parse()
                .map_err(|_| Error::Protocol(format!("invalid content-length: {len:?}")))?;
            Framing::Length { remaining }
        } else {
            Framing::UntilClose
        };

        self.state = match framing {
            Framing::Length { remaining: 0 } => ParseState::Done,
            _ => ParseState::StreamingBody,
        };
        self.framing = Some(framing);
        self.head = Some(head);
        Ok(())
    }

    fn decode_body(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let done = match &mut self.framing {
            Some(Framing::UntilClose) | None => {
                out.extend_from_slice(input);
                false
            }
            Some(Framing::Length { remaining }) => {
                let take = usize::try_from(*remaining).map_or(input.len(), |r| r.min(input.len()));
                out.extend_from_slice(&input[..take]);
                *remaining -= take as u64;
                *remaining == 0
            }
            Some(Framing::Chunked(decoder)) => {
                decoder.decode(input, out)?;
                decoder.is_done()
            }
        };
        if done {
            self.state = ParseState::Done;
        }
        Ok(())
    }
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
    haystack.windows(2).position(|w| w == b"\r\n")
}

fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let caps = STATUS_LINE
        .captures(line)
        .ok_or_else(|| Error::Protocol(format!("malformed status line: {line:?}")))?;
    let status = caps[1]
        .parse()
        .map_err(|_| Error::Protocol(format!("malformed status code: {line:?}")))?;
    let reason = caps.get(2).map_or("", |m| m.as_str()).to_string();
    Ok((status, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `input` split at the given offsets, collecting body bytes
    fn feed_split(parser: &mut ResponseParser, input: &[u8], splits: &[usize]) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut start = 0;
        for &end in splits.iter().chain(std::iter::once(&input.len())) {
            body.extend(parser.push(&input[start..end])?);
            start = end;
        }
        Ok(body)
    }

    // ---- head parsing ----

    #[test]
    fn single_read_head_and_body() {
        let mut parser = ResponseParser::new();
        let body = parser
            .push(b"HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\n\r\nabc")
            .unwrap();

        let head = parser.head().unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.reason, "OK");
        assert_eq!(head.header("content-type"), Some("audio/mpeg"));
        assert_eq!(body, b"abc");
        assert_eq!(parser.state(), ParseState::StreamingBody);
    }

    #[test]
    fn head_split_byte_by_byte() {
        let input = b"HTTP/1.1 200 OK\r\nX-Request-Id: 7\r\n\r\nab";
        let mut parser = ResponseParser::new();
        let mut body = Vec::new();

        for (i, byte) in input.iter().enumerate() {
            body.extend(parser.push(std::slice::from_ref(byte)).unwrap());
            let boundary = input.len() - 2;
            assert_eq!(parser.head().is_some(), i + 1 >= boundary, "at byte {i}");
        }

        assert_eq!(parser.head().unwrap().header("X-Request-Id"), Some("7"));
        assert_eq!(body, b"ab");
    }

    #[test]
    fn head_split_inside_terminator() {
        let input = b"HTTP/1.1 200 OK\r\nA: 1\r\n\r\nxyz";
        let terminator = input.windows(4).position(|w| w == b"\r\n\r\n").unwrap();

        for split in terminator..=terminator + 4 {
            let mut parser = ResponseParser::new();
            let body = feed_split(&mut parser, input, &[split]).unwrap();
            assert_eq!(parser.head().unwrap().status, 200, "split at {split}");
            assert_eq!(body, b"xyz", "split at {split}");
        }
    }

    #[test]
    fn header_value_keeps_later_colons() {
        let mut parser = ResponseParser::new();
        parser
            .push(b"HTTP/1.1 200 OK\r\nLocation: https://example.com:8443/x\r\n\r\n")
            .unwrap();
        assert_eq!(
            parser.head().unwrap().header("location"),
            Some("https://example.com:8443/x")
        );
    }

    #[test]
    fn malformed_status_line_is_protocol_error() {
        for line in [
            "HTTP/1.1 OK\r\n",
            "ICY 200 OK\r\n",
            "HTTP/1.1 20 OK\r\n",
            "garbage\r\n",
        ] {
            let mut parser = ResponseParser::new();
            let err = parser.push(line.as_bytes());
            assert!(matches!(err, Err(Error::Protocol(_))), "{line:?} accepted");
        }
    }

    #[test]
    fn header_without_colon_is_protocol_error() {
        let mut parser = ResponseParser::new();
        let err = parser.push(b"HTTP/1.1 200 OK\r\nnot a header\r\n\r\n");
        assert!(matches!(err, Err(Error::Protocol(_))));
    }

    #[test]
    fn close_before_blank_line_is_protocol_error() {
        let mut parser = ResponseParser::new();
        parser.push(b"HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\n").unwrap();
        assert!(matches!(parser.finish(), Err(Error::Protocol(_))));

        let mut parser = ResponseParser::new();
        assert!(matches!(parser.finish(), Err(Error::Protocol(_))));
    }

    #[test]
    fn oversized_head_is_protocol_error() {
        let mut parser = ResponseParser::new();
        parser.push(b"HTTP/1.1 200 OK\r\n").unwrap();
        let filler = vec![b'a'; MAX_HEAD_BYTES + 1];
        assert!(matches!(parser.push(&filler), Err(Error::Protocol(_))));
    }

    #[test]
    fn interim_response_is_skipped() {
        let mut parser = ResponseParser::new();
        let body = parser
            .push(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n\r\nabc")
            .unwrap();
        assert_eq!(parser.head().unwrap().status, 200);
        assert_eq!(body, b"abc");
    }

    // ---- body framing ----

    #[test]
    fn unframed_body_ends_on_close() {
        let mut parser = ResponseParser::new();
        assert!(parser.push(b"HTTP/1.1 200 OK\r\n\r\n").unwrap().is_empty());
        assert_eq!(parser.push(b"ab").unwrap(), b"ab");
        assert_eq!(parser.push(b"c").unwrap(), b"c");
        parser.finish().unwrap();
        assert!(parser.is_done());
    }

    #[test]
    fn empty_body_after_success() {
        let mut parser = ResponseParser::new();
        assert!(parser.push(b"HTTP/1.1 200 OK\r\n\r\n").unwrap().is_empty());
        parser.finish().unwrap();
        assert!(parser.is_done());
    }

    #[test]
    fn content_length_stops_at_declared_size() {
        let mut parser = ResponseParser::new();
        let body = parser
            .push(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nab")
            .unwrap();
        assert_eq!(body, b"ab");
        assert!(!parser.is_done());

        assert_eq!(parser.push(b"cdef").unwrap(), b"c");
        assert!(parser.is_done());
        assert!(parser.push(b"more").unwrap().is_empty());
        parser.finish().unwrap();
    }

    #[test]
    fn content_length_zero_is_done_immediately() {
        let mut parser = ResponseParser::new();
        parser.push(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert!(parser.is_done());
    }

    #[test]
    fn truncated_content_length_is_io_error() {
        let mut parser = ResponseParser::new();
        parser
            .push(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .unwrap();
        match parser.finish() {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_content_length_is_protocol_error() {
        let mut parser = ResponseParser::new();
        let err = parser.push(b"HTTP/1.1 200 OK\r\nContent-Length: lots\r\n\r\n");
        assert!(matches!(err, Err(Error::Protocol(_))));
    }

    #[test]
    fn chunked_body_decodes_across_every_split() {
        let input: &[u8] = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
            2\r\nab\r\n1;name=v\r\nc\r\n0\r\nX-Trailer: t\r\n\r\n";

        for split in 0..input.len() {
            let mut parser = ResponseParser::new();
            let body = feed_split(&mut parser, input, &[split]).unwrap();
            assert_eq!(body, b"abc", "split at {split}");
            assert!(parser.is_done(), "split at {split}");
        }
    }

    #[test]
    fn chunked_framing_is_not_forwarded() {
        let mut parser = ResponseParser::new();
        let body = parser
            .push(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\na\r\n0123456789\r\n")
            .unwrap();
        assert_eq!(body, b"0123456789");
        assert!(matches!(parser.finish(), Err(Error::Io(_))));
    }

    #[test]
    fn bad_chunk_size_is_protocol_error() {
        let mut parser = ResponseParser::new();
        let err = parser.push(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n");
        assert!(matches!(err, Err(Error::Protocol(_))));
    }

    #[test]
    fn error_status_is_parsed_with_body() {
        let mut parser = ResponseParser::new();
        let body = parser
            .push(
                b"HTTP/1.1 429 Too Many Requests\r\n\
                  Content-Type: application/json\r\n\r\n{\"detail\":",
            )
            .unwrap();
        let head = parser.head().unwrap();
        assert_eq!(head.status, 429);
        assert!(!head.is_success());
        assert_eq!(body, b"{\"detail\":");
    }
}
