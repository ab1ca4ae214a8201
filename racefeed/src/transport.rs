//! Event-stream transport framing.
//!
//! The stream endpoint is a one-way, persistent, text push channel. Each event
//! is a single JSON payload framed as
//!
//! ```text
//! data: <json-body>\n
//! \n
//! ```
//!
//! The framing and content type are fixed when the connection opens and are
//! never renegotiated. This module owns both directions: [`encode_event`] for
//! the server and [`FrameDecoder`] for the consumer, which reassembles frames
//! from arbitrarily split network chunks.
//!
//! # Payloads
//!
//! A payload is either a JSON array of races (zero or one element) or the
//! error sentinel `{"error":true}`, see [`StreamEvent`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Race;

/// Content type announced by the stream endpoint.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Default upper bound on a single buffered frame (16 MiB).
/// `error` value of the one-shot endpoint's 404 body when no race exists.
pub const NO_RACE_MESSAGE: &str = "no race found";

pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const DATA_FIELD: &str = "data";

/// Errors produced while framing or decoding events.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The payload could not be serialized.
    #[error("Failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is not a valid event.
    #[error("Failed to decode event: {0}")]
    Decode(#[source] serde_json::Error),

    /// The frame bytes are not UTF-8.
    #[error("Event frame is not valid UTF-8")]
    InvalidUtf8,

    /// A frame grew beyond the configured limit without terminating.
    #[error("Event frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// The body of one pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// Result of one successful store read.
    Races(Vec<Race>),
    /// The store read for this cycle failed.
    Error(ErrorSentinel),
}

/// Body of the error sentinel event, always `{"error": true}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSentinel {
    pub error: bool,
}

impl StreamEvent {
    /// The sentinel pushed when a poll cycle fails.
    pub fn error() -> Self {
        StreamEvent::Error(ErrorSentinel { error: true })
    }

    /// Build a race-list event from an optional race.
    pub fn from_race(race: Option<Race>) -> Self {
        StreamEvent::Races(race.into_iter().collect())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error(_))
    }

    /// Serialize to the JSON body carried by a frame.
    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(TransportError::Encode)
    }

    /// Parse a frame body.
    ///
    /// `{"error": false}` is not a meaningful event and is rejected.
    pub fn from_json(body: &str) -> Result<Self, TransportError> {
        let event: StreamEvent = serde_json::from_str(body).map_err(TransportError::Decode)?;
        match event {
            StreamEvent::Error(ErrorSentinel { error: false }) => {
                Err(TransportError::Decode(serde::de::Error::custom(
                    "error sentinel must be true",
                )))
            }
            other => Ok(other),
        }
    }
}

/// Frame a JSON body as one event.
///
/// A body containing newlines is split across several `data:` lines, which the
/// decoder joins back with `\n`.
pub fn frame(body: &str) -> Bytes {
    let mut out = String::with_capacity(body.len() + 8);
    for line in body.split('\n') {
        out.push_str(DATA_FIELD);
        out.push_str(": ");
        out.push_str(line.strip_suffix('\r').unwrap_or(line));
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

/// Serialize and frame one event.
pub fn encode_event(event: &StreamEvent) -> Result<Bytes, TransportError> {
    Ok(frame(&event.to_json()?))
}

/// Incremental decoder for the event-stream framing.
///
/// Feed it raw chunks as they arrive with [`FrameDecoder::feed`] and drain
/// complete frame bodies with [`FrameDecoder::next_frame`]. Comment lines
/// (starting with `:`) and fields other than `data` are ignored. Lines end
/// with `\n` or `\r\n`.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Start of the first unconsumed line in `buffer`.
    cursor: usize,
    data: Option<String>,
    /// Set after a bad line until the end of its frame.
    discarding: bool,
    max_frame_bytes: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            data: None,
            discarding: false,
            max_frame_bytes,
        }
    }

    /// Append a chunk of received bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes buffered for the frame currently being assembled.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len() - self.cursor + self.data.as_ref().map_or(0, String::len)
    }

    /// Return the next complete frame body, if one is available.
    ///
    /// An error discards the offending frame so that decoding can continue
    /// with the next one.
    pub fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let rest = &self.buffer[self.cursor..];
            let Some(newline) = rest.iter().position(|b| *b == b'\n') else {
                let size = self.pending_bytes();
                if size > self.max_frame_bytes {
                    self.reset();
                    return Some(Err(TransportError::FrameTooLarge {
                        size,
                        max: self.max_frame_bytes,
                    }));
                }
                return None;
            };

            let raw = &rest[..newline];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let blank = raw.is_empty();
            let decoded = if blank || self.discarding {
                None
            } else {
                Some(std::str::from_utf8(raw).map(str::to_owned))
            };
            self.cursor += newline + 1;

            if blank {
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                if let Some(body) = self.data.take() {
                    return Some(Ok(body));
                }
                continue;
            }

            match decoded {
                Some(Ok(line)) => self.process_line(&line),
                Some(Err(_)) => {
                    self.data = None;
                    self.discarding = true;
                    return Some(Err(TransportError::InvalidUtf8));
                }
                None => {}
            }
        }
    }

    fn process_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field != DATA_FIELD {
            return;
        }
        match self.data.as_mut() {
            Some(data) => {
                data.push('\n');
                data.push_str(value);
            }
            None => self.data = Some(value.to_string()),
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.data = None;
        self.discarding = false;
    }
}
