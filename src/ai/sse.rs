//! Line decoder for streamed chat completions.
//!
//! The body arrives as arbitrary byte chunks. This module turns them into
//! typed frames while handling:
//! - UTF-8 sequences split across chunks, and bytes that are not UTF-8 at all
//! - Lines split across chunks
//! - Multiple frames in one read
//! - Malformed lines (reported, never fatal)
//!
//! Each line is one frame, optionally prefixed with `data: `. The stream ends
//! with a `[DONE]` frame.

use serde_json::Value;

use tracing::warn;

use crate::core::models::StreamEvent;

const DONE_SENTINEL: &str = "[DONE]";

/// A line that could not be decoded into a [`StreamEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedFrame {
    /// The payload after prefix stripping.
    pub line: String,
    pub reason: String,
}

/// Result of decoding one line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    Event(StreamEvent),
    /// The `[DONE]` sentinel.
    Done,
    /// The server put an error object in the stream.
    ApiError {
        message: String,
        kind: Option<String>,
    },
    Malformed(MalformedFrame),
}

/// Stateful decoder that carries partial UTF-8 sequences and partial lines
/// over to the next chunk.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes of an incomplete trailing UTF-8 sequence.
    utf8_buffer: Vec<u8>,
    /// Decoded text after the last newline.
    buffer: String,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a byte chunk to text, holding back an incomplete trailing
    /// UTF-8 sequence until the next call. Bytes that can never be valid
    /// UTF-8 are replaced with U+FFFD so only the line carrying them is
    /// affected.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.utf8_buffer.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.utf8_buffer.len());
        let mut consumed = 0;
        let mut replaced = 0usize;

        loop {
            match std::str::from_utf8(&self.utf8_buffer[consumed..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.utf8_buffer.len();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    let valid = &self.utf8_buffer[consumed..consumed + valid_up_to];
                    text.push_str(&String::from_utf8_lossy(valid));
                    consumed += valid_up_to;

                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed += len;
                            replaced += 1;
                        }
                        // Incomplete trailing sequence; keep it for the next chunk.
                        None => break,
                    }
                }
            }
        }

        if replaced > 0 {
            warn!(replaced, "Replaced invalid UTF-8 in response body");
        }
        self.utf8_buffer.drain(..consumed);
        text
    }

    /// Feeds decoded text and returns results for every line it completes.
    pub fn feed(&mut self, text: &str) -> Vec<ParseResult> {
        self.buffer.push_str(text);
        let mut results = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(result) = parse_line(&line) {
                results.push(result);
            }
        }

        results
    }

    /// Decodes and feeds one raw chunk.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<ParseResult> {
        let text = self.decode(bytes);
        self.feed(&text)
    }

    /// Flushes whatever is left once the body has ended. A final line without
    /// a trailing newline is still decoded; a body that ends inside a UTF-8
    /// sequence leaves a U+FFFD in that line.
    pub fn finish(&mut self) -> Vec<ParseResult> {
        if !self.utf8_buffer.is_empty() {
            warn!(
                dangling = self.utf8_buffer.len(),
                "Response body ended inside a UTF-8 sequence"
            );
            self.utf8_buffer.clear();
            self.buffer.push(char::REPLACEMENT_CHARACTER);
        }

        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest).into_iter().collect()
    }

    /// Text held back waiting for a newline.
    #[must_use]
    pub fn remaining_buffer(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.utf8_buffer.clear();
        self.buffer.clear();
    }
}

/// Decodes one line. Returns `None` for lines that carry no frame: blanks,
/// SSE comments and non-data fields.
fn parse_line(raw: &str) -> Option<ParseResult> {
    let line = raw.trim_end_matches(['\n', '\r']);

    let payload = if let Some(data) = line.strip_prefix("data:") {
        data.strip_prefix(' ').unwrap_or(data)
    } else if line.starts_with(':')
        || line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
    {
        return None;
    } else {
        line
    };

    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(ParseResult::Done);
    }

    let json: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            return Some(ParseResult::Malformed(MalformedFrame {
                line: payload.to_string(),
                reason: e.to_string(),
            }));
        }
    };

    if let Some(error) = json.get("error") {
        return Some(ParseResult::ApiError {
            message: extract_error_message(error),
            kind: error
                .get("type")
                .or_else(|| error.get("code"))
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    match serde_json::from_value::<StreamEvent>(json) {
        Ok(event) => Some(ParseResult::Event(event)),
        Err(e) => Some(ParseResult::Malformed(MalformedFrame {
            line: payload.to_string(),
            reason: e.to_string(),
        })),
    }
}

/// Pulls a human-readable message out of an API `error` value.
pub(crate) fn extract_error_message(error: &Value) -> String {
    if let Some(msg) = error.get("message").and_then(Value::as_str) {
        return msg.to_string();
    }
    if let Some(msg) = error.as_str() {
        return msg.to_string();
    }
    "Unknown error".to_string()
}
