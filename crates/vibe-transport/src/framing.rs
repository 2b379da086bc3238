//! Record framing for the streaming transport.
//!
//! The response body is an append-only sequence of records:
//!
//! ```text
//! data: <payload>\n\n
//! ```
//!
//! Chunk boundaries fall anywhere, including inside a separator or a
//! multi-byte character, so the decoder keeps the unterminated tail and
//! only decodes a record once its separator has arrived.

use vibe_protocol::ProtocolError;

const SEPARATOR: &[u8] = b"\n\n";
const PREFIX: &str = "data: ";

/// Incremental decoder for `data: ...\n\n` records.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    /// Bytes after the last complete record.
    buffer: Vec<u8>,
    /// Set once the first non-whitespace byte has been seen.
    started: bool,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the records it completed, in order.
    ///
    /// Each record decodes on its own, so a malformed record does not take
    /// the well-formed ones around it down with it. Whitespace preceding the
    /// first record is padding some peers send to defeat intermediary
    /// buffering; it is skipped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<String, ProtocolError>> {
        let chunk = if self.started {
            chunk
        } else {
            let trimmed = chunk.trim_ascii_start();
            if trimmed.is_empty() {
                return Vec::new();
            }
            self.started = true;
            trimmed
        };
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut consumed = 0;
        while let Some(end) = find(&self.buffer[consumed..], SEPARATOR) {
            records.push(decode_record(&self.buffer[consumed..consumed + end]));
            consumed += end + SEPARATOR.len();
        }
        self.buffer.drain(..consumed);
        records
    }

    /// Bytes held back waiting for a separator.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

fn decode_record(segment: &[u8]) -> Result<String, ProtocolError> {
    let text = String::from_utf8(segment.to_vec())?;
    match text.strip_prefix(PREFIX) {
        Some(payload) => Ok(payload.to_string()),
        None => Err(ProtocolError::MalformedRecord(text)),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
