//! Incremental NDJSON stream parser.
//!
//! Agent output arrives in arbitrary byte chunks. [`StreamParser`] keeps the
//! trailing partial line between calls and lets [`AcpCodec`] turn every
//! complete line into a [`Document`]. Malformed lines are logged and dropped;
//! they never abort the stream.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use super::codec::AcpCodec;
use super::jsonrpc::Document;

/// Carry-over buffer plus line codec.
#[derive(Debug, Default)]
pub struct StreamParser {
    codec: AcpCodec,
    buffer: BytesMut,
}

impl StreamParser {
    /// Create an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every document completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Document> {
        self.buffer.extend_from_slice(chunk);
        let mut documents = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(document)) => documents.push(document),
                Ok(None) => break,
                Err(err) => warn!(%err, "discarding undecodable agent output line"),
            }
        }
        documents
    }

    /// Bytes held for the incomplete trailing line.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any buffered partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.codec = AcpCodec::new();
    }
}

/// Parse and classify one line; `None` for blank, malformed or unhandled lines.
#[must_use]
pub fn parse_line(line: &str) -> Option<Document> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, line = %preview(trimmed), "failed to parse agent output line");
            return None;
        }
    };

    match Document::classify(value) {
        Ok(Some(document)) => Some(document),
        Ok(None) => {
            debug!(line = %preview(trimmed), "ignoring unclassified agent document");
            None
        }
        Err(err) => {
            warn!(%err, line = %preview(trimmed), "malformed agent document");
            None
        }
    }
}

/// First 200 characters of a line for log output.
fn preview(line: &str) -> &str {
    match line.char_indices().nth(200) {
        Some((index, _)) => &line[..index],
        None => line,
    }
}
