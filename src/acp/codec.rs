//! Bounded NDJSON decoder for agent output.
//!
//! [`AcpCodec`] splits the byte stream on `\n` through a length-limited
//! [`LinesCodec`] and classifies each complete line into a [`Document`].
//! Blank, malformed and unhandled lines are consumed silently (the classifier
//! logs them), so one call to [`Decoder::decode`] yields the next *useful*
//! document or `None` once the buffer holds no further complete line.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use super::jsonrpc::Document;
use super::parser::parse_line;
use crate::{AppError, Result};

/// Longest agent output line accepted: 1 MiB.
///
/// A longer line yields [`AppError::Acp`] once; the codec then discards input
/// up to the next newline without buffering it.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line framing plus document classification.
#[derive(Debug)]
pub struct AcpCodec {
    lines: LinesCodec,
}

impl AcpCodec {
    /// Create a codec limited to [`MAX_LINE_BYTES`] per line.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        }
    }

    fn next_document(
        &mut self,
        src: &mut BytesMut,
        eof: bool,
    ) -> Result<Option<Document>> {
        loop {
            let line = if eof {
                self.lines.decode_eof(src)
            } else {
                self.lines.decode(src)
            };
            match line.map_err(map_lines_error)? {
                Some(line) => {
                    if let Some(document) = parse_line(&line) {
                        return Ok(Some(document));
                    }
                }
                None => return Ok(None),
            }
        }
    }
}

impl Default for AcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AcpCodec {
    type Item = Document;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Document>> {
        self.next_document(src, false)
    }

    /// Treats an unterminated final line as complete.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Document>> {
        self.next_document(src, true)
    }
}

fn map_lines_error(err: LinesCodecError) -> AppError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Acp(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(err) => AppError::Io(err.to_string()),
    }
}
