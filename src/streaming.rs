//! Reassembly of logical text lines from the vendor's streaming envelope.
//!
//! The backend streams repeated `data: <json>` records over a chunked HTTP
//! body. Each record nests zero or more text fragments under its
//! candidates/content/parts path; the fragments of one record are
//! concatenated into a pending buffer and every complete newline-terminated
//! segment is produced as one logical line. Consumers drive iteration; the
//! only buffering is the pending partial line, so memory stays bounded
//! regardless of response length.

use crate::core::RawByteStream;
use crate::error::TransportError;
use async_stream::stream;
use bytes::Bytes;
use futures_core::stream::Stream;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;
use tracing::debug;

/// Marker that opens every vendor stream record.
pub const DATA_PREFIX: &str = "data:";

/// Literal end sentinel some backends emit before closing the stream.
pub const END_SENTINEL: &str = "[DONE]";

/// Turn a chunked byte stream into a lazy sequence of logical text lines.
///
/// Malformed JSON records are skipped as streaming noise. A non-empty
/// partial line left at stream end is emitted once as a final line. The
/// underlying connection is released whenever the returned stream is
/// dropped, on any exit path.
pub fn stream_lines(byte_stream: RawByteStream) -> impl Stream<Item = Result<String, TransportError>> {
    stream! {
        // Bridge the byte stream into an AsyncRead so multi-byte characters
        // split across chunk boundaries are reassembled before decoding.
        let io_stream = byte_stream.map(|res| match res {
            Ok(bytes) => Ok::<Bytes, std::io::Error>(bytes),
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
        });
        let reader = StreamReader::new(io_stream);
        let mut lines = BufReader::new(reader).lines();

        let mut pending = String::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == END_SENTINEL {
                        break;
                    }
                    let Ok(envelope) = serde_json::from_str::<serde_json::Value>(payload) else {
                        debug!(target: "mcq_pipeline::stream", "skipping malformed stream record");
                        continue;
                    };
                    for fragment in text_fragments(&envelope) {
                        pending.push_str(fragment);
                    }
                    while let Some(idx) = pending.find('\n') {
                        let segment = pending[..idx].trim().to_string();
                        pending.drain(..=idx);
                        if !segment.is_empty() {
                            yield Ok(segment);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(TransportError::Http(e.to_string()));
                    break;
                }
            }
        }

        // A trailing un-terminated line still counts as produced output.
        let tail = pending.trim();
        if !tail.is_empty() {
            yield Ok(tail.to_string());
        }
    }
}

/// All text fragments of one stream record, in order.
fn text_fragments(envelope: &serde_json::Value) -> Vec<&str> {
    let mut fragments = Vec::new();
    let Some(candidates) = envelope.get("candidates").and_then(|c| c.as_array()) else {
        return fragments;
    };
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array());
        if let Some(parts) = parts {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    fragments.push(text);
                }
            }
        }
    }
    fragments
}
