//! Low-level generative backend abstraction.
//!
//! Implementors provide `ask_raw`, which executes a request and returns the
//! complete model text. Backends that support chunked streaming override
//! `stream_raw`; the orchestrator prefers the streaming path and falls back
//! to `ask_raw` with the labeled block grammar when it is unavailable.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use std::fmt::Debug;
use std::pin::Pin;

/// Raw byte stream from a generative backend's chunked HTTP response.
pub type RawByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// One part of the prompt body: instruction/material text, or a base64
/// file payload with its MIME type.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialPart {
    Text(String),
    Inline { mime_type: String, data: String },
}

/// A prompt body plus generation knobs, independent of any vendor wire shape.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub parts: Vec<MaterialPart>,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
}

impl ModelRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            parts: vec![MaterialPart::Text(prompt.into())],
            max_output_tokens: 8192,
            temperature: 0.7,
            stop_sequences: Vec::new(),
        }
    }

    pub fn push_text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(MaterialPart::Text(text.into()));
        self
    }

    pub fn push_inline(mut self, mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        self.parts.push(MaterialPart::Inline {
            mime_type: mime_type.into(),
            data: data.into(),
        });
        self
    }

    pub fn with_generation(mut self, max_output_tokens: u32, temperature: f32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self.temperature = temperature;
        self
    }

    pub fn with_stop_sequences(mut self, stops: Vec<String>) -> Self {
        self.stop_sequences = stops;
        self
    }
}

/// Low-level generative backend client.
#[async_trait]
pub trait ModelClient: Send + Sync + Debug {
    /// Execute the request and return the complete response text.
    async fn ask_raw(&self, request: ModelRequest) -> Result<String, TransportError>;

    /// Open a chunked streaming response for the request.
    ///
    /// `Ok(None)` means this backend does not stream; callers should fall
    /// back to `ask_raw`. Default is `Ok(None)`.
    async fn stream_raw(
        &self,
        request: ModelRequest,
    ) -> Result<Option<RawByteStream>, TransportError> {
        let _ = request;
        Ok(None)
    }
}
