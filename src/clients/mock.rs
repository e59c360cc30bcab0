//! Scripted backends for tests and the CLI's offline mode.

use crate::core::{ModelClient, ModelRequest, RawByteStream};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Client that replays canned output and counts invocations.
#[derive(Debug, Clone, Default)]
pub struct MockClient {
    chunks: Option<Vec<Bytes>>,
    raw: Option<String>,
    fail: Option<(u16, String)>,
    stream_calls: Arc<AtomicUsize>,
    ask_calls: Arc<AtomicUsize>,
}

impl MockClient {
    /// Streams the given byte chunks as the raw response body.
    pub fn streaming(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks: Some(chunks),
            ..Self::default()
        }
    }

    /// No streaming support; `ask_raw` returns the given text.
    pub fn blocking(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
            ..Self::default()
        }
    }

    /// Every call fails with the given upstream status and body.
    pub fn unavailable(status: u16, body: impl Into<String>) -> Self {
        Self {
            fail: Some((status, body.into())),
            ..Self::default()
        }
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn ask_calls(&self) -> usize {
        self.ask_calls.load(Ordering::SeqCst)
    }

    /// Total backend invocations across both paths.
    pub fn total_calls(&self) -> usize {
        self.stream_calls() + self.ask_calls()
    }
}

#[async_trait]
impl ModelClient for MockClient {
    async fn ask_raw(&self, _request: ModelRequest) -> Result<String, TransportError> {
        self.ask_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((status, body)) = &self.fail {
            return Err(TransportError::Api {
                status: *status,
                body: body.clone(),
            });
        }
        self.raw.clone().ok_or(TransportError::EmptyBody)
    }

    async fn stream_raw(
        &self,
        _request: ModelRequest,
    ) -> Result<Option<RawByteStream>, TransportError> {
        if let Some((status, body)) = &self.fail {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::Api {
                status: *status,
                body: body.clone(),
            });
        }
        match &self.chunks {
            None => Ok(None),
            Some(chunks) => {
                self.stream_calls.fetch_add(1, Ordering::SeqCst);
                let chunks = chunks.clone();
                Ok(Some(Box::pin(futures_util::stream::iter(
                    chunks.into_iter().map(Ok::<Bytes, TransportError>),
                ))))
            }
        }
    }
}
