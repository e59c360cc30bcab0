//! The composing state machine: one invocation per caller request.
//!
//! Validating → GlobalGate → AuthGate → UserGate → CacheCheck →
//! {CacheHit | Generating} → Caching → Done, with a Failed terminal
//! reachable from any state. Side effects (quota charges, cache writes)
//! commit only along the success path, except that the quota charge happens
//! before the model call and is not rolled back on a later failure.

use crate::cache::{fingerprint, ResponseCache};
use crate::config::Limits;
use crate::core::{ModelClient, ModelRequest};
use crate::error::{
    user_message, AuthError, ExtractError, GenerateError, ValidationError,
};
use crate::extract::{decode_line, parse_labeled_blocks, Mcq};
use crate::prompt;
use crate::quota::{QuotaGovernor, UsageStore};
use crate::streaming::stream_lines;
use crate::text;
use async_stream::stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::{pin_mut, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Inbound generation request, as posted by the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub file_data: Option<String>,
    pub mime_type: Option<String>,
    pub text_content: Option<String>,
    pub content_type: Option<String>,
    pub target_count: Option<u32>,
}

/// One frame of the outbound newline-delimited JSON stream.
///
/// Exactly one `meta` opens a successfully gated stream; zero or more `mcq`
/// frames follow in generation order; the stream ends with exactly one of
/// `done` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Meta { total: usize, cached: bool },
    Mcq { data: Mcq },
    Done { count: usize },
    Error { message: String },
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
}

/// External identity boundary: resolves a bearer credential to a verified
/// principal before any quota or cache logic runs.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, bearer: &str) -> Result<Principal, AuthError>;
}

/// Fixed token-to-user mapping for tests and the development CLI.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    tokens: HashMap<String, String>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn verify(&self, bearer: &str) -> Result<Principal, AuthError> {
        if bearer.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        self.tokens
            .get(bearer)
            .map(|user_id| Principal {
                user_id: user_id.clone(),
            })
            .ok_or(AuthError::InvalidCredential)
    }
}

#[derive(Debug, Clone)]
enum Material {
    Text(String),
    File { data: String, mime_type: String },
}

#[derive(Debug, Clone)]
struct Validated {
    material: Material,
    count: u32,
}

impl Validated {
    /// Stable content key feeding the fingerprint.
    fn content_key(&self) -> &str {
        match &self.material {
            Material::Text(text) => text,
            Material::File { data, .. } => data,
        }
    }
}

/// Per-fingerprint single-flight guard. A second identical concurrent
/// request waits for the first and then serves its cached result instead of
/// invoking the model twice.
#[derive(Debug, Default)]
struct InFlight {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InFlight {
    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            // Drop abandoned entries opportunistically; strong_count 1 means
            // only the map still holds the lock.
            if locks.len() > 64 {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Drives one generation request end to end, streaming frames to the caller.
#[derive(Clone)]
pub struct Orchestrator {
    client: Arc<dyn ModelClient>,
    identity: Arc<dyn IdentityProvider>,
    quota: Arc<QuotaGovernor>,
    cache: Arc<ResponseCache>,
    inflight: Arc<InFlight>,
    limits: Limits,
    dev_mode: bool,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn ModelClient>,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn UsageStore>,
        limits: Limits,
        dev_mode: bool,
    ) -> Self {
        Self {
            client,
            identity,
            quota: Arc::new(QuotaGovernor::new(store, limits)),
            cache: Arc::new(ResponseCache::new(limits.cache_ttl, limits.cache_max_entries)),
            inflight: Arc::new(InFlight::default()),
            limits,
            dev_mode,
        }
    }

    pub fn quota(&self) -> &QuotaGovernor {
        &self.quota
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn validate(&self, request: &GenerateRequest) -> Result<Validated, ValidationError> {
        let material = if let Some(data) = request.file_data.as_ref().filter(|d| !d.is_empty()) {
            let mime_type = request
                .mime_type
                .as_ref()
                .filter(|m| !m.is_empty())
                .ok_or(ValidationError::MissingMimeType)?;
            Material::File {
                data: data.clone(),
                mime_type: mime_type.clone(),
            }
        } else if let Some(raw) = request
            .text_content
            .as_ref()
            .filter(|t| !t.trim().is_empty())
        {
            Material::Text(text::normalize(raw))
        } else {
            return Err(ValidationError::MissingContent);
        };

        let count = request
            .target_count
            .unwrap_or(self.limits.default_count)
            .clamp(1, self.limits.max_count);

        Ok(Validated { material, count })
    }

    fn model_request(&self, validated: &Validated, compact: bool) -> ModelRequest {
        let instruction = if compact {
            prompt::compact_prompt(validated.count)
        } else {
            prompt::labeled_prompt(validated.count)
        };
        let request = ModelRequest::text(instruction)
            .with_generation(self.limits.max_output_tokens, self.limits.temperature);
        let request = match &validated.material {
            Material::Text(text) => request.push_text(text.clone()),
            Material::File { data, mime_type } => {
                request.push_inline(mime_type.clone(), data.clone())
            }
        };
        if compact {
            request
        } else {
            request.with_stop_sequences(
                prompt::LABELED_STOP_MARKERS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            )
        }
    }

    /// Run one generation request, yielding outbound frames as they are
    /// produced. The caller may stop consuming at any point; dropping the
    /// stream releases the upstream connection.
    #[instrument(target = "mcq_pipeline::orchestrate", skip(self, bearer, request))]
    pub fn generate(
        &self,
        bearer: &str,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = Frame> + Send>> {
        let this = self.clone();
        let bearer = bearer.to_string();
        Box::pin(stream! {
            // Validating
            let validated = match this.validate(&request) {
                Ok(v) => v,
                Err(e) => {
                    yield Frame::Error { message: user_message(&e.into(), this.dev_mode) };
                    return;
                }
            };

            // GlobalGate
            if let Err(e) = this.quota.check_global() {
                yield Frame::Error { message: user_message(&e, this.dev_mode) };
                return;
            }

            // AuthGate
            let principal = match this.identity.verify(&bearer).await {
                Ok(p) => p,
                Err(e) => {
                    yield Frame::Error { message: user_message(&e.into(), this.dev_mode) };
                    return;
                }
            };

            // UserGate
            let tier = match this.quota.admit_user(&principal.user_id).await {
                Ok(tier) => tier,
                Err(e) => {
                    yield Frame::Error { message: user_message(&e, this.dev_mode) };
                    return;
                }
            };

            // CacheCheck, under the per-fingerprint single-flight guard
            let fp = fingerprint(validated.content_key(), validated.count);
            let _guard = this.inflight.acquire(&fp).await;
            if let Some(mcqs) = this.cache.get(&fp) {
                info!(user_id = %principal.user_id, count = mcqs.len(), "serving cached MCQ set");
                yield Frame::Meta { total: mcqs.len(), cached: true };
                for mcq in &mcqs {
                    yield Frame::Mcq { data: mcq.clone() };
                }
                yield Frame::Done { count: mcqs.len() };
                return;
            }

            // Generating: charge before the model call, never rolled back.
            this.quota.charge(&principal.user_id, tier).await;
            yield Frame::Meta { total: validated.count as usize, cached: false };

            let collected = {
                let stream_request = this.model_request(&validated, true);
                match this.client.stream_raw(stream_request).await {
                    Ok(Some(bytes)) => {
                        let mut collected: Vec<Mcq> = Vec::new();
                        let lines = stream_lines(bytes);
                        pin_mut!(lines);
                        let mut transport_failure: Option<GenerateError> = None;
                        while let Some(item) = lines.next().await {
                            match item {
                                Ok(line) => {
                                    let Some(mcq) = decode_line(&line) else {
                                        debug!(target: "mcq_pipeline::orchestrate", "dropping malformed record line");
                                        continue;
                                    };
                                    collected.push(mcq.clone());
                                    yield Frame::Mcq { data: mcq };
                                    if collected.len() >= validated.count as usize {
                                        // Requested count reached; stop the
                                        // stream rather than over-generate.
                                        break;
                                    }
                                }
                                Err(e) => {
                                    transport_failure = Some(e.into());
                                    break;
                                }
                            }
                        }
                        if let Some(e) = transport_failure {
                            yield Frame::Error { message: user_message(&e, this.dev_mode) };
                            return;
                        }
                        collected
                    }
                    Ok(None) => {
                        // Backend does not stream: labeled-grammar fallback.
                        let block_request = this.model_request(&validated, false);
                        let raw = match this.client.ask_raw(block_request).await {
                            Ok(raw) => raw,
                            Err(e) => {
                                yield Frame::Error { message: user_message(&e.into(), this.dev_mode) };
                                return;
                            }
                        };
                        match parse_labeled_blocks(&raw, validated.count as usize) {
                            Ok(mcqs) => {
                                for mcq in &mcqs {
                                    yield Frame::Mcq { data: mcq.clone() };
                                }
                                mcqs
                            }
                            Err(_) => Vec::new(),
                        }
                    }
                    Err(e) => {
                        yield Frame::Error { message: user_message(&e.into(), this.dev_mode) };
                        return;
                    }
                }
            };

            if collected.is_empty() {
                warn!(user_id = %principal.user_id, "stream completed with zero valid records");
                let e = GenerateError::Extract(ExtractError::NoRecords);
                yield Frame::Error { message: user_message(&e, this.dev_mode) };
                return;
            }

            // Caching
            let produced = collected.len();
            this.cache.put(fp, collected);
            info!(
                user_id = %principal.user_id,
                produced,
                requested = validated.count,
                "generation complete"
            );
            yield Frame::Done { count: produced };
        })
    }
}
