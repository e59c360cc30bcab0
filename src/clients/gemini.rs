use crate::config::KeyFromEnv;
use crate::core::{MaterialPart, ModelClient, ModelRequest, RawByteStream};
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl KeyFromEnv for GeminiClient {
    const KEY_NAME: &'static str = "GEMINI_API_KEY";
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        info!(model = %config.model, "Creating new Gemini client");
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Build a client from `GEMINI_API_KEY`; `None` when the key is absent.
    pub fn from_env() -> Option<Self> {
        let api_key = Self::find_key()?;
        Some(Self::new(GeminiConfig {
            api_key,
            ..GeminiConfig::default()
        }))
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.config.base_url, self.config.model, method, self.config.api_key
        )
    }

    fn request_body(request: &ModelRequest) -> serde_json::Value {
        let parts: Vec<serde_json::Value> = request
            .parts
            .iter()
            .map(|part| match part {
                MaterialPart::Text(text) => json!({ "text": text }),
                MaterialPart::Inline { mime_type, data } => json!({
                    "inline_data": { "mime_type": mime_type, "data": data }
                }),
            })
            .collect();

        let mut generation_config = json!({
            "maxOutputTokens": request.max_output_tokens,
            "temperature": request.temperature,
        });
        if !request.stop_sequences.is_empty() {
            generation_config["stopSequences"] = json!(request.stop_sequences);
        }

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status == 429 {
            warn!("Gemini API rate limit exceeded");
            return Err(TransportError::RateLimit);
        }
        if status == 401 || status == 403 {
            error!("Gemini API authentication failed");
            return Err(TransportError::Authentication);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %body, "Gemini API error");
            return Err(TransportError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    #[instrument(skip(self, request), fields(model = %self.config.model))]
    async fn ask_raw(&self, request: ModelRequest) -> Result<String, TransportError> {
        debug!(parts = request.parts.len(), "Preparing Gemini generateContent request");
        let response = self
            .client
            .post(self.endpoint("generateContent"))
            .header("content-type", "application/json")
            .json(&Self::request_body(&request))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request failed");
                TransportError::Http(e.to_string())
            })?;

        let response = Self::check_status(response).await?;
        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let mut text = String::new();
        let parts = envelope
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c0| c0.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array());
        if let Some(parts) = parts {
            for part in parts {
                if let Some(fragment) = part.get("text").and_then(|t| t.as_str()) {
                    text.push_str(fragment);
                }
            }
        }
        if text.is_empty() {
            error!("No content in Gemini response");
            return Err(TransportError::EmptyBody);
        }
        info!(response_len = text.len(), "Received Gemini response");
        Ok(text)
    }

    #[instrument(skip(self, request), fields(model = %self.config.model))]
    async fn stream_raw(
        &self,
        request: ModelRequest,
    ) -> Result<Option<RawByteStream>, TransportError> {
        let response = self
            .client
            .post(format!("{}&alt=sse", self.endpoint("streamGenerateContent")))
            .header("content-type", "application/json")
            .json(&Self::request_body(&request))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request failed");
                TransportError::Http(e.to_string())
            })?;

        let response = Self::check_status(response).await?;
        debug!("Opened Gemini streaming response");

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Http(e.to_string())));
        Ok(Some(Box::pin(stream)))
    }
}
