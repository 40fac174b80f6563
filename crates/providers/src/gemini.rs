//! Google Gemini (`generativelanguage`) provider implementation.
//!
//! Supports:
//! - `generateContent` (complete reply)
//! - `streamGenerateContent?alt=sse` (streamed reply)
//! - Model listing with declared generation methods, following page tokens
//!
//! The API key travels in the `x-goog-api-key` header, never in the URL,
//! so request logs cannot leak it.

use async_trait::async_trait;
use futures::StreamExt;
use physiogold_config::ProviderSettings;
use physiogold_core::error::ProviderError;
use physiogold_core::provider::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

const API_VERSION: &str = "v1beta";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const MODELS_PAGE_SIZE: u32 = 1000;

/// A provider bound to one API key.
pub struct GeminiProvider {
    base_url: String,
    credential: Credential,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a provider against the public Gemini endpoint.
    pub fn new(credential: Credential) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            credential,
            client,
        })
    }

    /// Point the provider at a different host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `gemini-1.5-flash` and `models/gemini-1.5-flash` both address the same model.
    fn model_path(model: &ModelId) -> String {
        let id = model.as_str();
        if id.contains('/') {
            id.to_string()
        } else {
            format!("models/{id}")
        }
    }

    fn request_body(request: &GenerationRequest) -> GenerateContentRequest {
        let sampling = request.temperature.is_some() || request.max_output_tokens.is_some();
        let generation_config = if sampling {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            })
        } else {
            None
        };

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".into(),
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config,
        }
    }

    async fn post(
        &self,
        url: &str,
        body: &GenerateContentRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.credential.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        ensure_success(response).await
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ProviderError> {
        let url = format!(
            "{}/{API_VERSION}/{}:generateContent",
            self.base_url,
            Self::model_path(&request.model)
        );

        debug!(
            model = %request.model,
            prompt_len = request.prompt.len(),
            "Sending generateContent request"
        );

        let response = self.post(&url, &Self::request_body(&request)).await?;

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| {
                ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
            })?;

        let usage = parsed.usage();
        let model = parsed
            .model_version
            .clone()
            .map(ModelId::new)
            .unwrap_or_else(|| request.model.clone());
        let text = parsed.into_text()?;

        Ok(GenerationResponse { text, model, usage })
    }

    async fn stream(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let url = format!(
            "{}/{API_VERSION}/{}:streamGenerateContent?alt=sse",
            self.base_url,
            Self::model_path(&request.model)
        );

        debug!(
            model = %request.model,
            prompt_len = request.prompt.len(),
            "Sending streaming request"
        );

        let response = self.post(&url, &Self::request_body(&request)).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Read the SSE byte stream and forward text deltas
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            // Raw bytes: a code point may straddle two network chunks
            let mut buffer: Vec<u8> = Vec::new();
            let mut last_usage = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);

                while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw[..line_end]);
                    let line = line.trim_end_matches('\r');

                    match parse_sse_line(line) {
                        SseLine::Skip => {}
                        SseLine::Unparseable(e) => {
                            trace!(data = %line, error = %e, "Ignoring unparseable SSE chunk");
                        }
                        SseLine::Chunk(parsed) => {
                            if let Some(usage) = parsed.usage() {
                                last_usage = Some(usage);
                            }
                            if let Some(reason) = parsed.block_reason() {
                                let _ = tx
                                    .send(Err(ProviderError::MalformedResponse(format!(
                                        "Prompt blocked: {reason}"
                                    ))))
                                    .await;
                                return;
                            }

                            let delta = parsed.joined_text();
                            if !delta.is_empty() {
                                let chunk = StreamChunk {
                                    content: Some(delta),
                                    done: false,
                                    usage: None,
                                };
                                if tx.send(Ok(chunk)).await.is_err() {
                                    return; // receiver dropped
                                }
                            }
                        }
                    }
                }
            }

            // The API closes the connection after the last event
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    done: true,
                    usage: last_usage,
                }))
                .await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<ModelDescriptor>, ProviderError> {
        let url = format!("{}/{API_VERSION}/models", self.base_url);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", MODELS_PAGE_SIZE.to_string())];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let response = self
                .client
                .get(&url)
                .header("x-goog-api-key", self.credential.expose())
                .query(&query)
                .send()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;

            let page: ListModelsResponse = ensure_success(response)
                .await?
                .json()
                .await
                .map_err(|e| {
                    ProviderError::MalformedResponse(format!("Failed to parse model list: {e}"))
                })?;

            models.extend(page.models.into_iter().map(|m| ModelDescriptor {
                id: m.name,
                display_name: m.display_name,
                capabilities: m.supported_generation_methods,
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(count = models.len(), "Listed models");
        Ok(models)
    }
}

/// Builds a `GeminiProvider` per session credential.
pub struct GeminiFactory {
    base_url: String,
}

impl GeminiFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self::new(&settings.base_url)
    }
}

impl Default for GeminiFactory {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ProviderFactory for GeminiFactory {
    fn build(&self, credential: &Credential) -> Result<Arc<dyn Provider>, ProviderError> {
        let provider = GeminiProvider::new(credential.clone())?.with_base_url(&self.base_url);
        Ok(Arc::new(provider))
    }
}

// --- Error mapping ---

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    warn!(status, "Gemini API returned error");
    Err(map_http_error(status, &body, retry_after))
}

fn map_http_error(status: u16, body: &str, retry_after: Option<u64>) -> ProviderError {
    let message = serde_json::from_str::<ErrorWrapper>(body)
        .ok()
        .and_then(|w| w.error.message)
        .unwrap_or_else(|| body.to_string());

    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(5),
        },
        401 | 403 => ProviderError::AuthenticationFailed(message),
        // An invalid key comes back as 400 INVALID_ARGUMENT
        400 if message.contains("API key") => ProviderError::AuthenticationFailed(message),
        404 => ProviderError::ModelNotFound(message),
        _ => ProviderError::ApiError {
            status_code: status,
            message,
        },
    }
}

// --- SSE parsing ---

enum SseLine {
    Skip,
    Chunk(GenerateContentResponse),
    Unparseable(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    match serde_json::from_str::<GenerateContentResponse>(data.trim()) {
        Ok(parsed) => SseLine::Chunk(parsed),
        Err(e) => SseLine::Unparseable(e.to_string()),
    }
}

// --- Gemini API types (internal) ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

impl GenerateContentResponse {
    fn joined_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
    }

    fn usage(&self) -> Option<Usage> {
        self.usage_metadata.as_ref().map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
    }

    fn into_text(self) -> Result<String, ProviderError> {
        if let Some(reason) = self.block_reason() {
            return Err(ProviderError::MalformedResponse(format!(
                "Prompt blocked: {reason}"
            )));
        }
        if self.candidates.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "No candidates in response".into(),
            ));
        }
        let text = self.joined_text();
        if text.is_empty() {
            let reason = self
                .candidates
                .first()
                .and_then(|c| c.finish_reason.clone())
                .unwrap_or_else(|| "unknown".into());
            return Err(ProviderError::MalformedResponse(format!(
                "Response contained no text (finish reason: {reason})"
            )));
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ApiModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiModel {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}
