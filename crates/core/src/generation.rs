use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::{pin::Pin, time::Duration};

/// Persona and behaviour preamble sent as the `system` field when no prompt file overrides it.
pub const DEFAULT_SYSTEM_PREAMBLE: &str = "You are CodePrep Assistant, a tutor for coding interviews and competitive programming. \
Answer questions about programming languages, data structures, algorithms, complexity analysis, \
debugging and contest strategy. Prefer short explanations followed by code. \
If a question is unrelated to programming, politely decline and steer back to coding topics.";

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Sampling parameters forwarded as the `options` object of a generate call.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

/// A single prompt to be streamed from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub options: Option<SamplingOptions>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            options: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_options(mut self, options: SamplingOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Failures of a generation round-trip.
///
/// `Display` carries the operator-facing detail for logs; [`user_message`]
/// is what a browser client may see.
///
/// [`user_message`]: GenerationError::user_message
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation backend unreachable at {base_url}: {detail}")]
    Unavailable {
        base_url: String,
        model: String,
        detail: String,
    },
    #[error("model '{model}' is not available on the generation backend")]
    ModelMissing { model: String },
    #[error("generation backend rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("generation backend returned no response body")]
    EmptyBody,
    #[error("generation was cancelled")]
    Cancelled,
    #[error("generation timed out after {0:?}")]
    TimedOut(Duration),
    #[error("error while reading the generation stream: {0}")]
    Transport(String),
}

impl GenerationError {
    /// Cancellation is an expected outcome and is never shown to the client.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, GenerationError::Cancelled)
    }

    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Unavailable { base_url, model, .. } => format!(
                "Cannot reach the model server at {base_url}. Start it with `ollama serve` \
                 and make sure the model is pulled (`ollama pull {model}`)."
            ),
            GenerationError::ModelMissing { model } => format!(
                "The model '{model}' is not installed. Run `ollama pull {model}` and try again."
            ),
            GenerationError::Rejected { status, body } => {
                format!("The model server rejected the request ({status}): {body}")
            }
            GenerationError::EmptyBody => "The model server returned an empty response.".to_string(),
            GenerationError::Cancelled => "The request was cancelled.".to_string(),
            GenerationError::TimedOut(_) => {
                "The model took too long to respond. Please try again.".to_string()
            }
            GenerationError::Transport(_) => {
                "The connection to the model server was interrupted.".to_string()
            }
        }
    }
}

/// The raw response body as an ordered sequence of byte chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, GenerationError>> + Send>>;

/// A text-generation service that streams newline-delimited JSON records.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Starts a streaming generation. Dropping the returned stream aborts the request.
    async fn generate(&self, request: GenerationRequest) -> Result<ChunkStream, GenerationError>;

    /// Lists the model names the backend has available locally.
    async fn list_models(&self) -> Result<Vec<String>, GenerationError>;

    /// The model this backend generates with.
    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a SamplingOptions>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

/// [`GenerationBackend`] for a locally hosted Ollama server.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Creates a client for the Ollama server at `base_url` (e.g. `http://localhost:11434`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self::with_client(http, base_url, model)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn send_error(&self, err: reqwest::Error) -> GenerationError {
        if err.is_connect() {
            GenerationError::Unavailable {
                base_url: self.base_url.clone(),
                model: self.model.clone(),
                detail: err.to_string(),
            }
        } else {
            GenerationError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl GenerationBackend for OllamaClient {
    async fn generate(&self, request: GenerationRequest) -> Result<ChunkStream, GenerationError> {
        let body = GenerateBody {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: true,
            options: request.options.as_ref(),
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GenerationError::ModelMissing {
                model: self.model.clone(),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Rejected {
                status: status.as_u16(),
                body: error_excerpt(&text),
            });
        }
        if response.content_length() == Some(0) {
            return Err(GenerationError::EmptyBody);
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GenerationError::Transport(e.to_string())));
        Ok(Box::pin(chunks))
    }

    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Rejected {
                status: status.as_u16(),
                body: error_excerpt(&text),
            });
        }
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Prefers the `error` field of a JSON error body, truncated for display.
fn error_excerpt(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string());
    truncate_chars(&message, MAX_ERROR_BODY_CHARS)
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
