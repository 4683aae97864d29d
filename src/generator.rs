//! Remote text generation.
//!
//! The loop controller only needs "prompt in, text and token count out", so
//! the remote service sits behind the [`Generator`] trait. [`GeminiGenerator`]
//! is the production implementation talking to the Gemini REST API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{DialogueError, Result};
use crate::token_counter::TokenCounter;

/// One response from the generation service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationChunk {
    /// Generated text, possibly empty or malformed
    pub text: String,
    /// Tokens produced for this response
    pub token_count: usize,
}

impl GenerationChunk {
    /// Create a chunk from text and its token count
    pub fn new(text: impl Into<String>, token_count: usize) -> Self {
        Self {
            text: text.into(),
            token_count,
        }
    }

    /// A chunk with no text
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the chunk carries no usable text
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Trait for generation backends (real API or mock)
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for `prompt`, producing at most `max_output_tokens`
    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<GenerationChunk>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
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
struct UsageMetadata {
    #[serde(default)]
    candidates_token_count: Option<usize>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate
    fn text(&self) -> String {
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

    fn reported_tokens(&self) -> Option<usize> {
        self.usage_metadata
            .as_ref()
            .and_then(|u| u.candidates_token_count)
    }
}

/// Gemini `generateContent` client
pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    token_counter: TokenCounter,
}

impl GeminiGenerator {
    /// Create a new generator from an API key and the run configuration.
    ///
    /// Requests that take longer than `request_timeout_secs` fail.
    pub fn new(api_key: impl Into<String>, config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: normalize_model(&config.model),
            token_counter: TokenCounter::new(config.token_estimation),
        })
    }

    /// Set a custom base URL (e.g., for proxies or a mock server)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model name
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = normalize_model(model);
        self
    }

    /// The model requests are sent to
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

/// Accept both `gemini-x` and `models/gemini-x`
fn normalize_model(model: &str) -> String {
    model.trim().trim_start_matches("models/").to_string()
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<GenerationChunk> {
        debug!("Sending request to model {}", self.model);

        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig { max_output_tokens },
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let body = if status.as_u16() == 401 || status.as_u16() == 403 {
                format!("authentication failed, check the API key: {}", body)
            } else {
                body
            };
            return Err(DialogueError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| DialogueError::MalformedResponse(e.to_string()))?;

        let text = parsed.text();
        let token_count = self.token_counter.resolve(parsed.reported_tokens(), &text);
        debug!("Received {} chars, {} tokens", text.len(), token_count);

        Ok(GenerationChunk::new(text, token_count))
    }
}
