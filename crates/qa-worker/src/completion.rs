//! Completion service client
//!
//! Wraps the question in a programming-tutor prompt and calls the Gemini
//! `generateContent` REST endpoint.

use async_trait::async_trait;
use qa_config::CompletionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Completion API key is not configured")]
    MissingApiKey,

    #[error("Completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Completion API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode completion response: {0}")]
    Decode(String),

    #[error("Completion API returned no text")]
    EmptyResponse,
}

pub type Result<T> = std::result::Result<T, CompletionError>;

/// Produces an answer for a question
#[async_trait]
pub trait Completer: Send + Sync {
    /// A blank answer is reported as `CompletionError::EmptyResponse`
    async fn complete(&self, question: &str) -> Result<String>;
}

/// Tutor prompt; `{mensaje}` is replaced by the question
const PROMPT_TEMPLATE: &str = include_str!("prompt_template.txt");
const PROMPT_PLACEHOLDER: &str = "{mensaje}";

pub fn build_prompt(question: &str) -> String {
    PROMPT_TEMPLATE.replace(PROMPT_PLACEHOLDER, question.trim())
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Joined text parts of the first candidate
    fn into_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

// ============================================================================
// Gemini client
// ============================================================================

pub struct GeminiCompleter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiCompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(CompletionError::MissingApiKey)?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .build()?;

        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.api_base_url.trim_end_matches('/'),
            config.model
        );

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl Completer for GeminiCompleter {
    async fn complete(&self, question: &str) -> Result<String> {
        let prompt = build_prompt(question);
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: &prompt }],
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let parsed: GenerateContentResponse =
            serde_json::from_slice(&bytes).map_err(|e| CompletionError::Decode(e.to_string()))?;

        let answer = parsed.into_text().trim().to_string();
        if answer.is_empty() {
            return Err(CompletionError::EmptyResponse);
        }

        debug!(answer_len = answer.len(), "Completion received");
        Ok(answer)
    }
}
