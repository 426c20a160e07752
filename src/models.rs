use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{GenerationConfig, GENERATION_SETUP_HINT};

const QUOTA_MESSAGE: &str = "Google AI API quota exceeded. Please wait a few minutes and try again, or check your API key at https://makersuite.google.com/app/apikey";

#[derive(Debug, Error)]
pub enum ModelError {
    // rate limit or exhausted quota; nothing here retries
    #[error("{message}")]
    RateLimited { message: String },
    #[error("{message}")]
    Failed { message: String },
}

#[async_trait]
pub trait GenerationModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl GenerationModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let Some(key) = &self.api_key else {
            return Err(ModelError::Failed { message: GENERATION_SETUP_HINT.into() });
        };
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateContentRequest {
            contents: vec![Content { parts: vec![Part { text: prompt }] }],
        };
        let resp = self
            .client
            .post(&url)
            .query(&[("key", key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Failed { message: format!("generation request failed: {e}") })?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            // the provider reports exhausted quota either as 429 or as an
            // error body mentioning "quota"
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || text.contains("quota") {
                return Err(ModelError::RateLimited { message: QUOTA_MESSAGE.to_string() });
            }
            return Err(ModelError::Failed { message: format!("generation API returned {status}: {text}") });
        }
        let parsed: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Failed { message: format!("malformed generation response: {e}") })?;
        let reply = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();
        Ok(reply)
    }
}
