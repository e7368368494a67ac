use crate::prompts::PromptBook;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_GEMINI_MODELS: &[&str] = &[
    "gemini-1.5-pro-latest",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
    "gemini-1.0-pro",
];

pub const DEFAULT_OPENAI_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini"];

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

/// Inputs for generating a question set.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRequest {
    pub role: String,
    pub interview_type: String,
    pub experience: String,
    pub technologies: String,
    pub count: u8,
}

/// The generative-language collaborator. Returns raw model text; callers parse it.
///
/// Implementations hold no per-request state, so one handle is passed to every
/// pipeline run and a substitute can stand in for tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score_answer(&self, question: &str, answer: &str, role: &str) -> Result<String>;

    async fn generate_questions(&self, request: &QuestionRequest) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringProvider {
    Gemini,
    OpenAI,
}

impl ScoringProvider {
    pub fn default_models(&self) -> Vec<String> {
        let models = match self {
            ScoringProvider::Gemini => DEFAULT_GEMINI_MODELS,
            ScoringProvider::OpenAI => DEFAULT_OPENAI_MODELS,
        };
        models.iter().map(|m| m.to_string()).collect()
    }
}

impl fmt::Display for ScoringProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringProvider::Gemini => f.write_str("gemini"),
            ScoringProvider::OpenAI => f.write_str("openai"),
        }
    }
}

impl FromStr for ScoringProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(ScoringProvider::Gemini),
            "openai" => Ok(ScoringProvider::OpenAI),
            other => Err(format!("unknown scoring provider '{other}'")),
        }
    }
}

/// HTTP client for Gemini or OpenAI, trying each configured model in order.
pub struct ScorerClient {
    client: Client,
    provider: ScoringProvider,
    api_key: String,
    models: Vec<String>,
    prompts: PromptBook,
}

impl ScorerClient {
    pub fn new(
        provider: ScoringProvider,
        api_key: String,
        models: Vec<String>,
        prompts: PromptBook,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        let models = if models.is_empty() {
            provider.default_models()
        } else {
            models
        };

        Self {
            client,
            provider,
            api_key,
            models,
            prompts,
        }
    }

    pub fn provider(&self) -> ScoringProvider {
        self.provider
    }

    /// Sends `prompt` to the first model that answers.
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut last_error = None;
        for model in &self.models {
            let result = match self.provider {
                ScoringProvider::Gemini => self.complete_gemini(model, prompt).await,
                ScoringProvider::OpenAI => self.complete_openai(model, prompt).await,
            };
            match result {
                Ok(text) => {
                    debug!(provider = %self.provider, model = %model, "Model responded");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(provider = %self.provider, model = %model, "Model not available or failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("No models configured for {}", self.provider)))
    }

    async fn complete_gemini(&self, model: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ]
        });

        let resp = self
            .client
            .post(format!("{GEMINI_BASE_URL}/{model}:generateContent"))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<GeminiResponse>()
            .await?;

        let text = resp
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| anyhow!("No response from Gemini"))?;
        Ok(text)
    }

    async fn complete_openai(&self, model: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        });

        let resp = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<LlmResponse>()
            .await?;

        let answer = &resp
            .choices
            .first()
            .ok_or_else(|| anyhow!("No response from LLM"))?
            .message
            .content;
        Ok(answer.clone())
    }
}

#[async_trait]
impl Scorer for ScorerClient {
    async fn score_answer(&self, question: &str, answer: &str, role: &str) -> Result<String> {
        let prompt = self.prompts.feedback_prompt(question, answer, role);
        self.complete(&prompt).await
    }

    async fn generate_questions(&self, request: &QuestionRequest) -> Result<String> {
        let prompt = self.prompts.questions_prompt(
            &request.role,
            &request.interview_type,
            &request.experience,
            &request.technologies,
            request.count,
        );
        self.complete(&prompt).await
    }
}
