//! OpenAI chat-completions client used for document summaries.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::OpenAiConfig;
use crate::schema::{DocumentSummary, Priority};
use crate::translation::language_name;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const SUMMARY_INPUT_CHARS: usize = 2000;
const FALLBACK_SUMMARY_CHARS: usize = 200;

/// Produces a [`DocumentSummary`] for extracted text.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        extracted_text: &str,
        document_type: &str,
        language: &str,
    ) -> Result<DocumentSummary>;
}

/// OpenAI client for chat completions.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(client: Client, config: &OpenAiConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    /// Send a chat completion request and return the first choice's content.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.7),
            max_tokens: Some(500),
        };

        self.send_request(request).await
    }

    async fn send_request(&self, request: ChatCompletionRequest) -> Result<String> {
        debug!("Sending request to OpenAI: model={}", request.model);

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error ({}): {}", status, error_text);
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if let Some(usage) = response.usage {
            info!(
                "OpenAI response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(content)
    }
}

#[async_trait::async_trait]
impl Summarizer for OpenAiClient {
    async fn summarize(
        &self,
        extracted_text: &str,
        document_type: &str,
        language: &str,
    ) -> Result<DocumentSummary> {
        let system = format!(
            "You are an expert document analyzer. Respond in JSON only. Write the summary in {}.",
            language_name(language)
        );
        let user = format!(
            "Analyze this {} document and provide JSON response with summary, keyPoints array, actionItems array, and priority level (low, medium or high). Text: {}",
            if document_type.is_empty() { "unknown" } else { document_type },
            truncate_chars(extracted_text, SUMMARY_INPUT_CHARS)
        );

        let content = self
            .chat(vec![Message::system(system), Message::user(user)])
            .await?;

        Ok(parse_summary(&content))
    }
}

/// Parse the model output as a summary, falling back to a truncated plain-text
/// summary with medium priority when it is not valid JSON.
pub fn parse_summary(content: &str) -> DocumentSummary {
    let json_str = strip_code_fence(content);
    match serde_json::from_str::<DocumentSummary>(json_str) {
        Ok(summary) => summary,
        Err(e) => {
            debug!("Summary is not structured JSON ({}), using raw text", e);
            DocumentSummary {
                summary: truncate_chars(content, FALLBACK_SUMMARY_CHARS).to_string(),
                key_points: Vec::new(),
                action_items: Vec::new(),
                priority: Priority::Medium,
            }
        }
    }
}

fn strip_code_fence(response: &str) -> &str {
    if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
