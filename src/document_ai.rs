//! Client for the remote `process-document` edge function.
//!
//! Defines the [`DocumentAnalyzer`] trait so the pipeline can run against the
//! hosted function or an in-process fake.

use crate::config::SupabaseConfig;
use crate::schema::{DocumentAnalysisResult, UploadedDocument};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Async trait implemented by each analysis backend.
#[async_trait::async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Analyze an uploaded image. The error string is user-facing.
    async fn analyze(&self, document: &UploadedDocument) -> Result<DocumentAnalysisResult, String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    image_base64: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

pub struct DocumentAiClient {
    client: reqwest::Client,
    endpoint: String,
    anon_key: String,
}

impl DocumentAiClient {
    pub fn new(client: reqwest::Client, config: &SupabaseConfig) -> Self {
        Self {
            client,
            endpoint: format!("{}/functions/v1/process-document", config.url),
            anon_key: config.anon_key.clone(),
        }
    }
}

#[async_trait::async_trait]
impl DocumentAnalyzer for DocumentAiClient {
    async fn analyze(&self, document: &UploadedDocument) -> Result<DocumentAnalysisResult, String> {
        let started = Instant::now();
        let payload = document.base64_payload();

        info!(
            "DocumentAiClient: analyzing {} ({} bytes base64)",
            document.file_name,
            payload.len()
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.anon_key)
            .json(&AnalyzeRequest {
                image_base64: payload,
            })
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| e.to_string())?;

        if !status.is_success() {
            return Err(error_message(status, &body));
        }

        debug!(
            "DocumentAiClient: raw response ({} bytes): {}",
            body.len(),
            body.chars().take(500).collect::<String>()
        );

        let mut result: DocumentAnalysisResult = serde_json::from_str(&body)
            .map_err(|e| format!("Invalid analysis response: {}", e))?;
        result.processing_time = started.elapsed().as_millis() as u64;

        info!(
            "DocumentAiClient: {} fields detected, type={} in {}ms",
            result.detected_fields.len(),
            result.document_type,
            result.processing_time
        );

        Ok(result)
    }
}

/// Pick the message for a failed call: the body's `error` field when present,
/// otherwise the status reason phrase.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_body() {
        let msg = error_message(
            StatusCode::BAD_REQUEST,
            r#"{"error": "Image too large"}"#,
        );
        assert_eq!(msg, "Image too large");
    }

    #[test]
    fn test_error_message_falls_back_to_status_text() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "<html>upstream</html>"),
            "Bad Gateway"
        );
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, r#"{"message": "x"}"#),
            "Internal Server Error"
        );
    }

    #[test]
    fn test_request_uses_camel_case() {
        let body = serde_json::to_value(AnalyzeRequest {
            image_base64: "QUJD",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"imageBase64": "QUJD"}));
    }

    #[test]
    fn test_endpoint_path() {
        let client = DocumentAiClient::new(
            reqwest::Client::new(),
            &SupabaseConfig {
                url: "https://demo.supabase.co".to_string(),
                anon_key: "anon".to_string(),
                service_role_key: None,
            },
        );
        assert_eq!(
            client.endpoint,
            "https://demo.supabase.co/functions/v1/process-document"
        );
    }
}
