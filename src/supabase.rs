//! Supabase client for persisting uploads and reading user profiles.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SupabaseConfig;
use crate::schema::UserProfile;

/// Persistence seam used by the pipeline and the profile endpoints.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert document metadata and return the new row's id.
    async fn insert_document(&self, record: &NewDocument) -> Result<String>;
    async fn insert_analysis(&self, record: &NewAnalysis) -> Result<()>;
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;
    async fn upsert_profile(&self, user_id: &str, profile: &UserProfile) -> Result<()>;
}

/// Row for the `documents` table.
#[derive(Debug, Clone, Serialize)]
pub struct NewDocument {
    pub user_id: String,
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
    pub file_size: usize,
    pub status: String,
}

/// Row for the `document_analysis` table.
#[derive(Debug, Clone, Serialize)]
pub struct NewAnalysis {
    pub document_id: String,
    pub user_id: String,
    pub document_type: String,
    pub confidence_score: f64,
    pub extracted_text: String,
    pub detected_fields: serde_json::Value,
    pub key_entities: serde_json::Value,
    pub summary: Option<String>,
    pub language_detected: String,
    pub processing_time: u64,
}

#[derive(Debug, Serialize)]
struct ProfileRow<'a> {
    id: &'a str,
    #[serde(flatten)]
    profile: &'a UserProfile,
    updated_at: String,
}

#[derive(Debug, Deserialize)]
struct InsertedRow {
    id: serde_json::Value,
}

/// Supabase REST client.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    bearer: String,
}

impl SupabaseClient {
    pub fn new(client: Client, config: &SupabaseConfig) -> Self {
        Self {
            client,
            base_url: config.url.clone(),
            api_key: config.anon_key.clone(),
            bearer: config
                .service_role_key
                .clone()
                .unwrap_or_else(|| config.anon_key.clone()),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.bearer))
    }

    /// POST a JSON body to a table, failing on non-2xx.
    async fn post_json<T: Serialize + ?Sized>(
        &self,
        table: &str,
        body: &T,
        prefer: &str,
    ) -> Result<reqwest::Response> {
        let resp = self
            .authed(self.client.post(self.table_url(table)))
            .header("Content-Type", "application/json")
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach Supabase table {}", table))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to insert into {}: {} - {}", table, status, text));
        }

        Ok(resp)
    }

    /// Helper: GET from Supabase REST API.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/rest/v1/{}", self.base_url, path);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Supabase GET {} failed: {} - {}", path, status, text));
        }

        Ok(resp.json().await?)
    }
}

#[async_trait::async_trait]
impl DocumentStore for SupabaseClient {
    async fn insert_document(&self, record: &NewDocument) -> Result<String> {
        debug!("Inserting document: {}", record.file_path);

        let resp = self
            .post_json("documents", record, "return=representation")
            .await?;
        let rows: Vec<InsertedRow> = resp
            .json()
            .await
            .context("Failed to parse inserted document row")?;

        let id = rows
            .into_iter()
            .next()
            .map(|r| row_id(&r.id))
            .ok_or_else(|| anyhow!("Supabase returned no row for inserted document"))?;

        info!("Inserted document {} ({})", id, record.file_name);
        Ok(id)
    }

    async fn insert_analysis(&self, record: &NewAnalysis) -> Result<()> {
        self.post_json("document_analysis", record, "return=minimal")
            .await?;
        debug!("Inserted analysis for document {}", record.document_id);
        Ok(())
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let rows: Vec<UserProfile> = self
            .get_json(&format!("user_profiles?id=eq.{}&select=*&limit=1", user_id))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_profile(&self, user_id: &str, profile: &UserProfile) -> Result<()> {
        let row = ProfileRow {
            id: user_id,
            profile,
            updated_at: crate::schema::now_iso8601(),
        };
        self.post_json(
            "user_profiles",
            &row,
            "resolution=merge-duplicates,return=minimal",
        )
        .await?;
        info!("Upserted profile for user {}", user_id);
        Ok(())
    }
}

/// Ids may come back as UUID strings or integers.
fn row_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
