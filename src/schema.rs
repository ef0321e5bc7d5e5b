//! Detected-field and document analysis types.
//!
//! Wire names follow the camelCase JSON produced by the `process-document`
//! function and consumed by the review client.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field id → user-entered value. Absence of a key means "unfilled".
pub type FilledFieldMap = BTreeMap<String, String>;

/// Generate an RFC 3339 timestamp (UTC, millisecond precision) for now.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Input widget kind for a detected field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Date,
    Number,
    Email,
    Phone,
    Checkbox,
    Signature,
    Address,
    /// Also the landing spot for kinds this service does not know.
    #[default]
    #[serde(other)]
    Text,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Date => "date",
            FieldType::Number => "number",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
            FieldType::Checkbox => "checkbox",
            FieldType::Signature => "signature",
            FieldType::Address => "address",
        }
    }
}

/// Pixel-space rectangle, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// True when the box is non-negative and fits inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width >= 0.0
            && self.height >= 0.0
            && self.x + self.width <= f64::from(width)
            && self.y + self.height <= f64::from(height)
    }
}

/// One recognized region on a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedField {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub bounding_box: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    /// Value proposed by the detector. Carried for reference, never auto-applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Key-entity buckets reported for a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyEntities {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub amounts: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
}

impl KeyEntities {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
            && self.dates.is_empty()
            && self.amounts.is_empty()
            && self.locations.is_empty()
    }
}

/// Response of the remote document-analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAnalysisResult {
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub extracted_text: String,
    #[serde(default)]
    pub detected_fields: Vec<DetectedField>,
    #[serde(default)]
    pub key_entities: KeyEntities,
    #[serde(default)]
    pub language_detected: String,
    /// Milliseconds spent in the analysis round trip, measured locally.
    #[serde(default)]
    pub processing_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Optional LLM enrichment of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

fn default_language() -> String {
    "en".to_string()
}

/// Persisted personal-information record, used as a source of field suggestions.
///
/// Stored in the `user_profiles` table with snake_case columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default = "default_language")]
    pub preferred_language: String,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            full_name: None,
            email: None,
            phone: None,
            date_of_birth: None,
            address: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            preferred_language: default_language(),
        }
    }
}

/// An uploaded image after it has been read and probed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedDocument {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: usize,
    pub width: u32,
    pub height: u32,
    /// `data:<mime>;base64,<payload>`
    #[serde(skip)]
    pub data_uri: String,
}

impl UploadedDocument {
    /// Base64 payload without the data-URI prefix.
    pub fn base64_payload(&self) -> &str {
        self.data_uri
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or(&self.data_uri)
    }
}
