//! Profile-derived field suggestions.
//!
//! A suggestion is a lookup from keywords in the field label to a value in the
//! user's profile. The first matching keyword wins.

use crate::schema::{DetectedField, UserProfile};

/// Profile attribute a label keyword maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    FullName,
    Email,
    Phone,
    Address,
    DateOfBirth,
    City,
    PostalCode,
    Country,
}

/// Keyword table, checked in order against the lowercased label.
const LABEL_KEYWORDS: &[(&str, ProfileField)] = &[
    ("name", ProfileField::FullName),
    ("email", ProfileField::Email),
    ("phone", ProfileField::Phone),
    ("address", ProfileField::Address),
    ("birth", ProfileField::DateOfBirth),
    ("city", ProfileField::City),
    ("postal", ProfileField::PostalCode),
    ("zip", ProfileField::PostalCode),
    ("country", ProfileField::Country),
];

impl ProfileField {
    pub fn for_label(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        LABEL_KEYWORDS
            .iter()
            .find(|(keyword, _)| label.contains(keyword))
            .map(|(_, field)| *field)
    }

    pub fn value_in<'a>(&self, profile: &'a UserProfile) -> Option<&'a str> {
        let value = match self {
            ProfileField::FullName => &profile.full_name,
            ProfileField::Email => &profile.email,
            ProfileField::Phone => &profile.phone,
            ProfileField::Address => &profile.address,
            ProfileField::DateOfBirth => &profile.date_of_birth,
            ProfileField::City => &profile.city,
            ProfileField::PostalCode => &profile.postal_code,
            ProfileField::Country => &profile.country,
        };
        value.as_deref()
    }
}

/// Suggested value for a field, or an empty string when nothing matches.
pub fn suggest(field: &DetectedField, profile: &UserProfile) -> String {
    ProfileField::for_label(&field.label)
        .and_then(|f| f.value_in(profile))
        .unwrap_or_default()
        .to_string()
}

/// Source of per-field suggestions, awaited once per field by the pipeline.
#[async_trait::async_trait]
pub trait FieldSuggester: Send + Sync {
    async fn suggest(&self, field: &DetectedField, profile: &UserProfile) -> anyhow::Result<String>;
}

/// Suggests values straight from the profile keyword table.
pub struct ProfileSuggester;

#[async_trait::async_trait]
impl FieldSuggester for ProfileSuggester {
    async fn suggest(&self, field: &DetectedField, profile: &UserProfile) -> anyhow::Result<String> {
        Ok(suggest(field, profile))
    }
}
