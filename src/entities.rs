//! Key-entity extraction from document text using regex patterns.
//!
//! Pure functions, no async. Used to fill the name/date/amount buckets locally
//! when the analysis service returns none.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::schema::KeyEntities;

/// Bucket a pattern's matches land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Name,
    Date,
    Amount,
}

/// A regex-based entity pattern.
pub struct EntityPattern {
    pub kind: EntityKind,
    pub pattern: &'static str,
    pub case_insensitive: bool,
}

const KEY_ENTITY_PATTERNS: &[EntityPattern] = &[
    EntityPattern {
        kind: EntityKind::Name,
        pattern: r"(?:Mr\.|Mrs\.|Ms\.|Dr\.)\s+[A-Z][a-z]+\s+[A-Z][a-z]+",
        case_insensitive: false,
    },
    EntityPattern {
        kind: EntityKind::Date,
        pattern: r"\b\d{1,2}[-/]\d{1,2}[-/]\d{2,4}\b|\b\d{4}[-/]\d{1,2}[-/]\d{1,2}\b",
        case_insensitive: false,
    },
    EntityPattern {
        kind: EntityKind::Amount,
        pattern: r"\$\s*\d+[,.]?\d*|\d+[,.]\d{2}\s*(?:USD|EUR|GBP|INR|dollars?|rupees?)",
        case_insensitive: true,
    },
];

/// Pre-compiled regex patterns ready for matching.
pub struct CompiledPatterns {
    patterns: Vec<(EntityKind, Regex)>,
}

impl CompiledPatterns {
    /// Compile patterns. Skips invalid regexes with a warning.
    pub fn compile(patterns: &[EntityPattern]) -> Self {
        let mut compiled = Vec::new();
        for p in patterns {
            match RegexBuilder::new(p.pattern)
                .case_insensitive(p.case_insensitive)
                .build()
            {
                Ok(regex) => compiled.push((p.kind, regex)),
                Err(e) => warn!("Skipping invalid entity pattern {:?}: {}", p.kind, e),
            }
        }
        debug!("Compiled {} entity patterns", compiled.len());
        Self { patterns: compiled }
    }
}

fn key_entity_patterns() -> &'static CompiledPatterns {
    static PATTERNS: OnceLock<CompiledPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| CompiledPatterns::compile(KEY_ENTITY_PATTERNS))
}

/// Run the built-in patterns against `text`. Matches are deduplicated in
/// first-seen order. Locations are never inferred locally.
pub fn extract_key_entities(text: &str) -> KeyEntities {
    extract_with(text, key_entity_patterns())
}

fn extract_with(text: &str, compiled: &CompiledPatterns) -> KeyEntities {
    let mut entities = KeyEntities::default();

    for (kind, regex) in &compiled.patterns {
        let mut seen = HashSet::new();
        let values: Vec<String> = regex
            .find_iter(text)
            .map(|m| m.as_str().trim().to_string())
            .filter(|v| !v.is_empty() && seen.insert(v.clone()))
            .collect();

        let bucket = match kind {
            EntityKind::Name => &mut entities.names,
            EntityKind::Date => &mut entities.dates,
            EntityKind::Amount => &mut entities.amounts,
        };
        bucket.extend(values);
    }

    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_patterns() {
        let compiled = CompiledPatterns::compile(KEY_ENTITY_PATTERNS);
        assert_eq!(compiled.patterns.len(), 3);
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let compiled = CompiledPatterns::compile(&[EntityPattern {
            kind: EntityKind::Date,
            pattern: r"(unclosed",
            case_insensitive: false,
        }]);
        assert!(compiled.patterns.is_empty());
    }

    #[test]
    fn test_extract_from_text() {
        let text = "Applicant Mr. John Smith signed on 03/14/2024 and again 2024-03-15. \
                    Fee: $ 45.00, refund 12.50 usd. Witness Dr. Ana Lima, 03/14/2024.";
        let entities = extract_key_entities(text);

        assert_eq!(entities.names, vec!["Mr. John Smith", "Dr. Ana Lima"]);
        assert_eq!(entities.dates, vec!["03/14/2024", "2024-03-15"]);
        assert_eq!(entities.amounts, vec!["$ 45.00", "12.50 usd"]);
        assert!(entities.locations.is_empty());
    }

    #[test]
    fn test_no_matches() {
        assert!(extract_key_entities("nothing to see here").is_empty());
    }
}
