//! Supported UI languages and the translation seam.
//!
//! No translation backend is wired up: [`IdentityTranslator`] returns its
//! input unchanged.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
    pub native_name: &'static str,
}

pub const SUPPORTED_LANGUAGES: &[Language] = &[
    Language { code: "en", name: "English", native_name: "English" },
    Language { code: "es", name: "Spanish", native_name: "Español" },
    Language { code: "fr", name: "French", native_name: "Français" },
    Language { code: "de", name: "German", native_name: "Deutsch" },
    Language { code: "it", name: "Italian", native_name: "Italiano" },
    Language { code: "pt", name: "Portuguese", native_name: "Português" },
    Language { code: "ru", name: "Russian", native_name: "Русский" },
    Language { code: "ja", name: "Japanese", native_name: "日本語" },
    Language { code: "ko", name: "Korean", native_name: "한국어" },
    Language { code: "zh", name: "Chinese", native_name: "中文" },
    Language { code: "ar", name: "Arabic", native_name: "العربية" },
    Language { code: "hi", name: "Hindi", native_name: "हिन्दी" },
    Language { code: "bn", name: "Bengali", native_name: "বাংলা" },
    Language { code: "ur", name: "Urdu", native_name: "اردو" },
    Language { code: "tr", name: "Turkish", native_name: "Türkçe" },
];

pub fn find_language(code: &str) -> Option<&'static Language> {
    SUPPORTED_LANGUAGES.iter().find(|l| l.code == code)
}

pub fn is_supported(code: &str) -> bool {
    find_language(code).is_some()
}

/// English name for a language code, or the code itself when unknown.
pub fn language_name(code: &str) -> &str {
    find_language(code).map(|l| l.name).unwrap_or(code)
}

#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target: &str, source: &str) -> String;

    async fn translate_batch(&self, texts: &[String], target: &str, source: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.translate(text, target, source).await);
        }
        out
    }
}

pub struct IdentityTranslator;

#[async_trait::async_trait]
impl Translator for IdentityTranslator {
    async fn translate(&self, text: &str, _target: &str, _source: &str) -> String {
        text.to_string()
    }
}
