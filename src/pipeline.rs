//! Upload pipeline: image → remote analysis → best-effort enrichment.
//!
//! Only the file read and the analysis call can fail an upload. Summary,
//! suggestions, guidance translation and persistence are logged and dropped
//! on failure.

use std::io::Cursor;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::ImageFormat;
use tracing::{debug, info, warn};

use crate::document_ai::DocumentAnalyzer;
use crate::entities;
use crate::error::PipelineError;
use crate::openai::Summarizer;
use crate::schema::{
    DocumentAnalysisResult, DocumentSummary, FilledFieldMap, UploadedDocument, UserProfile,
};
use crate::suggestion::FieldSuggester;
use crate::supabase::{DocumentStore, NewAnalysis, NewDocument};
use crate::translation::Translator;

/// A file as received from the client.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Per-session inputs to a pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct UploadContext<'a> {
    pub user_id: Option<&'a str>,
    pub profile: Option<&'a UserProfile>,
    pub language: &'a str,
}

/// Everything a successful run hands to the session.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub document: UploadedDocument,
    pub analysis: DocumentAnalysisResult,
    pub summary: Option<DocumentSummary>,
    pub initial_values: FilledFieldMap,
    /// Row id of the persisted document, when persistence ran and succeeded.
    pub document_id: Option<String>,
}

/// Pipeline orchestrator.
pub struct Pipeline {
    analyzer: Arc<dyn DocumentAnalyzer>,
    summarizer: Arc<dyn Summarizer>,
    suggester: Arc<dyn FieldSuggester>,
    translator: Arc<dyn Translator>,
    store: Option<Arc<dyn DocumentStore>>,
}

impl Pipeline {
    pub fn new(
        analyzer: Arc<dyn DocumentAnalyzer>,
        summarizer: Arc<dyn Summarizer>,
        suggester: Arc<dyn FieldSuggester>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        Self {
            analyzer,
            summarizer,
            suggester,
            translator,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run the full pipeline for one upload.
    pub async fn process(
        &self,
        upload: RawUpload,
        ctx: UploadContext<'_>,
    ) -> Result<PipelineOutcome, PipelineError> {
        // 1. Read the file into a displayable image
        let document = read_image(upload)?;
        self.process_document(document, ctx).await
    }

    /// Run every step after the file read.
    pub async fn process_document(
        &self,
        document: UploadedDocument,
        ctx: UploadContext<'_>,
    ) -> Result<PipelineOutcome, PipelineError> {
        info!(
            "Processing {} ({}, {} bytes, {}x{})",
            document.file_name, document.mime_type, document.size_bytes, document.width, document.height
        );

        // 2. Remote analysis (fatal on failure)
        let mut analysis = self
            .analyzer
            .analyze(&document)
            .await
            .map_err(PipelineError::Analysis)?;

        if analysis.key_entities.is_empty() && !analysis.extracted_text.is_empty() {
            analysis.key_entities = entities::extract_key_entities(&analysis.extracted_text);
            debug!(
                "Filled key entities locally: {} names, {} dates, {} amounts",
                analysis.key_entities.names.len(),
                analysis.key_entities.dates.len(),
                analysis.key_entities.amounts.len()
            );
        }

        // 3. Summary (best effort)
        let summary = match self
            .summarizer
            .summarize(&analysis.extracted_text, &analysis.document_type, ctx.language)
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Summary generation failed: {:#}", e);
                None
            }
        };

        self.localize_guidance(&mut analysis, ctx.language).await;

        // 4. Profile suggestions, one field at a time
        let initial_values = match ctx.profile {
            Some(profile) => self.suggest_values(&analysis, profile).await,
            None => FilledFieldMap::new(),
        };

        // 5. Persistence (best effort, only with a signed-in user)
        let document_id = match (ctx.user_id, &self.store) {
            (Some(user_id), Some(store)) => {
                match persist(store.as_ref(), user_id, &document, &analysis, summary.as_ref()).await
                {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!("Persisting {} failed: {:#}", document.file_name, e);
                        None
                    }
                }
            }
            _ => None,
        };

        info!(
            "Pipeline complete for {}: {} fields, {} suggested, summary={}",
            document.file_name,
            analysis.detected_fields.len(),
            initial_values.len(),
            summary.is_some()
        );

        Ok(PipelineOutcome {
            document,
            analysis,
            summary,
            initial_values,
            document_id,
        })
    }

    async fn suggest_values(
        &self,
        analysis: &DocumentAnalysisResult,
        profile: &UserProfile,
    ) -> FilledFieldMap {
        let mut values = FilledFieldMap::new();
        for field in &analysis.detected_fields {
            match self.suggester.suggest(field, profile).await {
                Ok(value) if !value.is_empty() => {
                    values.insert(field.id.clone(), value);
                }
                Ok(_) => {}
                Err(e) => warn!("Suggestion for field {} failed: {:#}", field.id, e),
            }
        }
        values
    }

    async fn localize_guidance(&self, analysis: &mut DocumentAnalysisResult, language: &str) {
        let source = if analysis.language_detected.is_empty() {
            "en"
        } else {
            analysis.language_detected.as_str()
        };
        if source == language {
            return;
        }

        let guided: Vec<usize> = analysis
            .detected_fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.guidance.is_some())
            .map(|(i, _)| i)
            .collect();
        let texts: Vec<String> = guided
            .iter()
            .filter_map(|&i| analysis.detected_fields[i].guidance.clone())
            .collect();
        if texts.is_empty() {
            return;
        }

        let translated = self.translator.translate_batch(&texts, language, source).await;
        debug!("Localized {} guidance strings {} -> {}", translated.len(), source, language);
        for (i, text) in guided.into_iter().zip(translated) {
            analysis.detected_fields[i].guidance = Some(text);
        }
    }
}

/// Validate and probe an uploaded image, producing its data-URI form.
pub fn read_image(upload: RawUpload) -> Result<UploadedDocument, PipelineError> {
    if upload.data.is_empty() {
        return Err(PipelineError::FileRead("file is empty".to_string()));
    }

    let declared = upload
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream");

    if let Some(ct) = declared {
        if !ct.starts_with("image/") {
            return Err(PipelineError::FileRead(format!(
                "unsupported file type {}, expected an image",
                ct
            )));
        }
    }

    let reader = image::io::Reader::new(Cursor::new(&upload.data))
        .with_guessed_format()
        .map_err(|e| PipelineError::FileRead(e.to_string()))?;
    let format = reader.format();
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| PipelineError::FileRead(format!("not a readable image: {}", e)))?;

    let mime_type = match (declared, format) {
        (Some(ct), _) => ct.to_string(),
        (None, Some(f)) => mime_for(f).to_string(),
        (None, None) => {
            return Err(PipelineError::FileRead("unrecognized image format".to_string()))
        }
    };

    let data_uri = format!("data:{};base64,{}", mime_type, BASE64.encode(&upload.data));

    Ok(UploadedDocument {
        file_name: upload.file_name,
        mime_type,
        size_bytes: upload.data.len(),
        width,
        height,
        data_uri,
    })
}

fn mime_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::Ico => "image/x-icon",
        _ => "application/octet-stream",
    }
}

async fn persist(
    store: &dyn DocumentStore,
    user_id: &str,
    document: &UploadedDocument,
    analysis: &DocumentAnalysisResult,
    summary: Option<&DocumentSummary>,
) -> anyhow::Result<String> {
    let record = NewDocument {
        user_id: user_id.to_string(),
        file_name: document.file_name.clone(),
        file_path: format!(
            "{}/{}-{}",
            user_id,
            chrono::Utc::now().timestamp_millis(),
            document.file_name
        ),
        file_type: document.mime_type.clone(),
        file_size: document.size_bytes,
        status: "completed".to_string(),
    };
    let document_id = store.insert_document(&record).await?;

    let analysis_record = NewAnalysis {
        document_id: document_id.clone(),
        user_id: user_id.to_string(),
        document_type: analysis.document_type.clone(),
        confidence_score: analysis.confidence,
        extracted_text: analysis.extracted_text.clone(),
        detected_fields: serde_json::to_value(&analysis.detected_fields)?,
        key_entities: serde_json::to_value(&analysis.key_entities)?,
        summary: summary.map(|s| s.summary.clone()),
        language_detected: analysis.language_detected.clone(),
        processing_time: analysis.processing_time,
    };
    store.insert_analysis(&analysis_record).await?;

    info!("Persisted document {} for user {}", document_id, user_id);
    Ok(document_id)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::{BoundingBox, DetectedField, FieldType, Priority};
    use crate::suggestion::ProfileSuggester;
    use crate::translation::IdentityTranslator;
    use std::sync::Mutex;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    pub(crate) fn upload() -> RawUpload {
        RawUpload {
            file_name: "form.png".to_string(),
            content_type: Some("image/png".to_string()),
            data: png_bytes(40, 30),
        }
    }

    pub(crate) fn field(id: &str, label: &str) -> DetectedField {
        DetectedField {
            id: id.to_string(),
            label: label.to_string(),
            field_type: FieldType::Text,
            bounding_box: BoundingBox { x: 1.0, y: 1.0, width: 10.0, height: 5.0 },
            guidance: Some(format!("Enter {}", label)),
            confidence: 0.9,
            value: None,
        }
    }

    pub(crate) fn analysis(fields: Vec<DetectedField>) -> DocumentAnalysisResult {
        DocumentAnalysisResult {
            document_type: "application_form".to_string(),
            confidence: 0.88,
            extracted_text: "Applicant Mr. John Smith, dated 01/02/2024".to_string(),
            detected_fields: fields,
            key_entities: Default::default(),
            language_detected: "en".to_string(),
            processing_time: 12,
        }
    }

    pub(crate) struct FakeAnalyzer {
        pub result: Result<DocumentAnalysisResult, String>,
        pub payloads: Mutex<Vec<String>>,
    }

    impl FakeAnalyzer {
        pub(crate) fn ok(result: DocumentAnalysisResult) -> Self {
            Self { result: Ok(result), payloads: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl DocumentAnalyzer for FakeAnalyzer {
        async fn analyze(&self, document: &UploadedDocument) -> Result<DocumentAnalysisResult, String> {
            self.payloads
                .lock()
                .unwrap()
                .push(document.base64_payload().to_string());
            self.result.clone()
        }
    }

    pub(crate) struct FakeSummarizer {
        pub fail: bool,
    }

    #[async_trait::async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(&self, _text: &str, document_type: &str, _language: &str) -> anyhow::Result<DocumentSummary> {
            if self.fail {
                anyhow::bail!("OpenAI API error (429): rate limited");
            }
            Ok(DocumentSummary {
                summary: format!("A {}", document_type),
                key_points: vec![],
                action_items: vec![],
                priority: Priority::Low,
            })
        }
    }

    /// Records the order of suggestion requests and checks they never overlap.
    struct RecordingSuggester {
        calls: Mutex<Vec<String>>,
        in_flight: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl FieldSuggester for RecordingSuggester {
        async fn suggest(&self, field: &DetectedField, profile: &UserProfile) -> anyhow::Result<String> {
            {
                let mut busy = self.in_flight.lock().unwrap();
                assert!(!*busy, "suggestions must not run concurrently");
                *busy = true;
            }
            tokio::task::yield_now().await;
            self.calls.lock().unwrap().push(field.id.clone());
            *self.in_flight.lock().unwrap() = false;
            if field.id == "broken" {
                anyhow::bail!("lookup failed");
            }
            Ok(crate::suggestion::suggest(field, profile))
        }
    }

    #[derive(Default)]
    struct FakeStore {
        documents: Mutex<Vec<NewDocument>>,
        analyses: Mutex<Vec<NewAnalysis>>,
        fail_documents: bool,
    }

    #[async_trait::async_trait]
    impl DocumentStore for FakeStore {
        async fn insert_document(&self, record: &NewDocument) -> anyhow::Result<String> {
            if self.fail_documents {
                anyhow::bail!("Failed to insert document: 500");
            }
            self.documents.lock().unwrap().push(record.clone());
            Ok("doc-1".to_string())
        }

        async fn insert_analysis(&self, record: &NewAnalysis) -> anyhow::Result<()> {
            self.analyses.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn fetch_profile(&self, _user_id: &str) -> anyhow::Result<Option<UserProfile>> {
            Ok(None)
        }

        async fn upsert_profile(&self, _user_id: &str, _profile: &UserProfile) -> anyhow::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn pipeline(analyzer: FakeAnalyzer, summary_fails: bool) -> Pipeline {
        Pipeline::new(
            Arc::new(analyzer),
            Arc::new(FakeSummarizer { fail: summary_fails }),
            Arc::new(ProfileSuggester),
            Arc::new(IdentityTranslator),
        )
    }

    fn ctx<'a>(profile: Option<&'a UserProfile>, user_id: Option<&'a str>) -> UploadContext<'a> {
        UploadContext { user_id, profile, language: "en" }
    }

    fn jane() -> UserProfile {
        UserProfile {
            full_name: Some("Jane Doe".to_string()),
            email: Some("jane@example.com".to_string()),
            ..UserProfile::default()
        }
    }

    #[test]
    fn test_read_image_builds_data_uri() {
        let doc = read_image(upload()).unwrap();
        assert_eq!(doc.mime_type, "image/png");
        assert_eq!((doc.width, doc.height), (40, 30));
        assert!(doc.data_uri.starts_with("data:image/png;base64,"));
        assert_eq!(
            BASE64.decode(doc.base64_payload()).unwrap(),
            png_bytes(40, 30)
        );
    }

    #[test]
    fn test_read_image_guesses_missing_mime() {
        let mut raw = upload();
        raw.content_type = None;
        assert_eq!(read_image(raw).unwrap().mime_type, "image/png");
    }

    #[test]
    fn test_read_image_rejects_bad_input() {
        let mut empty = upload();
        empty.data.clear();
        assert!(matches!(read_image(empty), Err(PipelineError::FileRead(_))));

        let mut pdf = upload();
        pdf.content_type = Some("application/pdf".to_string());
        assert!(matches!(read_image(pdf), Err(PipelineError::FileRead(_))));

        let mut garbage = upload();
        garbage.data = b"definitely not an image".to_vec();
        assert!(matches!(read_image(garbage), Err(PipelineError::FileRead(_))));
    }

    #[tokio::test]
    async fn test_analysis_receives_payload_without_prefix() {
        let analyzer = Arc::new(FakeAnalyzer::ok(analysis(vec![])));
        let pipeline = Pipeline::new(
            analyzer.clone(),
            Arc::new(FakeSummarizer { fail: false }),
            Arc::new(ProfileSuggester),
            Arc::new(IdentityTranslator),
        );
        pipeline.process(upload(), ctx(None, None)).await.unwrap();

        let payloads = analyzer.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert!(!payloads[0].starts_with("data:"));
    }

    #[tokio::test]
    async fn test_analysis_failure_is_fatal() {
        let analyzer = FakeAnalyzer {
            result: Err("Image too large".to_string()),
            payloads: Mutex::new(Vec::new()),
        };
        let err = pipeline(analyzer, false)
            .process(upload(), ctx(None, None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Processing failed: Image too large");
    }

    #[tokio::test]
    async fn test_summary_failure_keeps_fields() {
        let fields = vec![field("f1", "Full Name"), field("f2", "Date")];
        let outcome = pipeline(FakeAnalyzer::ok(analysis(fields.clone())), true)
            .process(upload(), ctx(None, None))
            .await
            .unwrap();

        assert!(outcome.summary.is_none());
        assert_eq!(outcome.analysis.detected_fields, fields);
    }

    #[tokio::test]
    async fn test_summary_attached_on_success() {
        let outcome = pipeline(FakeAnalyzer::ok(analysis(vec![])), false)
            .process(upload(), ctx(None, None))
            .await
            .unwrap();
        assert_eq!(outcome.summary.unwrap().summary, "A application_form");
    }

    #[tokio::test]
    async fn test_key_entities_filled_locally_when_empty() {
        let outcome = pipeline(FakeAnalyzer::ok(analysis(vec![])), false)
            .process(upload(), ctx(None, None))
            .await
            .unwrap();
        assert_eq!(outcome.analysis.key_entities.names, vec!["Mr. John Smith"]);
        assert_eq!(outcome.analysis.key_entities.dates, vec!["01/02/2024"]);
    }

    #[tokio::test]
    async fn test_suggestions_only_with_profile_and_non_empty() {
        let fields = vec![
            field("f1", "Full Name"),
            field("f2", "Signature"),
            field("f3", "Email"),
        ];
        let p = pipeline(FakeAnalyzer::ok(analysis(fields)), false);

        let without = p.process(upload(), ctx(None, None)).await.unwrap();
        assert!(without.initial_values.is_empty());

        let profile = jane();
        let with = p.process(upload(), ctx(Some(&profile), None)).await.unwrap();
        assert_eq!(with.initial_values.len(), 2);
        assert_eq!(with.initial_values["f1"], "Jane Doe");
        assert_eq!(with.initial_values["f3"], "jane@example.com");
        assert!(!with.initial_values.contains_key("f2"));
    }

    #[tokio::test]
    async fn test_suggestions_run_sequentially_in_field_order() {
        let fields = vec![
            field("a", "Name"),
            field("broken", "Email"),
            field("c", "Email"),
        ];
        let suggester = Arc::new(RecordingSuggester {
            calls: Mutex::new(Vec::new()),
            in_flight: Mutex::new(false),
        });
        let p = Pipeline::new(
            Arc::new(FakeAnalyzer::ok(analysis(fields))),
            Arc::new(FakeSummarizer { fail: false }),
            suggester.clone(),
            Arc::new(IdentityTranslator),
        );
        let profile = jane();
        let outcome = p.process(upload(), ctx(Some(&profile), None)).await.unwrap();

        assert_eq!(*suggester.calls.lock().unwrap(), vec!["a", "broken", "c"]);
        assert_eq!(outcome.initial_values.len(), 2);
        assert!(!outcome.initial_values.contains_key("broken"));
    }

    struct ShoutingTranslator;

    #[async_trait::async_trait]
    impl Translator for ShoutingTranslator {
        async fn translate(&self, text: &str, target: &str, _source: &str) -> String {
            format!("[{}] {}", target, text.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_guidance_localized_only_for_other_languages() {
        let mut unguided = field("f2", "Date");
        unguided.guidance = None;
        let fields = vec![field("f1", "Name"), unguided];
        let p = Pipeline::new(
            Arc::new(FakeAnalyzer::ok(analysis(fields))),
            Arc::new(FakeSummarizer { fail: false }),
            Arc::new(ProfileSuggester),
            Arc::new(ShoutingTranslator),
        );

        let same = p.process(upload(), ctx(None, None)).await.unwrap();
        assert_eq!(
            same.analysis.detected_fields[0].guidance.as_deref(),
            Some("Enter Name")
        );

        let spanish = UploadContext { user_id: None, profile: None, language: "es" };
        let outcome = p.process(upload(), spanish).await.unwrap();
        assert_eq!(
            outcome.analysis.detected_fields[0].guidance.as_deref(),
            Some("[es] ENTER NAME")
        );
        assert_eq!(outcome.analysis.detected_fields[1].guidance, None);
    }

    #[tokio::test]
    async fn test_persistence_links_analysis_to_inserted_document() {
        let store = Arc::new(FakeStore::default());
        let p = pipeline(FakeAnalyzer::ok(analysis(vec![field("f1", "Name")])), false)
            .with_store(store.clone());

        let anonymous = p.process(upload(), ctx(None, None)).await.unwrap();
        assert!(anonymous.document_id.is_none());
        assert!(store.documents.lock().unwrap().is_empty());

        let outcome = p.process(upload(), ctx(None, Some("user-1"))).await.unwrap();
        assert_eq!(outcome.document_id.as_deref(), Some("doc-1"));

        let documents = store.documents.lock().unwrap();
        assert_eq!(documents[0].file_name, "form.png");
        assert!(documents[0].file_path.starts_with("user-1/"));
        assert!(documents[0].file_path.ends_with("-form.png"));
        assert_eq!(documents[0].status, "completed");

        let analyses = store.analyses.lock().unwrap();
        assert_eq!(analyses[0].document_id, "doc-1");
        assert_eq!(analyses[0].summary.as_deref(), Some("A application_form"));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_surfaced() {
        let store = Arc::new(FakeStore {
            fail_documents: true,
            ..FakeStore::default()
        });
        let p = pipeline(FakeAnalyzer::ok(analysis(vec![field("f1", "Name")])), false)
            .with_store(store.clone());

        let outcome = p.process(upload(), ctx(None, Some("user-1"))).await.unwrap();
        assert!(outcome.document_id.is_none());
        assert_eq!(outcome.analysis.detected_fields.len(), 1);
        assert!(store.analyses.lock().unwrap().is_empty());
    }
}
