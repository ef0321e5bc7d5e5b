//! Review sessions: the field navigation/fill state machine and its store.
//!
//! `ReviewState::reduce` is the only place review state changes. Sessions are
//! held behind an async mutex; uploads carry a fencing token so a slow,
//! superseded upload can never overwrite a newer one. Idle sessions are
//! evicted by a periodic sweep.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::overlay::{render_overlays, Overlay};
use crate::pipeline::{read_image, Pipeline, PipelineOutcome, RawUpload, UploadContext};
use crate::schema::{
    DetectedField, DocumentAnalysisResult, DocumentSummary, FilledFieldMap, KeyEntities,
    UploadedDocument, UserProfile,
};
use crate::suggestion;
use crate::translation;

/// Document under review.
#[derive(Debug, Clone)]
pub struct Review {
    pub document: UploadedDocument,
    /// Analysis without its field list, which lives in `fields`.
    pub analysis: DocumentAnalysisResult,
    pub fields: Vec<DetectedField>,
    pub summary: Option<DocumentSummary>,
    pub selected_index: usize,
    pub filled: FilledFieldMap,
    pub document_id: Option<String>,
}

impl Review {
    fn from_outcome(outcome: PipelineOutcome) -> Self {
        let PipelineOutcome {
            document,
            mut analysis,
            summary,
            initial_values,
            document_id,
        } = outcome;
        let fields = std::mem::take(&mut analysis.detected_fields);
        Self {
            document,
            analysis,
            fields,
            summary,
            selected_index: 0,
            filled: initial_values,
            document_id,
        }
    }

    pub fn current_field(&self) -> Option<&DetectedField> {
        self.fields.get(self.selected_index)
    }

    pub fn progress(&self) -> Progress {
        Progress::of(&self.fields, &self.filled)
    }

    pub fn overlays(&self) -> Vec<Overlay> {
        render_overlays(
            &self.fields,
            self.current_field().map(|f| f.id.as_str()),
            &self.filled,
            (self.document.width, self.document.height),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub enum ReviewState {
    #[default]
    NoDocument,
    Reviewing(Box<Review>),
}

/// Transitions of the review state machine.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    /// Replace whatever is under review with a pipeline result.
    #[serde(skip)]
    Load(Box<PipelineOutcome>),
    SelectField { id: String },
    Next,
    Previous,
    SetValue { value: String },
    Clear,
    ApplySuggestion,
    SetLanguage { code: String },
    StartOver,
}

impl ReviewState {
    pub fn review(&self) -> Option<&Review> {
        match self {
            ReviewState::NoDocument => None,
            ReviewState::Reviewing(review) => Some(review),
        }
    }

    /// Apply `action`. Returns whether the state changed; actions that do not
    /// apply in the current state are no-ops.
    pub fn reduce(&mut self, action: Action) -> bool {
        match action {
            Action::Load(outcome) => {
                *self = ReviewState::Reviewing(Box::new(Review::from_outcome(*outcome)));
                return true;
            }
            Action::StartOver => {
                let changed = matches!(self, ReviewState::Reviewing(_));
                *self = ReviewState::NoDocument;
                return changed;
            }
            _ => {}
        }

        let review = match self {
            ReviewState::NoDocument => return false,
            ReviewState::Reviewing(review) => review,
        };

        match action {
            Action::SelectField { id } => match review.fields.iter().position(|f| f.id == id) {
                Some(index) if index != review.selected_index => {
                    review.selected_index = index;
                    true
                }
                _ => false,
            },
            Action::Next => {
                if review.selected_index + 1 < review.fields.len() {
                    review.selected_index += 1;
                    true
                } else {
                    false
                }
            }
            Action::Previous => {
                if review.selected_index > 0 {
                    review.selected_index -= 1;
                    true
                } else {
                    false
                }
            }
            Action::SetValue { value } => match review.fields.get(review.selected_index) {
                Some(field) => {
                    let id = field.id.clone();
                    review.filled.insert(id, value);
                    true
                }
                None => false,
            },
            Action::Clear => match review.fields.get(review.selected_index) {
                Some(field) => {
                    let id = field.id.clone();
                    review.filled.remove(&id).is_some()
                }
                None => false,
            },
            // Session-level actions; the session resolves them before reducing.
            Action::ApplySuggestion | Action::SetLanguage { .. } => false,
            Action::Load(_) | Action::StartOver => false,
        }
    }
}

/// Filled/total counts. A key counts as filled even with an empty value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub filled: usize,
    pub total: usize,
    pub percent: u32,
}

impl Progress {
    pub fn of(fields: &[DetectedField], filled: &FilledFieldMap) -> Self {
        let total = fields.len();
        let count = fields.iter().filter(|f| filled.contains_key(&f.id)).count();
        let percent = if total == 0 {
            0
        } else {
            ((count as f64 / total as f64) * 100.0).round() as u32
        };
        Self {
            filled: count,
            total,
            percent,
        }
    }
}

/// Server-side state for one client.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub profile: Option<UserProfile>,
    pub language: String,
    pub review: ReviewState,
    upload_token: u64,
}

impl Session {
    pub fn new(user_id: Option<String>, language: Option<String>) -> Self {
        let language = language
            .filter(|code| translation::is_supported(code))
            .unwrap_or_else(|| "en".to_string());
        Self {
            id: Uuid::new_v4(),
            user_id,
            profile: None,
            language,
            review: ReviewState::NoDocument,
            upload_token: 0,
        }
    }

    /// Attach a profile; its preferred language becomes the session language.
    pub fn set_profile(&mut self, profile: UserProfile) {
        if translation::is_supported(&profile.preferred_language) {
            self.language = profile.preferred_language.clone();
        }
        self.profile = Some(profile);
    }

    /// Apply a client action, resolving session-level actions first.
    pub fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::SetLanguage { code } => {
                if translation::is_supported(&code) && code != self.language {
                    self.language = code;
                    true
                } else {
                    false
                }
            }
            Action::ApplySuggestion => {
                let value = match (&self.profile, self.review.review()) {
                    (Some(profile), Some(review)) => review
                        .current_field()
                        .map(|field| suggestion::suggest(field, profile))
                        .unwrap_or_default(),
                    _ => String::new(),
                };
                if value.is_empty() {
                    return false;
                }
                self.review.reduce(Action::SetValue { value })
            }
            other => self.review.reduce(other),
        }
    }

    /// Start a new upload and return its fencing token.
    pub fn begin_upload(&mut self) -> u64 {
        self.upload_token += 1;
        debug!("Session {}: upload token {}", self.id, self.upload_token);
        self.upload_token
    }

    /// Load `outcome` if `token` still belongs to the latest upload.
    pub fn complete_upload(&mut self, token: u64, outcome: PipelineOutcome) -> bool {
        if token != self.upload_token {
            warn!(
                "Session {}: discarding result of superseded upload {} (latest {})",
                self.id, token, self.upload_token
            );
            return false;
        }
        self.review.reduce(Action::Load(Box::new(outcome)))
    }

    pub fn view(&self) -> SessionView {
        let review = self.review.review();
        let current_field = review.and_then(|r| r.current_field()).cloned();
        let current_value = match (review, &current_field) {
            (Some(r), Some(f)) => r.filled.get(&f.id).cloned().unwrap_or_default(),
            _ => String::new(),
        };
        let suggestion = match (&self.profile, &current_field) {
            (Some(profile), Some(field)) => {
                Some(suggestion::suggest(field, profile)).filter(|s| !s.is_empty())
            }
            _ => None,
        };

        SessionView {
            session_id: self.id,
            state: if review.is_some() { "reviewing" } else { "noDocument" },
            language: self.language.clone(),
            has_profile: self.profile.is_some(),
            document: review.map(|r| r.document.clone()),
            document_id: review.and_then(|r| r.document_id.clone()),
            document_type: review.map(|r| r.analysis.document_type.clone()),
            language_detected: review.map(|r| r.analysis.language_detected.clone()),
            key_entities: review.map(|r| r.analysis.key_entities.clone()),
            fields: review.map(|r| r.fields.clone()).unwrap_or_default(),
            selected_index: review.map(|r| r.selected_index).unwrap_or(0),
            current_field,
            current_value,
            suggestion,
            filled_fields: review.map(|r| r.filled.clone()).unwrap_or_default(),
            progress: review
                .map(|r| r.progress())
                .unwrap_or(Progress { filled: 0, total: 0, percent: 0 }),
            overlays: review.map(|r| r.overlays()).unwrap_or_default(),
            summary: review.and_then(|r| r.summary.clone()),
        }
    }
}

/// Outcome of [`run_upload`] as returned to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    /// True when a newer upload started while this one ran; the view then
    /// shows the newer state, not this upload's result.
    pub superseded: bool,
    #[serde(flatten)]
    pub view: SessionView,
}

/// Run `upload` through `pipeline` and load the result into `session`.
///
/// The session lock is held only to take the fencing token and to apply the
/// outcome. A file that cannot be read fails before a token is taken, so it
/// never supersedes an upload already in flight.
pub async fn run_upload(
    session: &SharedSession,
    pipeline: &Pipeline,
    upload: RawUpload,
) -> Result<UploadResult, PipelineError> {
    let document = read_image(upload)?;

    let (token, user_id, profile, language) = {
        let mut guard = session.lock().await;
        (
            guard.begin_upload(),
            guard.user_id.clone(),
            guard.profile.clone(),
            guard.language.clone(),
        )
    };

    let ctx = UploadContext {
        user_id: user_id.as_deref(),
        profile: profile.as_ref(),
        language: &language,
    };
    let outcome = pipeline.process_document(document, ctx).await?;

    let mut guard = session.lock().await;
    let applied = guard.complete_upload(token, outcome);
    Ok(UploadResult {
        superseded: !applied,
        view: guard.view(),
    })
}

/// Snapshot of a session returned to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: &'static str,
    pub language: String,
    pub has_profile: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<UploadedDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_detected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_entities: Option<KeyEntities>,
    pub fields: Vec<DetectedField>,
    pub selected_index: usize,
    pub current_field: Option<DetectedField>,
    pub current_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub filled_fields: FilledFieldMap,
    pub progress: Progress,
    pub overlays: Vec<Overlay>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<DocumentSummary>,
}

pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Debug)]
struct Slot {
    session: SharedSession,
    last_seen: Instant,
}

/// In-memory registry of sessions. Every lookup refreshes the session's
/// idle clock.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Slot>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) -> SharedSession {
        let id = session.id;
        let shared = Arc::new(Mutex::new(session));
        let slot = Slot {
            session: shared.clone(),
            last_seen: Instant::now(),
        };
        let active = {
            let mut map = self.write();
            map.insert(id, slot);
            map.len()
        };
        info!("SessionStore: created session {} ({} active)", id, active);
        shared
    }

    pub fn get(&self, id: &Uuid) -> Option<SharedSession> {
        self.write().get_mut(id).map(|slot| {
            slot.last_seen = Instant::now();
            slot.session.clone()
        })
    }

    /// Remove a session. Returns true if it existed.
    pub fn remove(&self, id: &Uuid) -> bool {
        self.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Drop sessions not looked up within `max_idle`. Returns how many went.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.evict_idle_at(Instant::now(), max_idle)
    }

    fn evict_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        let mut map = self.write();
        let before = map.len();
        map.retain(|id, slot| {
            let keep = now.saturating_duration_since(slot.last_seen) < max_idle;
            if !keep {
                debug!("SessionStore: evicting idle session {}", id);
            }
            keep
        });
        before - map.len()
    }

    /// Evict idle sessions forever, checking four times per `max_idle`.
    pub async fn run_idle_sweep(self, max_idle: Duration) {
        let period = (max_idle / 4).max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = self.evict_idle(max_idle);
            if evicted > 0 {
                info!(
                    "SessionStore: evicted {} idle sessions ({} active)",
                    evicted,
                    self.len()
                );
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Slot>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Slot>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
