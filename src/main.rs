//! Form Digitizer - turns a photographed paper form into a guided, fillable
//! review session with exports.

mod config;
mod document_ai;
mod entities;
mod error;
mod export;
mod openai;
mod overlay;
mod pipeline;
mod schema;
mod session;
mod suggestion;
mod supabase;
mod translation;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use config::AppConfig;
use document_ai::DocumentAiClient;
use error::AppError;
use export::ExportFormat;
use openai::OpenAiClient;
use pipeline::{Pipeline, RawUpload};
use schema::UserProfile;
use session::{
    run_upload, Action, Review, Session, SessionStore, SessionView, SharedSession, UploadResult,
};
use suggestion::ProfileSuggester;
use supabase::{DocumentStore, SupabaseClient};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use translation::{IdentityTranslator, Language, SUPPORTED_LANGUAGES};
use uuid::Uuid;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    sessions: SessionStore,
    pipeline: Arc<Pipeline>,
    store: Arc<dyn DocumentStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "form_digitizer=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Credentials are checked before any network call
    let config = AppConfig::from_env()?;
    info!(
        "Configuration loaded: supabase={}, model={}",
        config.supabase.url, config.openai.model
    );

    let http = reqwest::Client::new();
    let store: Arc<dyn DocumentStore> = Arc::new(SupabaseClient::new(http.clone(), &config.supabase));

    let pipeline = Pipeline::new(
        Arc::new(DocumentAiClient::new(http.clone(), &config.supabase)),
        Arc::new(OpenAiClient::new(http, &config.openai)),
        Arc::new(ProfileSuggester),
        Arc::new(IdentityTranslator),
    )
    .with_store(store.clone());

    let sessions = SessionStore::new();
    tokio::spawn(sessions.clone().run_idle_sweep(config.session_idle_timeout));
    info!(
        "Idle sessions expire after {} minutes",
        config.session_idle_timeout.as_secs() / 60
    );

    let state = AppState {
        sessions,
        pipeline: Arc::new(pipeline),
        store,
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/languages", get(list_languages))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/document", get(get_document))
        .route("/sessions/:id/upload", post(upload_document))
        .route("/sessions/:id/actions", post(apply_action))
        .route("/sessions/:id/profile", get(get_profile).put(put_profile))
        .route("/sessions/:id/export/:format", get(export_session))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

async fn list_languages() -> Json<&'static [Language]> {
    Json(SUPPORTED_LANGUAGES)
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    user_id: Option<String>,
    language: Option<String>,
}

/// Open a session, loading the user's profile when a user id is given.
/// An empty body opens an anonymous session.
async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SessionView>, AppError> {
    let request = parse_session_request(&body)?;
    let mut session = Session::new(request.user_id, request.language);

    if let Some(user_id) = session.user_id.clone() {
        match state.store.fetch_profile(&user_id).await {
            Ok(Some(profile)) => session.set_profile(profile),
            Ok(None) => debug!("No profile stored for user {}", user_id),
            Err(e) => warn!("Loading profile for user {} failed: {:#}", user_id, e),
        }
    }

    let view = session.view();
    state.sessions.insert(session);
    Ok(Json(view))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = find_session(&state, id)?;
    let view = session.lock().await.view();
    Ok(Json(view))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(&id) {
        info!("Deleted session {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::SessionNotFound(id.to_string()))
    }
}

/// Serve the image currently under review.
async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let session = find_session(&state, id)?;
    let guard = session.lock().await;
    let review = under_review(&guard)?;

    let bytes = BASE64
        .decode(review.document.base64_payload())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Stored image is corrupt: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, review.document.mime_type.clone())], bytes).into_response())
}

/// Upload an image and run it through the pipeline.
async fn upload_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<UploadResult>, AppError> {
    let session = find_session(&state, id)?;

    // Read the uploaded file
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("document").to_string();
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await?.to_vec();
            upload = Some(RawUpload { file_name, content_type, data });
            break;
        }
    }
    let upload = upload.ok_or_else(|| AppError::BadRequest("No file uploaded".to_string()))?;

    info!(
        "Session {}: received {} ({} bytes)",
        id,
        upload.file_name,
        upload.data.len()
    );

    let result = run_upload(&session, &state.pipeline, upload).await?;
    Ok(Json(result))
}

async fn apply_action(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(action): Json<Action>,
) -> Result<Json<SessionView>, AppError> {
    let session = find_session(&state, id)?;
    let mut guard = session.lock().await;
    debug!("Session {}: applying {:?}", id, action);
    guard.apply(action);
    Ok(Json(guard.view()))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Option<UserProfile>>, AppError> {
    let session = find_session(&state, id)?;
    let profile = session.lock().await.profile.clone();
    Ok(Json(profile))
}

/// Replace the session profile, saving it for signed-in users.
async fn put_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<SessionView>, AppError> {
    let session = find_session(&state, id)?;

    let user_id = session.lock().await.user_id.clone();
    if let Some(user_id) = user_id {
        state.store.upsert_profile(&user_id, &profile).await?;
    }

    let mut guard = session.lock().await;
    guard.set_profile(profile);
    Ok(Json(guard.view()))
}

async fn export_session(
    State(state): State<AppState>,
    Path((id, format)): Path<(Uuid, String)>,
) -> Result<Response, AppError> {
    let format: ExportFormat = format.parse().map_err(AppError::BadRequest)?;

    let session = find_session(&state, id)?;
    let guard = session.lock().await;
    let review = under_review(&guard)?;

    let document_name = &review.document.file_name;
    let body = export::render(format, &review.fields, &review.filled, document_name)?;
    info!("Session {}: exported {:?} for {}", id, format, document_name);

    let mut response = ([(header::CONTENT_TYPE, format.content_type())], body).into_response();
    if let Some(file_name) = format.file_name(document_name) {
        let disposition = format!("attachment; filename=\"{}\"", header_safe(&file_name));
        if let Ok(value) = disposition.parse() {
            response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
        }
    }
    Ok(response)
}

// ============================================================================
// Helper functions
// ============================================================================

fn find_session(state: &AppState, id: Uuid) -> Result<SharedSession, AppError> {
    state
        .sessions
        .get(&id)
        .ok_or_else(|| AppError::SessionNotFound(id.to_string()))
}

fn under_review(session: &Session) -> Result<&Review, AppError> {
    session
        .review
        .review()
        .ok_or_else(|| AppError::NotFound("No document under review".to_string()))
}

fn parse_session_request(body: &[u8]) -> Result<CreateSessionRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateSessionRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid session request: {}", e)))
}

/// Replace characters that cannot appear in a quoted header parameter.
fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
