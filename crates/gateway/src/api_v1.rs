//! HTTP API v1: the session API behind the chat UI.
//!
//! Endpoints (all under `/v1`):
//!
//! - `POST   /sessions`                        Create a session
//! - `GET    /sessions/{id}`                   Session view (log, documents, errors)
//! - `GET    /sessions/{id}/phase`             Cycle phase, readable during a reply
//! - `DELETE /sessions/{id}`                   End a session
//! - `PUT    /sessions/{id}/credential`        Enter an API key, select a model
//! - `PUT    /sessions/{id}/mode`              Switch persona
//! - `POST   /sessions/{id}/documents`         Upload reference documents (multipart)
//! - `DELETE /sessions/{id}/documents`         Remove all documents
//! - `DELETE /sessions/{id}/documents/{name}`  Remove one document
//! - `GET    /sessions/{id}/models`            Diagnostic model listing
//! - `POST   /sessions/{id}/chat`              Send a message, get the reply
//! - `POST   /sessions/{id}/chat/stream`       Send a message, get an SSE stream

use axum::{
    Router,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::Json,
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use physiogold_agent::{PhaseHandle, Session, SessionView, TurnController, TurnEvent, TurnPhase};
use physiogold_config::AppConfig;
use physiogold_core::document::UploadedDocument;
use physiogold_core::error::{ProviderError, TurnError};
use physiogold_core::mode::Mode;
use physiogold_core::provider::{ModelDescriptor, ProviderFactory, Usage};
use physiogold_documents::{DocumentLoader, DocumentSummary, ExtractionWarning};
use physiogold_providers::{ModelSelector, Selection, SelectionSource};

// ── State ─────────────────────────────────────────────────────────────────

struct SessionEntry {
    created_at: DateTime<Utc>,
    phase: PhaseHandle,
    session: Arc<Mutex<Session>>,
}

/// Shared state for the v1 API.
pub struct ApiState {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    /// Live sessions before the oldest is evicted
    pub max_sessions: usize,
    pub factory: Arc<dyn ProviderFactory>,
    pub selector: ModelSelector,
    pub loader: DocumentLoader,
    pub controller: TurnController,
}

pub type SharedApiState = Arc<ApiState>;

impl ApiState {
    pub fn new(config: &AppConfig, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: config.gateway.max_sessions,
            factory,
            selector: ModelSelector::from_settings(&config.provider),
            loader: DocumentLoader::default(),
            controller: TurnController::from_config(config),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn insert(&self, session: Session) -> String {
        let id = session.id().to_string();
        let entry = SessionEntry {
            created_at: session.created_at(),
            phase: session.phase_handle(),
            session: Arc::new(Mutex::new(session)),
        };

        let mut sessions = self.sessions.write().await;

        // Evict oldest session if at capacity
        if sessions.len() >= self.max_sessions {
            if let Some(oldest_key) = sessions
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone())
            {
                sessions.remove(&oldest_key);
                info!(session = %oldest_key, "Evicted oldest session");
            }
        }

        sessions.insert(id.clone(), entry);
        id
    }

    async fn get(&self, id: &str) -> Result<Arc<Mutex<Session>>, ApiError> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|e| e.session.clone())
            .ok_or_else(|| not_found(id))
    }

    async fn phase(&self, id: &str) -> Result<TurnPhase, ApiError> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|e| e.phase.get())
            .ok_or_else(|| not_found(id))
    }
}

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/sessions", post(create_session_handler))
        .route(
            "/sessions/{id}",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/sessions/{id}/phase", get(phase_handler))
        .route("/sessions/{id}/credential", put(credential_handler))
        .route("/sessions/{id}/mode", put(mode_handler))
        .route(
            "/sessions/{id}/documents",
            post(upload_documents_handler).delete(clear_documents_handler),
        )
        .route(
            "/sessions/{id}/documents/{name}",
            axum::routing::delete(remove_document_handler),
        )
        .route("/sessions/{id}/models", get(list_models_handler))
        .route("/sessions/{id}/chat", post(chat_handler))
        .route("/sessions/{id}/chat/stream", post(chat_stream_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn not_found(id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("Session not found: {id}"))
}

fn turn_error(e: TurnError) -> ApiError {
    let status = match &e {
        TurnError::MissingCredential | TurnError::EmptyMessage => StatusCode::BAD_REQUEST,
        TurnError::Busy => StatusCode::CONFLICT,
        TurnError::Generation(_) => StatusCode::BAD_GATEWAY,
    };
    api_error(status, e.to_string())
}

fn provider_error(e: ProviderError) -> ApiError {
    let status = match &e {
        ProviderError::NotConfigured(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    api_error(status, e.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub id: String,
    pub mode: Mode,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct CredentialRequest {
    #[serde(default)]
    api_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialResponse {
    pub configured: bool,
    pub model: Option<String>,
    pub source: Option<SelectionSource>,
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: Mode,
}

#[derive(Serialize)]
struct ModeResponse {
    mode: Mode,
    label: &'static str,
}

#[derive(Debug, Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentSummary>,
    warnings: Vec<ExtractionWarning>,
    corpus_chars: usize,
}

impl DocumentsResponse {
    fn of(session: &Session) -> Self {
        let corpus = session.corpus();
        Self {
            documents: corpus.documents.clone(),
            warnings: corpus.warnings.clone(),
            corpus_chars: corpus.text.len(),
        }
    }
}

#[derive(Serialize)]
struct ModelListResponse {
    models: Vec<ModelDescriptor>,
    selection: Option<Selection>,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub model: String,
    pub turns: usize,
    #[serde(default)]
    pub usage: Option<Usage>,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn create_session_handler(
    State(state): State<SharedApiState>,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let session = Session::new();
    let mode = session.mode();
    let created_at = session.created_at();
    let id = state.insert(session).await;

    info!(session = %id, "Session created");
    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            id,
            mode,
            created_at,
        }),
    )
}

async fn get_session_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.get(&id).await?;
    // A running cycle holds the lock until the reply is complete
    let session = session.try_lock().map_err(|_| turn_error(TurnError::Busy))?;
    Ok(Json(session.view()))
}

#[derive(Serialize)]
struct PhaseResponse {
    phase: TurnPhase,
}

async fn phase_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<PhaseResponse>, ApiError> {
    let phase = state.phase(&id).await?;
    Ok(Json(PhaseResponse { phase }))
}

async fn delete_session_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> StatusCode {
    match state.sessions.write().await.remove(&id) {
        Some(_) => {
            info!(session = %id, "Session ended");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn credential_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(payload): Json<CredentialRequest>,
) -> Result<Json<CredentialResponse>, ApiError> {
    let session = state.get(&id).await?;
    let mut session = session.lock().await;

    let selection = session
        .configure_credential(&payload.api_key, state.factory.as_ref(), &state.selector)
        .await
        .map_err(provider_error)?;

    Ok(Json(match selection {
        Some(selection) => CredentialResponse {
            configured: true,
            model: Some(selection.model.to_string()),
            source: Some(selection.source),
        },
        None => CredentialResponse {
            configured: false,
            model: None,
            source: None,
        },
    }))
}

async fn mode_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(payload): Json<ModeRequest>,
) -> Result<Json<ModeResponse>, ApiError> {
    let session = state.get(&id).await?;
    session.lock().await.set_mode(payload.mode);
    Ok(Json(ModeResponse {
        mode: payload.mode,
        label: payload.mode.label(),
    }))
}

/// `POST /v1/sessions/{id}/documents`: every file field is added, in order.
async fn upload_documents_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<DocumentsResponse>, ApiError> {
    let session = state.get(&id).await?;

    let mut uploaded = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid upload: {e}")))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid upload: {e}")))?;
        uploaded.push(UploadedDocument::new(name, bytes.to_vec()));
    }

    if uploaded.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No files in upload"));
    }

    info!(session = %id, files = uploaded.len(), "Documents uploaded");
    let mut session = session.lock().await;
    session.add_documents(uploaded, &state.loader).await;
    Ok(Json(DocumentsResponse::of(&session)))
}

async fn clear_documents_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentsResponse>, ApiError> {
    let session = state.get(&id).await?;
    let mut session = session.lock().await;
    session.clear_documents();
    Ok(Json(DocumentsResponse::of(&session)))
}

async fn remove_document_handler(
    State(state): State<SharedApiState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<DocumentsResponse>, ApiError> {
    let session = state.get(&id).await?;
    let mut session = session.lock().await;
    if session.remove_document(&name, &state.loader).await == 0 {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Document not found: {name}"),
        ));
    }
    Ok(Json(DocumentsResponse::of(&session)))
}

async fn list_models_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<ModelListResponse>, ApiError> {
    let session = state.get(&id).await?;
    let session = session.lock().await;
    let models = session.available_models().await.map_err(provider_error)?;
    Ok(Json(ModelListResponse {
        models,
        selection: session.selection().cloned(),
    }))
}

async fn chat_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let session = state.get(&id).await?;
    let mut session = session.try_lock().map_err(|_| turn_error(TurnError::Busy))?;

    let outcome = state
        .controller
        .submit(&mut session, &payload.message)
        .await
        .map_err(turn_error)?;

    Ok(Json(ChatResponse {
        reply: outcome.reply,
        model: outcome.model.to_string(),
        turns: outcome.turns,
        usage: outcome.usage,
    }))
}

// ── SSE Streaming ─────────────────────────────────────────────────────────

/// `POST /v1/sessions/{id}/chat/stream`: `delta` events, then `done` or
/// `error`. The cycle runs to completion even if the client disconnects.
async fn chat_stream_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> Result<
    Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>,
    ApiError,
> {
    let session = state.get(&id).await?;
    let mut session = session
        .try_lock_owned()
        .map_err(|_| turn_error(TurnError::Busy))?;

    // Reject before opening the stream so these stay plain HTTP errors.
    if !session.is_configured() {
        return Err(turn_error(TurnError::MissingCredential));
    }
    if payload.message.trim().is_empty() {
        return Err(turn_error(TurnError::EmptyMessage));
    }

    let (tx, rx) = mpsc::channel::<TurnEvent>(64);
    let task_state = state.clone();
    tokio::spawn(async move {
        let result = task_state
            .controller
            .submit_streaming(&mut session, &payload.message, tx.clone())
            .await;
        // Unlock before the final event so a follow-up view is not refused
        drop(session);
        let last = match result {
            Ok(outcome) => outcome.done_event(),
            Err(e) => TurnEvent::Error {
                message: e.to_string(),
            },
        };
        if tx.send(last).await.is_err() {
            warn!("Client disconnected before the end of the stream");
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
