use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::analysis::{analyze_image, ImageAnalysis};
use crate::backend::GenerativeBackend;
use crate::chat::{ChatMessage, SYSTEM_INSTRUCTION};
use crate::image_data::ImagePayload;
use crate::refine::{refine_description, StyleFilter};
use crate::remix::remix_image;
use crate::session::{Operation, Session, SessionEvent, Step};

type SharedSession = Arc<Mutex<Session>>;

pub struct AppState {
    backend: Arc<dyn GenerativeBackend>,
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
}

impl AppState {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/session", post(create_session))
        .route("/api/session/:id", get(get_session))
        .route("/api/session/:id/image", post(upload_image))
        .route("/api/session/:id/refine", post(refine))
        .route("/api/session/:id/filter", post(apply_filter))
        .route("/api/session/:id/remix", post(remix))
        .route("/api/session/:id/chat", post(chat_turn))
        .route("/api/session/:id/reset", post(reset))
        .route("/api/session/:id/export", get(export))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

#[derive(Debug)]
enum ApiError {
    UnknownSession,
    InvalidImage,
    WrongStep(&'static str),
    Busy(&'static str),
    SessionWasReset,
    AnalysisFailed,
    RefineFailed,
    RemixFailed(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::UnknownSession => (StatusCode::NOT_FOUND, "unknown session".to_string()),
            ApiError::InvalidImage => (
                StatusCode::BAD_REQUEST,
                "the uploaded payload is not a readable image".to_string(),
            ),
            ApiError::WrongStep(msg) => (StatusCode::CONFLICT, msg.to_string()),
            ApiError::Busy(msg) => (StatusCode::CONFLICT, msg.to_string()),
            ApiError::SessionWasReset => {
                (StatusCode::CONFLICT, "the session was reset".to_string())
            }
            ApiError::AnalysisFailed => (
                StatusCode::BAD_GATEWAY,
                "We couldn't analyze this image. Please try again.".to_string(),
            ),
            ApiError::RefineFailed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "The description couldn't be updated. Your text is unchanged.".to_string(),
            ),
            ApiError::RemixFailed(cause) => {
                (StatusCode::BAD_GATEWAY, format!("Remix failed: {cause}"))
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Full session snapshot the front end renders from.
#[derive(Serialize)]
struct Snapshot {
    id: Uuid,
    step: Step,
    image: Option<String>,
    analysis: Option<ImageAnalysis>,
    description: String,
    chat: Vec<ChatMessage>,
}

fn snapshot(session: &Session) -> Snapshot {
    let state = session.state();
    Snapshot {
        id: session.id,
        step: state.step,
        image: state.image.as_ref().map(ImagePayload::to_data_uri),
        analysis: state.analysis.clone(),
        description: state.description.clone(),
        chat: session.chat.messages().to_vec(),
    }
}

async fn lookup(state: &AppState, id: Uuid) -> Result<SharedSession, ApiError> {
    state
        .sessions
        .read()
        .await
        .get(&id)
        .cloned()
        .ok_or(ApiError::UnknownSession)
}

async fn create_session(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    let session = Session::new();
    let id = session.id;
    let shot = snapshot(&session);
    state
        .sessions
        .write()
        .await
        .insert(id, Arc::new(Mutex::new(session)));
    tracing::info!(%id, "session created");
    Json(shot)
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Snapshot>, ApiError> {
    let session = lookup(&state, id).await?;
    let session = session.lock().await;
    Ok(Json(snapshot(&session)))
}

#[derive(Deserialize)]
struct UploadRequest {
    image: String,
}

/// Formats the `image` crate can actually decode; HEIC/HEIF uploads
/// skip the decode check.
fn decodable(mime: &str) -> bool {
    matches!(mime, "image/png" | "image/jpeg" | "image/jpg" | "image/webp")
}

fn validate_payload(payload: &ImagePayload) -> Result<(), ApiError> {
    let bytes = BASE64
        .decode(payload.data.as_bytes())
        .map_err(|_| ApiError::InvalidImage)?;
    if decodable(&payload.mime_type) {
        image::load_from_memory(&bytes).map_err(|_| ApiError::InvalidImage)?;
    }
    Ok(())
}

async fn upload_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<Snapshot>, ApiError> {
    let payload = ImagePayload::from_data_uri(&request.image);
    validate_payload(&payload)?;

    let shared = lookup(&state, id).await?;
    let epoch;
    {
        let mut session = shared.lock().await;
        if session.state().step != Step::Upload {
            return Err(ApiError::WrongStep("reset the session before a new upload"));
        }
        session.handle(SessionEvent::ImageSelected(payload.clone()));
        epoch = session.epoch();
    }

    let result = analyze_image(state.backend.as_ref(), &payload).await;

    let mut session = shared.lock().await;
    if session.epoch() != epoch {
        // A reset won the race; the late result must not resurrect the
        // old flow.
        return Err(ApiError::SessionWasReset);
    }
    match result {
        Ok(analysis) => {
            session.handle(SessionEvent::AnalysisSucceeded(analysis));
            Ok(Json(snapshot(&session)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "analysis failed, reverting to upload");
            session.handle(SessionEvent::AnalysisFailed);
            Err(ApiError::AnalysisFailed)
        }
    }
}

#[derive(Deserialize)]
struct RefineRequest {
    instruction: String,
}

#[derive(Deserialize)]
struct FilterRequest {
    filter: StyleFilter,
}

#[derive(Serialize)]
struct RefineResponse {
    description: String,
}

async fn refine(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RefineRequest>,
) -> Result<Json<RefineResponse>, ApiError> {
    run_refinement(&state, id, &request.instruction).await
}

async fn apply_filter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<FilterRequest>,
) -> Result<Json<RefineResponse>, ApiError> {
    run_refinement(&state, id, request.filter.instruction()).await
}

async fn run_refinement(
    state: &AppState,
    id: Uuid,
    instruction: &str,
) -> Result<Json<RefineResponse>, ApiError> {
    let shared = lookup(state, id).await?;
    let (original, epoch);
    {
        let mut session = shared.lock().await;
        if session.state().step != Step::Results {
            return Err(ApiError::WrongStep("nothing to refine yet"));
        }
        if !session.try_begin(Operation::Refine) {
            return Err(ApiError::Busy("a refinement is already running"));
        }
        original = session.state().description.clone();
        epoch = session.epoch();
    }

    let result = refine_description(state.backend.as_ref(), &original, instruction).await;

    let mut session = shared.lock().await;
    session.finish(Operation::Refine);
    if session.epoch() != epoch {
        return Err(ApiError::SessionWasReset);
    }
    match result {
        Ok(description) => {
            session.set_description(description.clone());
            Ok(Json(RefineResponse { description }))
        }
        Err(e) => {
            tracing::warn!(error = %e, "refinement unavailable, description unchanged");
            Err(ApiError::RefineFailed)
        }
    }
}

#[derive(Deserialize)]
struct RemixRequest {
    style: String,
}

async fn remix(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RemixRequest>,
) -> Result<Json<Snapshot>, ApiError> {
    let shared = lookup(&state, id).await?;
    let (image, epoch);
    {
        let mut session = shared.lock().await;
        if session.state().step != Step::Results {
            return Err(ApiError::WrongStep("nothing to remix yet"));
        }
        if !session.try_begin(Operation::Remix) {
            return Err(ApiError::Busy("a remix is already running"));
        }
        let Some(current) = session.state().image.clone() else {
            session.finish(Operation::Remix);
            return Err(ApiError::WrongStep("nothing to remix yet"));
        };
        image = current;
        epoch = session.epoch();
    }

    let result = remix_image(state.backend.as_ref(), &image, &request.style).await;

    let mut session = shared.lock().await;
    session.finish(Operation::Remix);
    if session.epoch() != epoch {
        return Err(ApiError::SessionWasReset);
    }
    match result {
        Ok(remixed) => {
            session.replace_image(remixed);
            Ok(Json(snapshot(&session)))
        }
        Err(e) => {
            tracing::warn!(cause = %e.primary_cause, "remix failed");
            Err(ApiError::RemixFailed(e.primary_cause))
        }
    }
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    messages: Vec<ChatMessage>,
}

async fn chat_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let shared = lookup(&state, id).await?;
    let history;
    {
        let mut session = shared.lock().await;
        if !session.try_begin(Operation::Chat) {
            return Err(ApiError::Busy("a chat turn is already running"));
        }
        // History is built before the optimistic append, so the new
        // message travels only as the `message` argument.
        history = session.chat.outbound_history();
        session.chat.push_user(&request.message);
    }

    let result = state
        .backend
        .chat(SYSTEM_INSTRUCTION, &history, &request.message)
        .await;

    let mut session = shared.lock().await;
    session.finish(Operation::Chat);
    match result {
        Ok(reply) => {
            session.chat.push_model(&reply);
        }
        Err(e) => {
            let e = crate::error::ChatError::Unavailable(e);
            tracing::warn!(error = %e, "chat turn failed, appending notice");
            session.chat.push_failure();
        }
    }
    Ok(Json(ChatResponse {
        messages: session.chat.messages().to_vec(),
    }))
}

async fn reset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Snapshot>, ApiError> {
    let shared = lookup(&state, id).await?;
    let mut session = shared.lock().await;
    session.handle(SessionEvent::Reset);
    tracing::info!(%id, "session reset");
    Ok(Json(snapshot(&session)))
}

#[derive(Serialize)]
struct ExportResponse {
    summary: String,
    image: Option<String>,
}

/// Text summary for the front end's share sheet / clipboard fallback.
async fn export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExportResponse>, ApiError> {
    let shared = lookup(&state, id).await?;
    let session = shared.lock().await;
    let state = session.state();
    let analysis = state
        .analysis
        .as_ref()
        .ok_or(ApiError::WrongStep("nothing to export yet"))?;

    let mut summary = format!(
        "Style: {}\nLayout: {}\nView: {}\nPalette: {}\nObjects: {}\n\n{}",
        analysis.style,
        analysis.layout,
        analysis.view,
        analysis.colors.join(", "),
        analysis.objects.join(", "),
        state.description,
    );
    if let Some(detail) = &analysis.layout_detail {
        summary.push_str(&format!("\nLayout detail: {detail}"));
    }
    if let Some(detail) = &analysis.view_detail {
        summary.push_str(&format!("\nView detail: {detail}"));
    }
    Ok(Json(ExportResponse {
        summary,
        image: state.image.as_ref().map(ImagePayload::to_data_uri),
    }))
}
