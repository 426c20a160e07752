use async_trait::async_trait;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::chat::{run_exchange, ExchangeOutcome};
use crate::config::STORE_SETUP_HINT;
use crate::error::ApiError;
use crate::footprint::{EnergyMix, ModelSize, Settings, DEFAULT_WATER_L_PER_KWH};
use crate::models::GenerationModel;
use crate::session::{Message, Session, SessionPatch, DEFAULT_SESSION_TITLE};
use crate::storage::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Option<Arc<dyn SessionStore>>,
    pub model: Arc<dyn GenerationModel>,
}

impl AppState {
    pub fn new(store: Option<Arc<dyn SessionStore>>, model: Arc<dyn GenerationModel>) -> Self {
        Self { store, model }
    }
}

// axum's stock Json rejection answers 422 with a plain-text message; body
// errors go through the taxonomy as a 400 {error} instead
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(ApiError::InvalidRequest(rejection.body_text())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub title: Option<String>,
    pub model_size: Option<ModelSize>,
    pub energy_mix: Option<EnergyMix>,
    pub water_factor: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub session_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Session,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

fn require_store(state: &AppState) -> Result<&Arc<dyn SessionStore>, ApiError> {
    state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::InvalidRequest(STORE_SETUP_HINT.to_string()))
}

fn parse_session_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::NotFound("Session not found".to_string()))
}

fn check_water_factor(factor: f64) -> Result<(), ApiError> {
    if factor.is_finite() && factor >= 0.0 {
        Ok(())
    } else {
        Err(ApiError::InvalidRequest(
            "water_factor must be a non-negative number".to_string(),
        ))
    }
}

// listing never fails; a missing or broken store yields an empty set plus the hint
async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let Some(store) = &state.store else {
        return Json(SessionsResponse {
            sessions: Vec::new(),
            error: Some(STORE_SETUP_HINT.to_string()),
        });
    };
    match store.list_sessions().await {
        Ok(sessions) => Json(SessionsResponse {
            sessions,
            error: None,
        }),
        Err(err) => {
            tracing::error!("failed to list sessions: {err:#}");
            Json(SessionsResponse {
                sessions: Vec::new(),
                error: Some("Failed to load sessions".to_string()),
            })
        }
    }
}

async fn create_session(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CreateSessionBody>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let store = require_store(&state)?;
    let water_factor = body.water_factor.unwrap_or(DEFAULT_WATER_L_PER_KWH);
    check_water_factor(water_factor)?;
    let settings = Settings {
        model_size: body.model_size.unwrap_or_default(),
        energy_mix: body.energy_mix.unwrap_or_default(),
        water_factor,
    };
    let title = body
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string());
    let session = store
        .create_session(title, settings)
        .await
        .map_err(|err| ApiError::store(err, "Failed to create session"))?;
    Ok((StatusCode::CREATED, Json(SessionResponse { session })))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let store = require_store(&state)?;
    let session_id = parse_session_id(&id)?;
    let session = store
        .get_session(session_id)
        .await
        .map_err(|err| ApiError::store(err, "Failed to fetch session"))?
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;
    Ok(Json(SessionResponse { session }))
}

async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<SessionPatch>,
) -> Result<Json<SessionResponse>, ApiError> {
    let store = require_store(&state)?;
    if let Some(factor) = patch.water_factor {
        check_water_factor(factor)?;
    }
    let session_id = parse_session_id(&id)?;
    let session = store
        .update_session(session_id, patch)
        .await
        .map_err(|err| ApiError::store(err, "Failed to update session"))?
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;
    Ok(Json(SessionResponse { session }))
}

// deleting an id that never existed still reports success
async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let store = require_store(&state)?;
    if let Ok(session_id) = Uuid::parse_str(&id) {
        store
            .delete_session(session_id)
            .await
            .map_err(|err| ApiError::store(err, "Failed to delete session"))?;
    }
    Ok(Json(DeleteResponse { success: true }))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let Some(store) = &state.store else {
        return Ok(Json(MessagesResponse {
            messages: Vec::new(),
        }));
    };
    let Ok(session_id) = Uuid::parse_str(&id) else {
        return Ok(Json(MessagesResponse {
            messages: Vec::new(),
        }));
    };
    let messages = store
        .list_messages(session_id)
        .await
        .map_err(|err| ApiError::store(err, "Failed to fetch messages"))?;
    Ok(Json(MessagesResponse { messages }))
}

async fn chat_exchange(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ChatBody>,
) -> Result<Json<ExchangeOutcome>, ApiError> {
    let (session_id, content) = match (body.session_id, body.content) {
        (Some(id), Some(content)) if !id.is_empty() && !content.is_empty() => (id, content),
        _ => {
            return Err(ApiError::InvalidRequest(
                "Missing session_id or content".to_string(),
            ))
        }
    };
    let store = require_store(&state)?;
    let session_id = Uuid::parse_str(&session_id)
        .map_err(|_| ApiError::InvalidRequest("Invalid session_id".to_string()))?;
    let outcome = run_exchange(store.as_ref(), state.model.as_ref(), session_id, &content).await?;
    Ok(Json(outcome))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route(
            "/sessions/:id",
            get(get_session)
                .patch(update_session)
                .delete(delete_session),
        )
        .route("/sessions/:id/messages", get(list_messages))
        .route("/chat", post(chat_exchange))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let recorder = PrometheusBuilder::new().install_recorder()?;
    let app = router(state).route(
        "/metrics",
        get(move || std::future::ready(recorder.render())),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
