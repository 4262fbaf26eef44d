//! HTTP surface for the session facade
//!
//! Routes:
//! - `POST /query` - run a conversation turn
//! - `POST /sessions` - create a session
//! - `GET /sessions/{id}` - session metadata
//! - `GET /sessions/{id}/messages` - conversation messages
//! - `DELETE /sessions/{id}` - delete a session and its checkpoint
//! - `GET /health` - liveness probe
//! - `GET /` - API description

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::agent::session::{SessionFacade, TurnResult};
use crate::agent::types::Message;
use crate::checkpoint::{CheckpointStore, SessionInfo};
use crate::error::Error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<SessionFacade>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

// ---- Error Handling ----

struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

// ---- Request / Response Types ----

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    session_id: Option<String>,
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    user_id: Option<String>,
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
    user_id: Option<String>,
    created_at: String,
    updated_at: String,
    status: String,
}

impl From<SessionInfo> for SessionResponse {
    fn from(info: SessionInfo) -> Self {
        SessionResponse {
            session_id: info.session_id,
            user_id: info.user_id,
            created_at: info.created_at.to_rfc3339(),
            updated_at: info.updated_at.to_rfc3339(),
            status: info.status,
        }
    }
}

#[derive(Deserialize)]
struct MessagesQuery {
    limit: Option<usize>,
    #[serde(default)]
    #[allow(dead_code)]
    include_nested: bool,
}

// ---- Handlers ----

async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "DeepAgent API",
        "version": crate::VERSION,
        "endpoints": {
            "/query": "POST - Process a natural language query",
            "/sessions": "POST - Create a new session",
            "/sessions/{id}": "GET - Get session information, DELETE - Delete a session",
            "/sessions/{id}/messages": "GET - Get session messages",
            "/health": "GET - Health check endpoint"
        }
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn process_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<TurnResult>, AppError> {
    let result = state
        .facade
        .invoke(
            Some(&request.query),
            request.session_id.as_deref(),
            request.user_id.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let session_id = state
        .checkpoints
        .create_session(request.user_id.as_deref(), None)
        .await?;
    let info = state
        .checkpoints
        .session_info(&session_id)
        .await?
        .ok_or_else(|| Error::Internal("session vanished after creation".to_string()))?;
    Ok(Json(info.into()))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let info = state
        .checkpoints
        .session_info(&session_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
    Ok(Json(info.into()))
}

async fn get_session_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>, AppError> {
    state
        .checkpoints
        .session_info(&session_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;

    let messages = state
        .checkpoints
        .get(&session_id)
        .await?
        .map(|s| s.messages)
        .unwrap_or_default();

    let limit = params.limit.unwrap_or(100);
    let start = messages.len().saturating_sub(limit);
    Ok(Json(messages[start..].to_vec()))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.checkpoints.delete(&session_id).await? {
        return Err(Error::NotFound(format!("session {}", session_id)).into());
    }
    Ok(Json(json!({
        "message": format!("Session {} deleted successfully", session_id)
    })))
}

// ---- Router ----

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/query", post(process_query))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}", delete(delete_session))
        .route("/sessions/{id}/messages", get(get_session_messages))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockProvider;
    use crate::agent::planner_loop::{AgentLoop, LoopConfig};
    use crate::agent::provider::ChatResponse;
    use crate::blob::testing::CountingBlobStore;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::compaction::{CompactionConfig, CompactionEngine};
    use crate::tokens::TokenAccountant;
    use crate::tools::ToolRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn test_app() -> (Router, Arc<MemoryCheckpointStore>) {
        let provider = Arc::new(MockProvider::with_responder(|_, _| {
            Ok(ChatResponse::text("pong"))
        }));
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let accountant = TokenAccountant::approximate();
        let compactor = CompactionEngine::new(
            provider.clone(),
            Arc::new(CountingBlobStore::default()),
            accountant.clone(),
            CompactionConfig::default(),
        );
        let agent_loop = AgentLoop::new(
            provider,
            Arc::new(ToolRegistry::new()),
            checkpoints.clone(),
            compactor,
            accountant,
            LoopConfig::default(),
        );
        let facade = Arc::new(SessionFacade::new(
            agent_loop,
            checkpoints.clone(),
            "S".to_string(),
        ));
        let state = AppState {
            facade,
            checkpoints: checkpoints.clone(),
        };
        (build_router(state), checkpoints)
    }

    #[tokio::test]
    async fn query_returns_turn_result() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::post("/query")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query": "ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["response"], "pong");
        assert_eq!(body["success"], true);
        assert!(!body["session_id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::get("/sessions/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn session_lifecycle_create_fetch_delete() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(
                Request::post("/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"user_id": "u-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let created: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let id = created["session_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/sessions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/sessions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::get(format!("/sessions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
