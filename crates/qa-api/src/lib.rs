//! HTTP surface for the question relay
//!
//! Runs next to the consume loop but shares no mutable state with it:
//! - `GET /health` - liveness
//! - `POST /chat` - synchronous completion
//! - `POST /questions` - enqueue a question for asynchronous answering
//! - `GET /metrics` - Prometheus exposition

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use qa_queue::{QuestionPublisher, QuestionRequest};
use qa_worker::Completer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitQuestionRequest {
    pub question: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitQuestionResponse {
    pub question_id: String,
}

// ============================================================================
// Router
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub completer: Arc<dyn Completer>,
    pub publisher: Arc<dyn QuestionPublisher>,
    /// Present when a Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/questions", post(submit_question_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "A message is required to get a reply".to_string(),
        ));
    }

    let reply = state.completer.complete(&request.message).await.map_err(|e| {
        error!(error = %e, "Chat completion failed");
        ApiError::BadGateway("The model could not produce a reply right now".to_string())
    })?;

    let reply = reply.trim();
    if reply.is_empty() {
        return Err(ApiError::BadGateway(
            "The model returned an empty reply".to_string(),
        ));
    }

    Ok(Json(ChatResponse {
        reply: reply.to_string(),
    }))
}

async fn submit_question_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitQuestionRequest>,
) -> Result<(StatusCode, Json<SubmitQuestionResponse>)> {
    if request.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }

    let submission = QuestionRequest {
        question: request.question,
        thread_id: request.thread_id,
        user_id: request.user_id,
    };

    let question_id = state.publisher.submit(submission).await.map_err(|e| {
        if e.is_unavailable() {
            warn!(error = %e, "Question queue unavailable");
            ApiError::ServiceUnavailable(e.to_string())
        } else {
            error!(error = %e, "Failed to publish question");
            ApiError::Internal(e.to_string())
        }
    })?;

    info!(question_id = %question_id, "Question accepted");
    Ok((StatusCode::ACCEPTED, Json(SubmitQuestionResponse { question_id })))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("metrics recorder is not installed".to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
