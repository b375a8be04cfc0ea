//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON body with an
//! appropriate status code.
//!
//! Engine failures are logged in full; clients only get a short message.

use almo_core::RuntimeError;
use almo_core::engine::EngineError;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the generation runtime.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// A model load failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or insufficient credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Nothing is loaded to serve the request.
    #[error("no model loaded")]
    NoModelLoaded,

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Non-standard status used when the client closed the connection first.
const CLIENT_CLOSED_REQUEST: u16 = 499;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ServerError::NoModelLoaded => (
                StatusCode::SERVICE_UNAVAILABLE,
                "No models are currently loaded.".to_owned(),
            ),

            ServerError::Runtime(e) => match e {
                RuntimeError::InvalidRequest { message } => (StatusCode::BAD_REQUEST, message.clone()),
                RuntimeError::Aborted { request_id } => {
                    // Nobody is listening; the status only shows up in logs.
                    info!(request_id = %request_id, "request aborted before a response was written");
                    (
                        StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST),
                        "client closed request".to_owned(),
                    )
                }
                RuntimeError::SampleFailed { request_id, .. } => {
                    error!(error = %e, "completion generation failed");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        format!(
                            "Completion {request_id} aborted. Maybe the model was unloaded? \
                             Please check the server console."
                        ),
                    )
                }
            },
            ServerError::Engine(e) => {
                error!(error = %e, "engine error");
                let message = match e {
                    EngineError::LoadFailed { model, .. } => format!("failed to load model '{model}'"),
                    _ => "inference engine error".to_owned(),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
