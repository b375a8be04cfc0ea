//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - middleware layers (CORS, per-request id and tracing span)
//! - health route
//! - OpenAI-compatible `/v1` routes, guarded by API keys
//! - the OpenAPI document at `/openapi.json`

pub mod doc;
mod health;
mod v1;

use std::sync::Arc;

use axum::routing::get;
use axum::{middleware, Json, Router};

use crate::middleware::{cors, trace};
use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/v1", v1::router(state.clone()))
        .route("/openapi.json", get(|| async { Json(doc::get_docs()) }))
        // Outermost layers execute first on the way in.
        .layer(cors::cors_layer(&state.config.network))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
