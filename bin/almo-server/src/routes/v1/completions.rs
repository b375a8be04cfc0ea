//! `POST /v1/completions`: fan `n` samples out and stream or aggregate them.

use std::sync::Arc;

use almo_core::api::{CompletionChoice, CompletionLogProbs, CompletionResponse, SamplingParams, UsageStats};
use almo_core::{connection_guard, DriverConfig, GenerationRequest, StreamDriver};
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{extract::State, Extension, Json, Router};
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument, Span};
use utoipa::OpenApi;

use crate::auth::AuthPermission;
use crate::error::ServerError;
use crate::middleware::RequestId;
use crate::models::LoadedModel;
use crate::schemas::v1::completions::{CompletionRequest, Prompt, StreamOptions};
use crate::sse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(completions),
    components(schemas(
        CompletionRequest,
        Prompt,
        StreamOptions,
        SamplingParams,
        CompletionResponse,
        CompletionChoice,
        CompletionLogProbs,
        UsageStats,
    ))
)]
pub struct CompletionsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/completions", post(completions))
}

/// Generate `n` completions for a prompt.
///
/// With `stream: true` each choice is streamed as SSE fragments and the
/// stream ends with `data: [DONE]`. Otherwise one aggregated response is
/// returned once every sample has finished.
#[utoipa::path(
    post,
    path = "/v1/completions",
    tag = "completions",
    request_body = CompletionRequest,
    responses(
        (status = 200, description = "Completion (or SSE stream of fragments)", body = CompletionResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 503, description = "No model loaded or generation aborted"),
    )
)]
pub async fn completions(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Extension(permission): Extension<AuthPermission>,
    payload: Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Response, ServerError> {
    let Json(req) = payload?;

    // Everything about the body is checked before the inline switch so a
    // rejected request never changes the loaded model.
    let max_samples = state.config.generation.max_samples;
    if req.n > max_samples {
        return Err(ServerError::BadRequest(format!(
            "n must be at most {max_samples}, got {}",
            req.n
        )));
    }
    let request = GenerationRequest::new(
        request_id,
        req.model.clone().unwrap_or_default(),
        req.prompt.into_text(),
        req.n,
        req.sampling,
    )?
    .with_logprobs(req.logprobs.unwrap_or(0));

    let model = load_inline_model(&state, req.model.as_deref(), permission).await?;
    let request = request.with_model(model.name.clone());

    let driver = StreamDriver::new(
        model.engine,
        DriverConfig {
            disconnect_poll_interval: state.config.generation.disconnect_poll_interval(),
        },
    );

    if req.stream {
        info!(model = %model.name, n = request.n(), "Received streaming completion request");
        let (tx, rx) = mpsc::unbounded_channel();
        // The driver outlives this handler; the SSE body closing drops `rx`,
        // which the driver observes as a disconnect.
        tokio::spawn(
            async move {
                // Outcome is already logged and forwarded as frames.
                let _ = driver.stream(&request, tx).await;
            }
            .instrument(Span::current()),
        );
        return Ok(sse::completion_stream(rx, state.config.generation.sse_keep_alive()).into_response());
    }

    info!(model = %model.name, n = request.n(), "Received completion request");
    let (guard, probe) = connection_guard();
    // Dropping this handler (client gone) drops `guard` and aborts the samples.
    let task = tokio::spawn(async move { driver.collect(&request, probe).await }.instrument(Span::current()));
    let result = task
        .await
        .map_err(|e| ServerError::Internal(format!("completion task failed: {e}")))?;
    drop(guard);

    Ok(Json(result?).into_response())
}

/// Resolve the model serving this request, switching models when an admin
/// names a different one and inline loading is enabled.
async fn load_inline_model(
    state: &AppState,
    requested: Option<&str>,
    permission: AuthPermission,
) -> Result<LoadedModel, ServerError> {
    let current = state.models.current().await;

    let Some(requested) = requested.filter(|name| !name.is_empty()) else {
        return current.ok_or(ServerError::NoModelLoaded);
    };
    if let Some(current) = current.as_ref().filter(|m| m.name == requested) {
        return Ok(current.clone());
    }

    if permission != AuthPermission::Admin {
        return Err(ServerError::Unauthorized(format!(
            "Unable to switch model to {requested} because an admin key isn't provided"
        )));
    }

    if !state.config.model.inline_model_loading {
        warn!(
            requested,
            "Unable to switch model because inline model loading is disabled; using the current model"
        );
        return current.ok_or(ServerError::NoModelLoaded);
    }

    info!(requested, "switching model inline");
    Ok(state.models.load(requested).await?)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
