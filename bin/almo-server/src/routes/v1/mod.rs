pub mod auth;
pub mod completions;
pub mod model;

use std::sync::Arc;

use axum::{middleware, Router};
use utoipa::OpenApi;

use crate::middleware::auth::{check_admin_key, check_api_key};
use crate::state::AppState;

/// Routes nested under `/v1`.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let api = Router::new()
        .merge(completions::router())
        .merge(model::router())
        .merge(auth::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), check_api_key));

    let admin = model::admin_router().route_layer(middleware::from_fn_with_state(state, check_admin_key));

    Router::new().merge(api).merge(admin)
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut doc = V1Api::openapi();
    doc.merge(completions::CompletionsApi::openapi());
    doc.merge(model::ModelApi::openapi());
    doc.merge(auth::AuthApi::openapi());
    doc
}
