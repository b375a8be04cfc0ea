use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::{extract_api_key, AuthPermission};
use crate::error::ServerError;
use crate::state::AppState;

/// Generation and read routes: `api` or `admin`.
pub async fn check_api_key(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    authorize(&state, req, next, &[AuthPermission::Api, AuthPermission::Admin]).await
}

/// Model management routes: `admin` only.
pub async fn check_admin_key(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    authorize(&state, req, next, &[AuthPermission::Admin]).await
}

/// On success the caller's [`AuthPermission`] is stored in the request
/// extensions for handlers that gate privileged actions.
async fn authorize(state: &AppState, mut req: Request, next: Next, roles: &[AuthPermission]) -> Response {
    let key = extract_api_key(req.headers()).map(str::to_owned);

    if !state.auth.authenticate(key.as_deref(), roles).await {
        let message = if key.is_none() {
            "Please provide an API key"
        } else {
            "Invalid API key"
        };
        return ServerError::Unauthorized(message.to_owned()).into_response();
    }

    let permission = state.auth.get_permission(key.as_deref()).await;
    req.extensions_mut().insert(permission);
    next.run(req).await
}
