use std::sync::Arc;

use axum::routing::get;
use axum::{Extension, Json, Router};
use utoipa::OpenApi;

use crate::auth::AuthPermission;
use crate::schemas::v1::auth::AuthPermissionResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(get_permission),
    components(schemas(AuthPermissionResponse, AuthPermission))
)]
pub struct AuthApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/auth/permission", get(get_permission))
}

/// Permission level of the presented API key.
#[utoipa::path(
    get,
    path = "/v1/auth/permission",
    tag = "auth",
    responses(
        (status = 200, description = "Caller permission", body = AuthPermissionResponse),
        (status = 401, description = "Missing or invalid API key"),
    )
)]
pub async fn get_permission(Extension(permission): Extension<AuthPermission>) -> Json<AuthPermissionResponse> {
    Json(AuthPermissionResponse { permission })
}
