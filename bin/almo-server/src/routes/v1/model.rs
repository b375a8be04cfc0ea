//! Model listing and admin model management.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::model::{ModelCard, ModelList, ModelLoadRequest, ModelUnloadResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_models, current_model, load_model, unload_model),
    components(schemas(ModelCard, ModelList, ModelLoadRequest, ModelUnloadResponse))
)]
pub struct ModelApi;

/// Read-only routes, open to `api` keys.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list_models))
        .route("/model", get(current_model))
}

/// Load and unload routes, `admin` keys only.
pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/model/load", post(load_model))
        .route("/model/unload", post(unload_model))
}

#[utoipa::path(
    get,
    path = "/v1/models",
    tag = "models",
    responses((status = 200, description = "Loaded models", body = ModelList))
)]
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    let data = state
        .models
        .current()
        .await
        .map(|m| ModelCard::new(m.name, m.loaded_at))
        .into_iter()
        .collect();
    Json(ModelList {
        object: "list".to_owned(),
        data,
    })
}

#[utoipa::path(
    get,
    path = "/v1/model",
    tag = "models",
    responses(
        (status = 200, description = "Currently loaded model", body = ModelCard),
        (status = 503, description = "No model loaded"),
    )
)]
pub async fn current_model(State(state): State<Arc<AppState>>) -> Result<Json<ModelCard>, ServerError> {
    let model = state.models.current().await.ok_or(ServerError::NoModelLoaded)?;
    Ok(Json(ModelCard::new(model.name, model.loaded_at)))
}

#[utoipa::path(
    post,
    path = "/v1/model/load",
    tag = "models",
    request_body = ModelLoadRequest,
    responses(
        (status = 200, description = "Model loaded", body = ModelCard),
        (status = 400, description = "Empty model name"),
        (status = 401, description = "Admin key required"),
    )
)]
pub async fn load_model(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ModelLoadRequest>, JsonRejection>,
) -> Result<Json<ModelCard>, ServerError> {
    let Json(req) = payload?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("model name must not be empty".into()));
    }
    let model = state.models.load(name).await?;
    Ok(Json(ModelCard::new(model.name, model.loaded_at)))
}

#[utoipa::path(
    post,
    path = "/v1/model/unload",
    tag = "models",
    responses(
        (status = 200, description = "Model unloaded", body = ModelUnloadResponse),
        (status = 401, description = "Admin key required"),
    )
)]
pub async fn unload_model(State(state): State<Arc<AppState>>) -> Json<ModelUnloadResponse> {
    let unloaded = state.models.unload().await;
    info!(unloaded = ?unloaded, "unload requested");
    Json(ModelUnloadResponse { unloaded })
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::routes;
    use crate::state::test_support::{state_with, ADMIN_KEY, API_KEY};

    fn request(method: &str, uri: &str, key: &str, body: Option<&str>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-api-key", key)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_owned())).unwrap_or_else(Body::empty))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn api_key_lists_models_and_permission() {
        let app = routes::build(state_with(Config::default()).await);

        let response = app.clone().oneshot(request("GET", "/v1/models", API_KEY, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["object"], "list");
        assert_eq!(body["data"][0]["id"], "echo");

        let response = app
            .oneshot(request("GET", "/v1/auth/permission", API_KEY, None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["permission"], "api");
    }

    #[tokio::test]
    async fn load_and_unload_need_admin() {
        let app = routes::build(state_with(Config::default()).await);

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/model/load", API_KEY, Some(r#"{"name":"other"}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/model/unload", API_KEY, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_switches_and_unloads() {
        let state = state_with(Config::default()).await;
        let app = routes::build(state.clone());

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/model/load", ADMIN_KEY, Some(r#"{"name":"other"}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["id"], "other");

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/model/unload", ADMIN_KEY, None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["unloaded"], "other");

        let response = app.oneshot(request("GET", "/v1/model", ADMIN_KEY, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(state.models.current().await.is_none());
    }
}
