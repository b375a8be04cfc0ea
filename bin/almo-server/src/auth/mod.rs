//! Pluggable credential checks.
//!
//! A provider maps an API key to an [`AuthPermission`]. Generation routes
//! require `api` or `admin`; model switching requires `admin`.

mod simple;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use simple::SimpleAuthProvider;

use crate::config::{AuthConfig, AuthProviderKind};

/// Header accepted as an alternative to `Authorization`.
pub const X_API_KEY: &str = "x-api-key";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthPermission {
    Admin,
    Api,
    Unauthenticated,
}

#[async_trait]
pub trait AuthProvider: Send + Sync + Debug + 'static {
    /// Permission carried by `token`; `Unauthenticated` when unknown.
    async fn get_permission(&self, token: Option<&str>) -> AuthPermission;

    /// Whether `token` holds any of `roles`.
    async fn authenticate(&self, token: Option<&str>, roles: &[AuthPermission]) -> bool {
        roles.contains(&self.get_permission(token).await)
    }
}

/// Accepts everyone as admin.
#[derive(Debug, Default)]
pub struct NoAuthProvider;

#[async_trait]
impl AuthProvider for NoAuthProvider {
    async fn get_permission(&self, _token: Option<&str>) -> AuthPermission {
        AuthPermission::Admin
    }
}

/// Build the configured provider. `disable_auth` forces [`NoAuthProvider`].
pub fn build_provider(config: &AuthConfig, disable_auth: bool) -> anyhow::Result<Arc<dyn AuthProvider>> {
    if disable_auth {
        tracing::warn!("authentication is disabled; every caller is treated as admin");
        return Ok(Arc::new(NoAuthProvider));
    }
    match config.provider {
        AuthProviderKind::None => Ok(Arc::new(NoAuthProvider)),
        AuthProviderKind::Simple => Ok(Arc::new(SimpleAuthProvider::load_or_generate(&config.tokens_file)?)),
    }
}

/// API key from `Authorization` (with or without `Bearer `) or `x-api-key`.
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    let raw = headers
        .get(AUTHORIZATION)
        .or_else(|| headers.get(X_API_KEY))
        .and_then(|v| v.to_str().ok())?
        .trim();
    let key = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!key.is_empty()).then_some(key)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(name, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn bearer_prefix_is_optional() {
        assert_eq!(extract_api_key(&headers("authorization", "Bearer abc")), Some("abc"));
        assert_eq!(extract_api_key(&headers("authorization", "abc")), Some("abc"));
        assert_eq!(extract_api_key(&headers("x-api-key", "xyz")), Some("xyz"));
        assert_eq!(extract_api_key(&headers("authorization", "Bearer ")), None);
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }

    #[test]
    fn permission_parses_lowercase() {
        assert_eq!("admin".parse::<AuthPermission>().unwrap(), AuthPermission::Admin);
        assert_eq!(AuthPermission::Api.to_string(), "api");
    }

    #[tokio::test]
    async fn no_auth_admits_everyone_as_admin() {
        let provider = NoAuthProvider;
        assert_eq!(provider.get_permission(None).await, AuthPermission::Admin);
        assert!(provider.authenticate(None, &[AuthPermission::Admin]).await);
    }

    #[tokio::test]
    async fn disable_auth_overrides_configured_provider() {
        let provider = build_provider(&AuthConfig::default(), true).unwrap();
        assert_eq!(provider.get_permission(Some("anything")).await, AuthPermission::Admin);
    }
}
