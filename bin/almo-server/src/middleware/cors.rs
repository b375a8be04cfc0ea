use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};

use crate::config::NetworkConfig;

pub fn cors_layer(network: &NetworkConfig) -> CorsLayer {
    let permissive = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    let Some(origins_str) = &network.cors_allowed_origins else {
        return permissive;
    };
    let origins: Vec<HeaderValue> = origins_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if origins.is_empty() {
        permissive
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_headers(Any)
            .allow_methods(Any)
    }
}
