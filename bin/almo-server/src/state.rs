//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::auth::AuthProvider;
use crate::config::Config;
use crate::models::ModelManager;

#[derive(Clone, Debug)]
pub struct AppState {
    /// Effective configuration (file + env + CLI).
    pub config: Arc<Config>,
    /// Currently loaded inference engine.
    pub models: Arc<ModelManager>,
    /// Credential check used by the auth middleware.
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    pub fn new(config: Config, models: ModelManager, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            config: Arc::new(config),
            models: Arc::new(models),
            auth,
        }
    }
}
