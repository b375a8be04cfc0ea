//! Holds the currently loaded inference engine.
//!
//! Requests clone the engine `Arc` when they start, so switching or
//! unloading a model never interrupts generations already in flight.

use std::sync::Arc;
use std::time::Duration;

use almo_core::engine::{EchoLoader, EngineError, EngineLoader, InferenceEngine};
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::{EngineBackend, ModelConfig};

#[derive(Clone)]
pub struct LoadedModel {
    pub name: String,
    pub engine: Arc<dyn InferenceEngine>,
    /// Unix timestamp (seconds) of the load.
    pub loaded_at: i64,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.name)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

pub struct ModelManager {
    backend: EngineBackend,
    loader: Arc<dyn EngineLoader>,
    current: RwLock<Option<LoadedModel>>,
    /// Serializes loads so two switches never race.
    load_lock: Mutex<()>,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager").field("backend", &self.backend).finish()
    }
}

impl ModelManager {
    pub fn new(backend: EngineBackend, loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            backend,
            loader,
            current: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let loader: Arc<dyn EngineLoader> = match config.backend {
            EngineBackend::Echo => Arc::new(EchoLoader::new(Duration::from_millis(config.echo_token_delay_ms))),
        };
        Self::new(config.backend, loader)
    }

    pub fn backend(&self) -> EngineBackend {
        self.backend
    }

    pub async fn current(&self) -> Option<LoadedModel> {
        self.current.read().await.clone()
    }

    /// Load `name`, replacing the current model. Loading the model that is
    /// already active is a no-op.
    pub async fn load(&self, name: &str) -> Result<LoadedModel, EngineError> {
        let _guard = self.load_lock.lock().await;
        if let Some(current) = self.current().await {
            if current.name == name {
                return Ok(current);
            }
        }

        let engine = self.loader.load(name).await?;
        let loaded = LoadedModel {
            name: name.to_owned(),
            engine,
            loaded_at: Utc::now().timestamp(),
        };
        let previous = self.current.write().await.replace(loaded.clone());
        info!(
            model = name,
            previous = previous.as_ref().map(|m| m.name.as_str()).unwrap_or("<none>"),
            backend = %self.backend,
            "model loaded"
        );
        Ok(loaded)
    }

    /// Unload the current model. Returns its name if one was loaded.
    pub async fn unload(&self) -> Option<String> {
        let _guard = self.load_lock.lock().await;
        let previous = self.current.write().await.take();
        if let Some(model) = &previous {
            info!(model = %model.name, "model unloaded");
        }
        previous.map(|m| m.name)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
