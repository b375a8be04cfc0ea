use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AuthPermission, AuthProvider};

/// Token file layout:
///
/// ```toml
/// [tokens]
/// "3f1c..." = "admin"
/// "9ab0..." = "api"
/// ```
#[derive(Debug, Default, Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: HashMap<String, AuthPermission>,
}

/// Static token → permission table.
///
/// Tokens are read once at startup and never written back.
#[derive(Debug, Default)]
pub struct SimpleAuthProvider {
    tokens: HashMap<String, AuthPermission>,
}

impl SimpleAuthProvider {
    pub fn from_tokens(tokens: impl IntoIterator<Item = (String, AuthPermission)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let file: TokenFile = toml::from_str(text)?;
        Ok(Self { tokens: file.tokens })
    }

    /// Read `path`, or mint a fresh admin and api key for this process when
    /// the file does not exist.
    pub fn load_or_generate(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read token file {}", path.display()))?;
            let provider =
                Self::from_toml(&text).with_context(|| format!("invalid token file {}", path.display()))?;
            info!(path = %path.display(), tokens = provider.tokens.len(), "API tokens loaded");
            return Ok(provider);
        }

        warn!(
            path = %path.display(),
            "token file not found; generating temporary keys for this run"
        );
        let admin = generate_token();
        let api = generate_token();
        info!("Your admin key is: {admin}");
        info!("Your API key is: {api}");
        Ok(Self::from_tokens([(admin, AuthPermission::Admin), (api, AuthPermission::Api)]))
    }
}

#[async_trait]
impl AuthProvider for SimpleAuthProvider {
    async fn get_permission(&self, token: Option<&str>) -> AuthPermission {
        token
            .and_then(|t| self.tokens.get(t).copied())
            .unwrap_or(AuthPermission::Unauthenticated)
    }
}

fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

// ── Tests ──────────────────────────────────────────────────────────────────────
