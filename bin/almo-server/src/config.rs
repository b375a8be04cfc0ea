//! Server configuration.
//!
//! Sources are layered, later ones winning:
//! 1. built-in defaults
//! 2. a TOML file (`--config <path>`, or `config.toml` in the working directory)
//! 3. `ALMO_{SECTION}_{FIELD}` environment variables
//! 4. command-line flags

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

/// File picked up automatically when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Command-line flags.
#[derive(Debug, Default, Parser)]
#[command(name = "almo-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Model to load at startup
    #[arg(long)]
    pub model_name: Option<String>,

    /// `tracing` filter, e.g. `info` or `debug,tower_http=warn`
    #[arg(long)]
    pub log_level: Option<String>,

    /// Treat every caller as admin
    #[arg(long)]
    pub disable_auth: bool,

    /// Write the OpenAPI document to PATH and exit
    #[arg(long, value_name = "PATH")]
    pub export_openapi: Option<PathBuf>,

    /// Write the effective configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    pub export_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    pub model: ModelConfig,
    pub auth: AuthConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// Every caller is treated as admin.
    pub disable_auth: bool,
    /// Comma-separated list of allowed CORS origins; unset allows any.
    pub cors_allowed_origins: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 5000,
            disable_auth: false,
            cors_allowed_origins: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter string; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit newline-delimited JSON records.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

/// Engine backends compiled into the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EngineBackend {
    #[default]
    Echo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model loaded at startup. `None` starts with nothing loaded.
    pub name: Option<String>,
    pub backend: EngineBackend,
    /// Allow admin requests to switch models through the `model` field.
    pub inline_model_loading: bool,
    /// Artificial per-token delay of the echo backend.
    pub echo_token_delay_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: Some("echo".to_owned()),
            backend: EngineBackend::Echo,
            inline_model_loading: false,
            echo_token_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthProviderKind {
    /// No credentials; everyone is admin.
    None,
    /// Static token file.
    #[default]
    Simple,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub provider: AuthProviderKind,
    /// TOML file mapping tokens to permissions for the simple provider.
    pub tokens_file: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: AuthProviderKind::Simple,
            tokens_file: PathBuf::from("api_tokens.toml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Client-liveness poll interval in milliseconds.
    pub disconnect_poll_ms: u64,
    /// SSE keep-alive comment interval in seconds.
    pub sse_keep_alive_secs: u64,
    /// Largest `n` accepted on a single request.
    pub max_samples: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            disconnect_poll_ms: 500,
            sse_keep_alive_secs: 15,
            max_samples: 16,
        }
    }
}

impl GenerationConfig {
    pub fn disconnect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.disconnect_poll_ms.max(1))
    }

    pub fn sse_keep_alive(&self) -> Duration {
        Duration::from_secs(self.sse_keep_alive_secs.max(1))
    }
}

impl Config {
    /// Resolve the effective configuration for this process.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut cfg = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.apply_cli(cli);
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `ALMO_{SECTION}_{FIELD}` overrides. Unparseable values are
    /// ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_from(&lookup, "ALMO_NETWORK_HOST", &mut self.network.host);
        override_from(&lookup, "ALMO_NETWORK_PORT", &mut self.network.port);
        override_bool(&lookup, "ALMO_NETWORK_DISABLE_AUTH", &mut self.network.disable_auth);
        if let Some(v) = lookup("ALMO_NETWORK_CORS_ALLOWED_ORIGINS") {
            self.network.cors_allowed_origins = Some(v);
        }

        override_from(&lookup, "ALMO_LOGGING_LEVEL", &mut self.logging.level);
        override_bool(&lookup, "ALMO_LOGGING_JSON", &mut self.logging.json);

        if let Some(v) = lookup("ALMO_MODEL_NAME") {
            self.model.name = Some(v).filter(|s| !s.is_empty());
        }
        override_from(&lookup, "ALMO_MODEL_BACKEND", &mut self.model.backend);
        override_bool(&lookup, "ALMO_MODEL_INLINE_MODEL_LOADING", &mut self.model.inline_model_loading);
        override_from(&lookup, "ALMO_MODEL_ECHO_TOKEN_DELAY_MS", &mut self.model.echo_token_delay_ms);

        override_from(&lookup, "ALMO_AUTH_PROVIDER", &mut self.auth.provider);
        override_from(&lookup, "ALMO_AUTH_TOKENS_FILE", &mut self.auth.tokens_file);

        override_from(&lookup, "ALMO_GENERATION_DISCONNECT_POLL_MS", &mut self.generation.disconnect_poll_ms);
        override_from(&lookup, "ALMO_GENERATION_SSE_KEEP_ALIVE_SECS", &mut self.generation.sse_keep_alive_secs);
        override_from(&lookup, "ALMO_GENERATION_MAX_SAMPLES", &mut self.generation.max_samples);
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.network.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.network.port = port;
        }
        if let Some(name) = &cli.model_name {
            self.model.name = Some(name.clone());
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
        if cli.disable_auth {
            self.network.disable_auth = true;
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.network.host, self.network.port)
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn override_from<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(v) = lookup(key).and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}

fn override_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) {
    if let Some(v) = lookup(key) {
        *slot = v == "1" || v.eq_ignore_ascii_case("true");
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sensible() {
        let cfg = Config::default();
        assert_eq!(cfg.bind_address(), "127.0.0.1:5000");
        assert_eq!(cfg.model.name.as_deref(), Some("echo"));
        assert_eq!(cfg.auth.provider, AuthProviderKind::Simple);
        assert_eq!(cfg.generation.disconnect_poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = Config::from_toml(
            r#"
            [network]
            port = 8080

            [model]
            inline_model_loading = true

            [auth]
            provider = "none"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.network.port, 8080);
        assert_eq!(cfg.network.host, "127.0.0.1");
        assert!(cfg.model.inline_model_loading);
        assert_eq!(cfg.auth.provider, AuthProviderKind::None);
        assert_eq!(cfg.generation.max_samples, 16);
    }

    #[test]
    fn toml_round_trips_through_export() {
        let mut cfg = Config::default();
        cfg.network.cors_allowed_origins = Some("http://localhost:3000".to_owned());
        let text = cfg.to_toml().unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), cfg);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("ALMO_NETWORK_PORT", "7000"),
            ("ALMO_LOGGING_JSON", "true"),
            ("ALMO_MODEL_NAME", "tiny"),
            ("ALMO_AUTH_PROVIDER", "none"),
            ("ALMO_GENERATION_DISCONNECT_POLL_MS", "50"),
        ]));
        assert_eq!(cfg.network.port, 7000);
        assert!(cfg.logging.json);
        assert_eq!(cfg.model.name.as_deref(), Some("tiny"));
        assert_eq!(cfg.auth.provider, AuthProviderKind::None);
        assert_eq!(cfg.generation.disconnect_poll_ms, 50);
    }

    #[test]
    fn unparseable_env_values_are_ignored() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[("ALMO_NETWORK_PORT", "not-a-port"), ("ALMO_AUTH_PROVIDER", "ldap")]));
        assert_eq!(cfg.network.port, 5000);
        assert_eq!(cfg.auth.provider, AuthProviderKind::Simple);
    }

    #[test]
    fn cli_wins_over_everything() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[("ALMO_NETWORK_PORT", "7000")]));
        let cli = Cli::parse_from(["almo-server", "--port", "9000", "--disable-auth", "--model-name", "big"]);
        cfg.apply_cli(&cli);
        assert_eq!(cfg.network.port, 9000);
        assert!(cfg.network.disable_auth);
        assert_eq!(cfg.model.name.as_deref(), Some("big"));
    }
}
