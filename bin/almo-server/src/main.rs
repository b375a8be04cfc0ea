//! almo-server – entry point.
//!
//! Startup order:
//! 1. Parse CLI flags and resolve configuration (file, env, CLI).
//! 2. Initialise structured tracing (JSON or pretty).
//! 3. Run one-shot actions (`--export-openapi`, `--export-config`) and exit.
//! 4. Build the auth provider and load the startup model.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.

mod actions;
mod auth;
mod config;
mod error;
mod middleware;
mod models;
mod routes;
mod schemas;
mod sse;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use crate::config::{Cli, Config};
use crate::models::ModelManager;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.logging.level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: log level '{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.logging.level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // ── 3. One-shot actions ────────────────────────────────────────────────────
    if actions::run(&cli, &cfg)? {
        return Ok(());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "almo-server starting");

    // ── 4. Auth and models ─────────────────────────────────────────────────────
    let auth = auth::build_provider(&cfg.auth, cfg.network.disable_auth)?;

    let models = ModelManager::from_config(&cfg.model);
    match cfg.model.name.as_deref() {
        Some(name) => {
            models.load(name).await?;
        }
        None => warn!("no startup model configured; load one with POST /v1/model/load"),
    }

    let state = Arc::new(AppState::new(cfg.clone(), models, auth));

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("almo-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
