//! One-shot CLI actions that run instead of the server.

use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::config::{Cli, Config};
use crate::routes::doc;

/// Run every requested action. Returns `true` when at least one ran, in
/// which case the server must not start.
pub fn run(cli: &Cli, cfg: &Config) -> anyhow::Result<bool> {
    let mut ran = false;
    if let Some(path) = &cli.export_openapi {
        export_openapi(path)?;
        ran = true;
    }
    if let Some(path) = &cli.export_config {
        export_config(cfg, path)?;
        ran = true;
    }
    Ok(ran)
}

fn export_openapi(path: &Path) -> anyhow::Result<()> {
    let json = doc::get_docs().to_pretty_json()?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "OpenAPI document exported");
    Ok(())
}

fn export_config(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    let body = format!(
        "# almo-server configuration\n# Every value can be overridden with ALMO_<SECTION>_<FIELD>.\n\n{}",
        cfg.to_toml()?
    );
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "configuration exported");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("almo-{}-{name}", uuid::Uuid::new_v4().simple()))
    }

    #[test]
    fn no_action_requested() {
        let cli = Cli::parse_from(["almo-server"]);
        assert!(!run(&cli, &Config::default()).unwrap());
    }

    #[test]
    fn exports_config_that_loads_back() {
        let path = scratch("config.toml");
        let cli = Cli::parse_from(["almo-server", "--export-config", path.to_str().unwrap()]);
        let mut cfg = Config::default();
        cfg.network.port = 9123;

        assert!(run(&cli, &cfg).unwrap());
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, cfg);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn exports_openapi_json() {
        let path = scratch("openapi.json");
        let cli = Cli::parse_from(["almo-server", "--export-openapi", path.to_str().unwrap()]);
        assert!(run(&cli, &Config::default()).unwrap());

        let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(doc["paths"]["/v1/completions"].is_object());
        let _ = std::fs::remove_file(path);
    }
}
