//! Dashboard server command: `shopfloor serve`.

use anyhow::Result;
use std::path::{Path, PathBuf};

use shopfloor::config::Config;
use shopfloor::dashboard::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    project_dir: &Path,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
    open: Option<String>,
) -> Result<()> {
    let mut config = Config::load(project_dir)?;
    if let Some(port) = port {
        config.toml.server.port = port;
    }
    if let Some(path) = db_path {
        config.toml.server.db_path = path;
    }
    for warning in config.toml.validate() {
        tracing::warn!("config: {}", warning);
    }

    let port = config.toml.server.port;
    // Skip in dev mode (no browser inside containers)
    if let Some(tab) = open.filter(|_| !dev) {
        let url = table_url(port, &tab);
        tokio::spawn(async move {
            // Small delay to let the server start binding
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        });
    }

    start_server(
        ServerConfig {
            port,
            db_path: config.db_path(),
            dev_mode: dev,
        },
        config.toml,
    )
    .await
}

/// Table view for `tab`; spaces are the only character collection names
/// commonly carry that a URL path cannot.
fn table_url(port: u16, tab: &str) -> String {
    format!("http://localhost:{}/api/tables/{}", port, tab.trim().replace(' ', "%20"))
}
