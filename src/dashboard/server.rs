use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ShopfloorToml;

use super::api::{self, AppState};
use super::db::{DashboardDb, DbHandle};

/// Configuration for the dashboard server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3141,
            db_path: PathBuf::from(".shopfloor/shopfloor.db"),
            dev_mode: false,
        }
    }
}

/// Build the full application router with request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Address to bind: loopback normally, every interface in dev mode.
fn bind_addr(config: &ServerConfig) -> SocketAddr {
    let ip = if config.dev_mode {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    };
    SocketAddr::new(ip, config.port)
}

/// Open the store, bind, and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, settings: ShopfloorToml) -> Result<()> {
    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    let db = DashboardDb::new(&config.db_path)
        .with_context(|| format!("Cannot open document store at {}", config.db_path.display()))?;
    let state = Arc::new(AppState::new(DbHandle::new(db), settings)?);

    let mut router = build_router(state);
    if config.dev_mode {
        router = router.layer(CorsLayer::permissive());
    }

    let addr = bind_addr(&config);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot listen on {}", addr))?;
    tracing::info!(
        db = %config.db_path.display(),
        dev = config.dev_mode,
        "dashboard listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_ctrl_c())
        .await
        .context("Dashboard server stopped with an error")?;

    tracing::info!("dashboard stopped");
    Ok(())
}

async fn wait_for_ctrl_c() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Ctrl+C received, draining connections");
}
