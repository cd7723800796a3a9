//! tinyserved: a single-host service orchestrator.
//!
//! A declarative catalog of containerized services is persisted in a state
//! store, rendered into compose/proxy/tunnel bundles, applied through the
//! external compose tool, and promoted only after health checks pass.

pub mod access_logs;
pub mod app_state;
pub mod auth;
pub mod cloudflare;
pub mod compose;
pub mod config;
pub mod deploy;
pub mod error;
pub mod generate;
pub mod http;
pub mod paths;
pub mod state;
pub mod test_support;
pub mod tokens;
pub mod validate;
pub mod version;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::access_logs::AccessLogs;
use crate::app_state::AppState;
use crate::compose::{CliCompose, ComposeBackend};
use crate::config::AppConfig;
use crate::deploy::DeployEngine;
use crate::http::{admin_router, ui_router, webhook_router};
use crate::paths::DataPaths;
use crate::state::{sqlite::SqliteStore, Store};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Boot the daemon: data dirs, state store, compose detection, and the
/// three listeners. Returns after a clean drain.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let paths = DataPaths::new(&config.data_dir);
    paths.ensure().context("create data directories")?;

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&paths.state_db).await?);

    // Load-then-save materializes defaults on first boot.
    let initial = store.load().await?;
    store.save(initial).await?;

    let compose_backend = CliCompose::detect().await;
    info!(compose = compose_backend.compose_command(), "compose front-end selected");
    let compose: Arc<dyn ComposeBackend> = Arc::new(compose_backend);

    let ports = config.listener_ports();
    let engine = Arc::new(DeployEngine::new(
        store.clone(),
        compose.clone(),
        paths.clone(),
        ports,
    ));

    let state = AppState {
        store,
        compose,
        engine,
        paths: paths.clone(),
        ports,
        access_logs: AccessLogs::new(config.access_log_lines),
    };

    let admin = admin_router(state.clone());
    let ui = ui_router(state.clone(), config.static_dir.clone());
    let webhook = webhook_router(state);

    let admin_listener = TcpListener::bind(&config.admin_addr)
        .await
        .with_context(|| format!("bind admin listener {}", config.admin_addr))?;
    let ui_listener = TcpListener::bind(&config.ui_addr)
        .await
        .with_context(|| format!("bind ui listener {}", config.ui_addr))?;
    let webhook_listener = TcpListener::bind(&config.webhook_addr)
        .await
        .with_context(|| format!("bind webhook listener {}", config.webhook_addr))?;

    info!(addr = %config.admin_addr, state_db = %paths.state_db.display(), "tinyserved listening");
    info!(addr = %config.ui_addr, "tinyserved ui listening");
    info!(addr = %config.webhook_addr, "tinyserved webhook listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut admin_shutdown = shutdown_rx.clone();
    let mut ui_shutdown = shutdown_rx.clone();
    let mut webhook_shutdown = shutdown_rx.clone();

    let servers = async {
        tokio::try_join!(
            async {
                axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.changed().await;
                    })
                    .await
                    .context("admin server failed")
            },
            async {
                axum::serve(ui_listener, ui)
                    .with_graceful_shutdown(async move {
                        let _ = ui_shutdown.changed().await;
                    })
                    .await
                    .context("ui server failed")
            },
            async {
                axum::serve(webhook_listener, webhook)
                    .with_graceful_shutdown(async move {
                        let _ = webhook_shutdown.changed().await;
                    })
                    .await
                    .context("webhook server failed")
            },
        )
    };

    // Give in-flight work the drain window once a shutdown is requested;
    // in-flight deploys run to promote-or-restore inside it.
    let mut drain_rx = shutdown_rx.clone();
    tokio::select! {
        res = servers => {
            res?;
            info!("shutdown complete");
        }
        _ = async {
            let _ = drain_rx.changed().await;
            tokio::time::sleep(DRAIN_TIMEOUT).await;
        } => {
            warn!("shutdown drain timeout elapsed; exiting with requests in flight");
        }
    }

    Ok(())
}

/// JSON tracing to stderr, filtered by `RUST_LOG` (info default).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}
