use std::{path::Path, sync::Arc};

use {
    anyhow::Context,
    hookgate_channels::MessagingBackend,
    hookgate_config::GatewayConfig,
    hookgate_sessions::SqliteUserStore,
    tracing::{info, warn},
};

use crate::{
    manager::{SessionManager, SessionOptions},
    reconcile::reconcile,
};

/// Open (creating if needed) the user database.
pub async fn open_store(path: &Path) -> anyhow::Result<SqliteUserStore> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    SqliteUserStore::open(path)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))
}

/// Start the gateway: relaunch persisted sessions and run until ctrl-c.
pub async fn start_gateway(
    config: GatewayConfig,
    backend: Arc<dyn MessagingBackend>,
) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&config.database.path).await?);
    let backend_id = backend.id().to_string();
    let manager = SessionManager::new(store, backend, SessionOptions::from_config(&config));

    let report = reconcile(&manager).await;

    // Startup banner.
    let lines = [
        format!("hookgate v{}", env!("CARGO_PKG_VERSION")),
        format!("database: {}", config.database.path.display()),
        format!("files: {}", config.storage.files_dir.display()),
        format!("backend: {backend_id}"),
        format!("sessions restored: {}", report.started.len()),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    if !manager.shutdown(config.shutdown.timeout()).await {
        warn!("some sessions were still running at exit");
    }
    Ok(())
}
