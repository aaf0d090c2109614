//! `pixoo-daemon` -- keeps a networked 64×64 display connected and rotating.
//!
//! Connects to the device (directly via `PIXOO_DEVICE_IP`, otherwise via
//! discovery), supervises the link, resumes the saved rotation, and sweeps
//! temporary upload files. An optional file argument is staged and shown
//! once at startup.
//!
//! See [`DaemonConfig::from_env`] for the environment variables.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pixoo_core::CoreError;
use pixoo_daemon::background;
use pixoo_daemon::config::DaemonConfig;
use pixoo_daemon::services::Services;
use pixoo_device::reconnect;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "pixoo_daemon=info,pixoo_device=info,pixoo_rotation=info";

/// How long each background task gets to stop on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = DaemonConfig::from_env().context("invalid configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(
        data_dir = %config.data_dir.display(),
        gallery_dir = %config.gallery_dir.display(),
        device_ip = ?config.device_ip,
        "Starting pixoo-daemon",
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create {}", config.data_dir.display()))?;

    // --- Services ---
    let services = Arc::new(Services::build(&config));
    let cancel = CancellationToken::new();

    if !services.connect_initial(&config).await {
        tracing::warn!("Starting without a device; the supervisor will keep looking");
    }

    // --- Connection supervisor ---
    let supervisor_handle = tokio::spawn(reconnect::maintain_connection(
        Arc::clone(&services.connection),
        Arc::clone(&services.discovery),
        services.reconnect.clone(),
        cancel.child_token(),
    ));

    // --- Rotation ---
    if config.resume_rotation {
        match services.scheduler.resume().await {
            Ok(()) => tracing::info!("Saved rotation resumed"),
            Err(CoreError::Validation(reason)) => tracing::info!(%reason, "No rotation resumed"),
            Err(e) => tracing::error!(error = %e, "Failed to resume rotation"),
        }
    }

    // --- One-shot file ---
    if let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) {
        show_file(&services, &path).await;
    }

    // --- Temp cleanup ---
    let cleanup_handle = tokio::spawn(background::cleanup::run(
        Arc::clone(&services.uploads),
        Arc::clone(&services.files),
        config.cleanup_interval,
        cancel.child_token(),
    ));

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, supervisor_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, cleanup_handle).await;
    services.shutdown(SHUTDOWN_GRACE).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn show_file(services: &Services, path: &std::path::Path) {
    let key = match services.ingest.stage(path) {
        Ok(key) => key,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Cannot stage file");
            return;
        }
    };
    match services.ingest.show(&key, None).await {
        Ok(summary) => tracing::info!(
            frames = summary.frames_sent,
            speed_ms = summary.speed_ms,
            "File shown on device",
        ),
        Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to show file"),
    }
}

/// Wait for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
