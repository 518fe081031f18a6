mod bootstrap;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use pulse_core::settings::{Command, ReportFormat, Settings};
use pulse_data::analysis::render_text;
use pulse_data::store::FileRecordStore;
use pulse_data::IngestService;
use pulse_server::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load();
    let data_dir = settings.data_dir();

    bootstrap::ensure_directories(&data_dir)?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    tracing::info!("Pulse Monitor v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Data directory: {}", data_dir.display());

    let store = Arc::new(FileRecordStore::new(&data_dir));
    let service = IngestService::new(store).with_preview_limit(settings.preview_limit);

    match settings.command() {
        Command::Serve => serve(&settings, service).await?,
        Command::Ingest { file } => ingest_file(&service, &file)?,
        Command::Summary => {
            let view = service.summary()?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Analyze { format } => {
            let report = service.analysis()?;
            match format {
                ReportFormat::Text => println!("{}", render_text(&report)),
                ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
    }

    Ok(())
}

async fn serve(settings: &Settings, service: IngestService) -> Result<()> {
    let app = router(AppState::new(service), settings.max_upload_bytes());

    let listener = bind_listener(settings).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Bind the configured host and port, resolving host names such as
/// `localhost`.
async fn bind_listener(settings: &Settings) -> Result<tokio::net::TcpListener> {
    let (host, port) = settings.bind_target();
    tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {}:{}", host, port))
}

fn ingest_file(service: &IngestService, path: &Path) -> Result<()> {
    let content = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let outcome = service.ingest(&content, &file_name)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
