mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use delivery_core::records::RecordSource;
use delivery_core::settings::Settings;
use delivery_core::user_settings::UserSettings;
use delivery_pipeline::{
    load_entities, passed_deliverables, validate_all, EventBus, EventLogger, ExportError, ExportRequest, Exporter,
};
use delivery_shotgrid::{InMemoryShotGrid, ShotGridCache};

use crate::config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "delivery_worker=info,delivery_pipeline=info,delivery_nuke=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(project_id = config.project_id, "Delivery worker starting");

    // --- Settings ---
    let settings = Arc::new(
        Settings::load(&config.settings_path)
            .with_context(|| format!("loading settings from {}", config.settings_path.display()))?,
    );

    // --- Production database ---
    let shotgrid = Arc::new(
        InMemoryShotGrid::from_snapshot(&config.snapshot_path)
            .with_context(|| format!("loading snapshot from {}", config.snapshot_path.display()))?,
    );
    let mut cache = ShotGridCache::new(shotgrid, config.project_id, &settings);
    cache.load(&settings).await.context("loading database cache")?;
    settings
        .validate_fields(cache.schema())
        .context("settings reference unknown fields")?;
    cache.process();

    let mut entities = load_entities(&mut cache, &settings)
        .await
        .context("loading delivery set")?;
    tracing::info!(entities = entities.len(), "Delivery set loaded");

    // --- User settings ---
    let mut user = UserSettings::from_settings(&settings);
    user.delivery_version = config.delivery_version;
    user.delivery_location = config.delivery_location.clone();
    if let Some(letterbox) = &config.letterbox {
        user.letterbox = Some(letterbox.parse().context("parsing DELIVERY_LETTERBOX")?);
    }
    if let Some(path) = &config.csv_template {
        user.load_csv_template(path)
            .with_context(|| format!("loading CSV template {}", path.display()))?;
    }

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(EventLogger::run(event_bus.subscribe()));

    // --- Validation ---
    let summary = validate_all(&mut entities, event_bus.as_ref());
    if !summary.success() {
        tracing::warn!(failed = summary.failed, "Some versions failed validation and will be skipped");
    }
    let deliverables = passed_deliverables(&entities);

    // --- Export ---
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let exporter = Arc::new(Exporter::new(settings.clone(), Arc::new(cache), event_bus.clone()));
    let request = ExportRequest {
        entities,
        deliverables,
        user,
    };
    let result = exporter.spawn(request, cancel).await.context("export task panicked")?;
    signal_handle.abort();

    match &result {
        Ok(report) => tracing::info!(
            delivered = report.delivered,
            failed = report.failed,
            manifests = report.manifests.len(),
            "Delivery complete",
        ),
        Err(ExportError::Cancelled) => tracing::warn!("Delivery cancelled"),
        Err(e) => tracing::error!(error = %e, "Delivery failed"),
    }

    // --- Shutdown ---
    // Dropping the bus closes the channel and stops the logger.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(config.shutdown_timeout_secs), logger_handle).await;
    tracing::info!("Delivery worker stopped");

    match result {
        Ok(_) | Err(ExportError::Cancelled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), cancelling delivery");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, cancelling delivery");
        }
    }
}
