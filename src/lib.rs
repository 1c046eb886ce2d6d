pub mod commands;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod errors;
pub mod i18n;
pub mod models;
pub mod native;
pub mod persistence;
pub mod popup;
pub mod render;
pub mod scan;
pub mod state;
pub mod store;
pub mod sync;
pub mod urls;
pub mod validation;
pub mod widgets;

use crate::config::DashboardConfig;
use crate::dashboard::{Confirmer, Dashboard, DashboardDeps, RenderSink};
use crate::popup::Popup;
use crate::sync::SyncBus;
use crate::widgets::http::HttpImageProbe;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the JSON file logger once per process. Later calls are no-ops.
pub fn init_tracing(log_dir: &Path, file_name: &str) -> Result<(), String> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

pub fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}

/// Opens the primary surface with production collaborators.
pub async fn open_dashboard(
    config: &DashboardConfig,
    confirmer: Arc<dyn Confirmer>,
    sink: Arc<dyn RenderSink>,
    bus: SyncBus,
) -> Result<Arc<Dashboard>, String> {
    init_tracing(&config.log_dir(), &config.log_file)?;
    let deps = DashboardDeps::from_config(config, confirmer, sink, bus).map_err(to_client_error)?;
    Ok(Dashboard::open(deps).await)
}

/// Opens the quick-save popup against the same store and bus as the dashboard.
pub fn open_popup(config: &DashboardConfig, dashboard: &Dashboard) -> Result<Popup, String> {
    let probe = HttpImageProbe::new(config.image_probe_timeout()).map_err(to_client_error)?;
    Ok(Popup::new(
        dashboard.persister.store().clone(),
        Arc::new(probe),
        dashboard.bus.clone(),
    ))
}
