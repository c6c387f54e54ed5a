use p1_dashboard::api::{self, AppState};
use p1_dashboard::config::Config;
use p1_dashboard::dashboard::Dashboard;
use p1_dashboard::db::{self, DbPool};
use p1_dashboard::poll::{self, DeviceClient};
use p1_dashboard::repositories::{
    run_retention, DashboardSettings, SampleLog, SettingsRepository, SqliteSampleLog,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Starting p1-dashboard");

    let cfg_path = std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(path = %cfg_path, "Configuration loaded");

    let pool = open_storage(&cfg.storage.url).await?;
    let settings_repo = SettingsRepository::new(pool.clone());
    let defaults = DashboardSettings::from_config(&cfg);
    let settings = match settings_repo.load(&defaults).await {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "failed to load saved settings; using config defaults");
            defaults
        }
    };
    info!(
        device_host = %settings.device_host,
        poll_interval_secs = settings.poll_interval_secs,
        caching = settings.caching_enabled,
        "Settings loaded"
    );

    let log: Arc<dyn SampleLog> = Arc::new(SqliteSampleLog::new(pool));
    let caching = settings.caching_enabled;
    let (mut dashboard, handle) = Dashboard::new(
        &cfg.window,
        settings,
        cfg.device.auto_connect,
        Arc::clone(&log),
        settings_repo,
    );

    if caching {
        match log.latest_with_gas().await {
            Ok(Some(latest)) => {
                info!(timestamp = latest.timestamp, "Continuing gas deltas from saved sample");
                dashboard.seed_gas(&latest.sample);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read last gas reading"),
        }
    }

    if let Some(days) = cfg.storage.retention_days {
        info!(retention_days = days, "Sample retention enabled");
        tokio::spawn(run_retention(Arc::clone(&log), days));
    }

    let poll_settings = dashboard.poll_settings();
    let dashboard_task = dashboard.spawn();

    let client = DeviceClient::new(Duration::from_millis(cfg.device.request_timeout_ms))?;
    let poll_task = tokio::spawn(poll::run_poll_loop(client, poll_settings, handle.clone()));

    let router = api::create_router(AppState::new(handle));
    let addr = format!("{}:{}", cfg.api.host, cfg.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    info!("Dashboard API listening on {}", addr);

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "API server error");
    }

    poll_task.abort();
    let _ = dashboard_task.await;

    info!("Application shutdown complete");
    Ok(())
}

/// The configured database, or an in-memory one when it cannot be opened.
/// The dashboard stays usable live-only; nothing is kept across restarts.
async fn open_storage(url: &str) -> anyhow::Result<DbPool> {
    match db::connect(url).await {
        Ok(pool) => {
            info!(url = %url, "Local storage ready");
            Ok(pool)
        }
        Err(e) => {
            warn!(url = %url, error = %e, "local storage unavailable; falling back to memory");
            Ok(db::connect("sqlite::memory:").await?)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
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
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
