use crate::api::AppState;
use crate::error::Result;
use crate::repositories::{DashboardSettings, SettingsPatch};
use axum::{extract::State, response::Json};
use tracing::info;

pub async fn get_settings(State(state): State<AppState>) -> Result<Json<DashboardSettings>> {
    Ok(Json(state.dashboard.settings().await?))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<DashboardSettings>> {
    let updated = state.dashboard.update_settings(patch).await?;
    info!(
        device_host = %updated.device_host,
        poll_interval_secs = updated.poll_interval_secs,
        caching = updated.caching_enabled,
        "settings updated"
    );
    Ok(Json(updated))
}
