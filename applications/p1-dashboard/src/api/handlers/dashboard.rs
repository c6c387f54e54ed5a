use crate::api::models::{ConnectionRequest, ConnectionResponse, TimeframeRequest};
use crate::api::AppState;
use crate::dashboard::{DashboardStatus, SelectionView};
use crate::error::Result;
use crate::series::ChartSet;
use crate::stats::StatsSnapshot;
use axum::{extract::State, response::Json};

pub async fn get_charts(State(state): State<AppState>) -> Result<Json<ChartSet>> {
    Ok(Json(state.dashboard.charts().await?))
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<Option<StatsSnapshot>>> {
    Ok(Json(state.dashboard.stats().await?))
}

pub async fn get_status(State(state): State<AppState>) -> Result<Json<DashboardStatus>> {
    Ok(Json(state.dashboard.status().await?))
}

/// Switch the dashboard view. Historical views answer once their history is loaded.
pub async fn select_timeframe(
    State(state): State<AppState>,
    Json(req): Json<TimeframeRequest>,
) -> Result<Json<SelectionView>> {
    let (timeframe, selection) = req.parse()?;
    let view = state
        .dashboard
        .select_timeframe(timeframe, selection)
        .await?;
    Ok(Json(view))
}

pub async fn set_connection(
    State(state): State<AppState>,
    Json(req): Json<ConnectionRequest>,
) -> Result<Json<ConnectionResponse>> {
    let connected = state.dashboard.set_connected(req.connected).await?;
    Ok(Json(ConnectionResponse { connected }))
}
