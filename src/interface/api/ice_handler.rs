//! ICE server configuration endpoint

use super::state::AppState;
use crate::domain::ice::IceServerConfig;
use axum::{extract::State, Json};
use serde::Serialize;

/// `GET /v1/api/ice-servers`
pub async fn get_ice_servers(State(state): State<AppState>) -> Json<IceServerConfig> {
    Json(IceServerConfig {
        ice_servers: state.config.ice.ice_servers(),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub calls_enabled: bool,
    pub call_rooms: usize,
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        calls_enabled: state.config.calls.enabled,
        call_rooms: state.rooms.room_count().await,
    })
}
