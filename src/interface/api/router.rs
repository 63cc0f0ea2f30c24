//! API Router configuration

use super::call_relay::call_ws_handler;
use super::chat_relay::chat_ws_handler;
use super::ice_handler::{get_ice_servers, health_check};
use super::metrics_handler::metrics_handler;
use super::state::AppState;
use axum::{http::HeaderValue, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// Build the relay router. `/metrics` is mounted only with a recorder handle.
pub fn build_router(state: AppState, prometheus_handle: Option<PrometheusHandle>) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/api/ice-servers", get(get_ice_servers))
        .route("/call", get(call_ws_handler))
        .route("/chat", get(chat_ws_handler))
        .with_state(state);

    let router = match prometheus_handle {
        Some(handle) => {
            // Metrics route (separate state)
            let metrics_routes = Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(handle);
            api_routes.merge(metrics_routes)
        }
        None => api_routes,
    };

    router.layer(cors).layer(TraceLayer::new_for_http())
}
