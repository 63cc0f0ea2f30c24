//! Prometheus metrics handler

use crate::domain::chat::MessageKind;
use crate::domain::signaling::SignalKind;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder. Fails if one is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        "livedesk_signals_relayed_total",
        "Call signaling frames relayed to room members"
    );
    describe_counter!(
        "livedesk_signals_blocked_total",
        "Media negotiation frames dropped because the call was not accepted"
    );
    describe_gauge!("livedesk_call_rooms", "Number of open call rooms");
    describe_counter!(
        "livedesk_chat_messages_total",
        "Chat messages relayed to conversation members"
    );

    Ok(handle)
}

/// HTTP metrics handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    (StatusCode::OK, prometheus_handle.render()).into_response()
}

pub fn record_signal_relayed(kind: SignalKind) {
    counter!("livedesk_signals_relayed_total", "event" => kind.event_name()).increment(1);
}

pub fn record_signal_blocked(kind: SignalKind) {
    counter!("livedesk_signals_blocked_total", "event" => kind.event_name()).increment(1);
}

pub fn update_call_rooms(count: usize) {
    gauge!("livedesk_call_rooms").set(count as f64);
}

pub fn record_chat_message(kind: MessageKind) {
    let kind = match kind {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
        MessageKind::Audio => "audio",
    };
    counter!("livedesk_chat_messages_total", "kind" => kind).increment(1);
}
