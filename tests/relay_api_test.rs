//! Relay server integration tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use livedesk::config::Config;
use livedesk::domain::call::{IceCandidate, SessionDescription};
use livedesk::domain::shared::value_objects::{ConversationId, PeerId};
use livedesk::domain::signaling::{CallControl, CallFrame, SignalKind, SignalingMessage};
use livedesk::interface::api::call_relay::disconnect;
use livedesk::interface::api::{build_router, relay_call_frame, AppState, RelayOutcome};
use serde_json::Value;
use tokio::sync::broadcast::error::TryRecvError;
use tower::ServiceExt; // For `oneshot`

const ROOM: &str = "conv-7";

fn join(room: &str, key: Option<String>) -> CallFrame {
    CallFrame::Control(CallControl::Join {
        conversation_id: room.into(),
        room_key: key,
    })
}

fn signal(message: SignalingMessage) -> CallFrame {
    CallFrame::Signal(message)
}

fn ring() -> CallFrame {
    signal(SignalingMessage::Ring {
        conversation_id: ROOM.into(),
        from: "Customer".to_string(),
    })
}

fn accept() -> CallFrame {
    signal(SignalingMessage::Accept {
        conversation_id: ROOM.into(),
    })
}

fn offer() -> CallFrame {
    signal(SignalingMessage::Offer {
        conversation_id: ROOM.into(),
        sdp: SessionDescription::offer("v=0"),
    })
}

fn ended() -> CallFrame {
    signal(SignalingMessage::Ended {
        conversation_id: ROOM.into(),
    })
}

async fn joined_pair(state: &AppState) -> (PeerId, PeerId) {
    let visitor = PeerId::new();
    let agent = PeerId::new();
    for peer in [visitor, agent] {
        assert_eq!(
            relay_call_frame(state, peer, join(ROOM, None)).await,
            RelayOutcome::Joined(ROOM.into())
        );
    }
    (visitor, agent)
}

async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
    let app = build_router(state, None);
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_api_health() {
    let (status, json) = get_json(AppState::new(Config::default()), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["calls_enabled"], true);
}

#[tokio::test]
async fn test_api_ice_servers_with_turn() {
    let mut config = Config::default();
    config.ice.turn_url = Some("turn:turn.example.com:3478".to_string());
    config.ice.turn_username = Some("widget".to_string());
    config.ice.turn_credential = Some("s3cret".to_string());

    let (status, json) = get_json(AppState::new(config), "/v1/api/ice-servers").await;

    assert_eq!(status, StatusCode::OK);
    let servers = json["iceServers"].as_array().unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0]["urls"], "stun:stun.l.google.com:19302");
    assert!(servers[0].get("username").is_none());
    assert_eq!(servers[1]["username"], "widget");
    assert_eq!(servers[1]["credential"], "s3cret");
}

#[tokio::test]
async fn test_api_ice_servers_without_complete_turn() {
    let mut config = Config::default();
    config.ice.turn_url = Some("turn:turn.example.com:3478".to_string());

    let (_, json) = get_json(AppState::new(config), "/v1/api/ice-servers").await;

    assert_eq!(json["iceServers"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_api_metrics_not_mounted_without_recorder() {
    let (status, _) = get_json(AppState::new(Config::default()), "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ring_is_relayed_to_other_members_only() {
    let state = AppState::new(Config::default());
    let (visitor, agent) = joined_pair(&state).await;
    let mut rx = state.call_hub.subscribe();

    assert_eq!(
        relay_call_frame(&state, visitor, ring()).await,
        RelayOutcome::Relayed(SignalKind::Ring)
    );

    let envelope = rx.recv().await.unwrap();
    assert_eq!(envelope.room, ConversationId::new(ROOM));
    assert!(envelope.is_for(agent, |_| true));
    assert!(!envelope.is_for(visitor, |_| true));

    let frame: Value = serde_json::from_str(&envelope.text).unwrap();
    assert_eq!(frame["event"], "call:ring");
    assert_eq!(frame["data"]["from"], "Customer");
}

#[tokio::test]
async fn test_media_negotiation_blocked_until_accept() {
    let state = AppState::new(Config::default());
    let (visitor, agent) = joined_pair(&state).await;
    let mut rx = state.call_hub.subscribe();

    assert_eq!(
        relay_call_frame(&state, visitor, offer()).await,
        RelayOutcome::Blocked(SignalKind::Offer)
    );
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    assert_eq!(
        relay_call_frame(&state, agent, accept()).await,
        RelayOutcome::Relayed(SignalKind::Accept)
    );
    assert_eq!(
        relay_call_frame(&state, visitor, offer()).await,
        RelayOutcome::Relayed(SignalKind::Offer)
    );
    let candidate = signal(SignalingMessage::Candidate {
        conversation_id: ROOM.into(),
        candidate: IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"),
    });
    assert_eq!(
        relay_call_frame(&state, agent, candidate.clone()).await,
        RelayOutcome::Relayed(SignalKind::Candidate)
    );

    // Ending the call closes the negotiation window again
    assert_eq!(
        relay_call_frame(&state, visitor, ended()).await,
        RelayOutcome::Relayed(SignalKind::Ended)
    );
    assert_eq!(
        relay_call_frame(&state, agent, candidate).await,
        RelayOutcome::Blocked(SignalKind::Candidate)
    );
}

#[tokio::test]
async fn test_signal_without_join_is_rejected() {
    let state = AppState::new(Config::default());
    joined_pair(&state).await;

    assert_eq!(
        relay_call_frame(&state, PeerId::new(), ring()).await,
        RelayOutcome::Rejected("not_joined")
    );
}

#[tokio::test]
async fn test_ended_for_unknown_room_is_dropped() {
    let state = AppState::new(Config::default());

    assert_eq!(
        relay_call_frame(&state, PeerId::new(), ended()).await,
        RelayOutcome::Dropped
    );
}

#[tokio::test]
async fn test_room_capacity_is_enforced() {
    let mut config = Config::default();
    config.calls.max_room_members = 2;
    let state = AppState::new(config);
    joined_pair(&state).await;

    assert_eq!(
        relay_call_frame(&state, PeerId::new(), join(ROOM, None)).await,
        RelayOutcome::Rejected("room_full")
    );
}

#[tokio::test]
async fn test_room_key_required() {
    let mut config = Config::default();
    config.calls.require_room_key = true;
    config.security.room_key_secret = "test-secret".to_string();
    let state = AppState::new(config);

    assert_eq!(
        relay_call_frame(&state, PeerId::new(), join(ROOM, None)).await,
        RelayOutcome::Rejected("invalid_room_key")
    );
    assert_eq!(
        relay_call_frame(&state, PeerId::new(), join(ROOM, Some("00ff".to_string()))).await,
        RelayOutcome::Rejected("invalid_room_key")
    );

    let key = state.keys.key_for(&ConversationId::new(ROOM));
    assert_eq!(
        relay_call_frame(&state, PeerId::new(), join(ROOM, Some(key))).await,
        RelayOutcome::Joined(ROOM.into())
    );
}

#[tokio::test]
async fn test_calls_disabled() {
    let mut config = Config::default();
    config.calls.enabled = false;
    let state = AppState::new(config);

    assert_eq!(
        relay_call_frame(&state, PeerId::new(), join(ROOM, None)).await,
        RelayOutcome::Rejected("calls_disabled")
    );
    assert_eq!(
        relay_call_frame(&state, PeerId::new(), ring()).await,
        RelayOutcome::Dropped
    );
}

#[tokio::test]
async fn test_disconnect_deletes_empty_rooms() {
    let state = AppState::new(Config::default());
    let (visitor, agent) = joined_pair(&state).await;
    assert_eq!(state.rooms.room_count().await, 1);

    disconnect(&state, visitor).await;
    assert_eq!(state.rooms.room_count().await, 1);
    assert!(!state.rooms.is_member(&ROOM.into(), visitor).await);

    disconnect(&state, agent).await;
    assert_eq!(state.rooms.room_count().await, 0);
}
