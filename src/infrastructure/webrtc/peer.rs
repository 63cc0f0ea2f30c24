//! Peer connections backed by webrtc-rs

use super::devices::WebRtcAudioTrack;
use crate::application::call::media::{
    PeerConnection, PeerConnectionFactory, PeerEvent, PeerEventSender,
};
use crate::domain::call::{IceCandidate, LocalTrack, RemoteStream, SdpType, SessionDescription};
use crate::domain::ice::IceServer;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::CallResult;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn peer_error(e: webrtc::Error) -> CallError {
    CallError::PeerConnection(e.to_string())
}

fn negotiation_error(e: webrtc::Error) -> CallError {
    CallError::Negotiation(e.to_string())
}

fn to_rtc_description(description: &SessionDescription) -> CallResult<RTCSessionDescription> {
    let sdp = description.sdp.clone();
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
    }
    .map_err(negotiation_error)
}

fn to_rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.to_vec(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Builds one webrtc-rs API and peer connection per call
#[derive(Default)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> CallResult<Box<dyn PeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(peer_error)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(peer_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: to_rtc_ice_servers(ice_servers),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(peer_error)?);

        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("peer.candidate_encode_failed: {}", e),
                }
            })
        }));

        let tx = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let _ = tx.send(PeerEvent::RemoteTrack(RemoteStream {
                    id: track.stream_id(),
                    track_id: track.id(),
                    codec: track.codec().capability.mime_type,
                }));
                Box::pin(async {})
            },
        ));

        let tx = events;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let _ = tx.send(PeerEvent::StateChanged(state.to_string()));
            Box::pin(async {})
        }));

        debug!("peer.created ice_servers={}", ice_servers.len());
        Ok(Box::new(WebRtcPeer { pc }))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(&self, track: &LocalTrack) -> CallResult<()> {
        let audio = track
            .source
            .as_any()
            .downcast_ref::<WebRtcAudioTrack>()
            .ok_or_else(|| {
                CallError::PeerConnection(format!("Unsupported track source for {}", track.id))
            })?;

        let rtp_sender = self
            .pc
            .add_track(audio.local() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(peer_error)?;

        // RTCP must be drained for interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> CallResult<SessionDescription> {
        let offer = self.pc.create_offer(None).await.map_err(negotiation_error)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> CallResult<SessionDescription> {
        let answer = self.pc.create_answer(None).await.map_err(negotiation_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> CallResult<()> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(negotiation_error)
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> CallResult<()> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(negotiation_error)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> CallResult<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment.clone(),
            })
            .await
            .map_err(|e| CallError::CandidateApply(e.to_string()))
    }

    async fn close(&self) -> CallResult<()> {
        self.pc.close().await.map_err(peer_error)
    }
}
