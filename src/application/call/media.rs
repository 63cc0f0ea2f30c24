//! Media Session Manager
//!
//! Owns the peer connection and local capture of a [`CallSession`] and
//! buffers remote ICE candidates that arrive before the remote
//! description.

use super::channel::SignalingChannel;
use super::session::CallSession;
use crate::domain::call::{
    AudioConstraints, CallRole, IceCandidate, LocalStream, LocalTrack, OutputDevice,
    RemoteStream, SessionDescription,
};
use crate::domain::ice::IceServer;
use crate::domain::shared::error::{CallError, DeviceError};
use crate::domain::shared::result::CallResult;
use crate::domain::shared::value_objects::ConversationId;
use crate::domain::signaling::SignalingMessage;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events raised by a peer connection backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local ICE candidate was gathered
    LocalCandidate(IceCandidate),
    /// Remote media arrived
    RemoteTrack(RemoteStream),
    /// Connection state changed (backend-specific name)
    StateChanged(String),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Local endpoint of one call's media transport
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: &LocalTrack) -> CallResult<()>;

    async fn create_offer(&self) -> CallResult<SessionDescription>;

    async fn create_answer(&self) -> CallResult<SessionDescription>;

    async fn set_local_description(&self, description: &SessionDescription) -> CallResult<()>;

    async fn set_remote_description(&self, description: &SessionDescription) -> CallResult<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> CallResult<()>;

    /// Release sockets and ICE agents
    async fn close(&self) -> CallResult<()>;
}

/// Builds peer connections bound to an ICE configuration
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> CallResult<Box<dyn PeerConnection>>;
}

/// Source of the ICE server list, consulted once per call attempt
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IceConfigSource: Send + Sync {
    async fn fetch(&self) -> CallResult<Vec<IceServer>>;
}

/// Microphone access
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: AudioConstraints,
    ) -> std::result::Result<LocalStream, DeviceError>;
}

/// Playback sink for remote media
#[async_trait]
pub trait AudioOutput: Send + Sync {
    fn attach(&self, stream: RemoteStream);

    fn detach(&self);

    /// Whether the platform can route playback to a chosen device
    fn supports_sink_selection(&self) -> bool;

    async fn output_devices(&self) -> CallResult<Vec<OutputDevice>>;

    async fn set_sink(&self, device_id: &str) -> CallResult<()>;
}

pub const DEFAULT_SINK: &str = "default";

pub struct MediaSessionManager {
    ice: Arc<dyn IceConfigSource>,
    peers: Arc<dyn PeerConnectionFactory>,
    devices: Arc<dyn MediaDevices>,
    output: Arc<dyn AudioOutput>,
    channel: Arc<SignalingChannel>,
}

impl MediaSessionManager {
    pub fn new(
        ice: Arc<dyn IceConfigSource>,
        peers: Arc<dyn PeerConnectionFactory>,
        devices: Arc<dyn MediaDevices>,
        output: Arc<dyn AudioOutput>,
        channel: Arc<SignalingChannel>,
    ) -> Self {
        Self {
            ice,
            peers,
            devices,
            output,
            channel,
        }
    }

    /// Create a session with a live peer connection
    pub async fn create_session(
        &self,
        conversation_id: ConversationId,
        role: CallRole,
    ) -> CallResult<CallSession> {
        let mut session = CallSession::new(conversation_id, role);
        self.connect(&mut session).await?;
        Ok(session)
    }

    /// Fetch ICE configuration and build the session's peer connection.
    ///
    /// Local candidates are forwarded as `rtc:candidate` and remote
    /// tracks are attached to the audio output until the session closes.
    pub async fn connect(&self, session: &mut CallSession) -> CallResult<()> {
        if session.closed {
            return Err(CallError::PeerConnection("Session is closed".to_string()));
        }
        if session.peer.is_some() {
            return Ok(());
        }

        let ice_servers = self.ice.fetch().await?;
        debug!(
            "session.ice id={} servers={}",
            session.id(),
            ice_servers.len()
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = self.peers.create(&ice_servers, tx).await?;

        session.peer = Some(peer);
        session.event_task = Some(tokio::spawn(forward_peer_events(
            rx,
            session.conversation_id().clone(),
            self.channel.clone(),
            self.output.clone(),
            session.remote_stream.clone(),
        )));

        info!("session.connected id={} room={}", session.id(), session.conversation_id());
        Ok(())
    }

    /// Request the microphone with voice processing enabled and no video
    pub async fn capture_local_audio(&self) -> CallResult<LocalStream> {
        let stream = self
            .devices
            .get_user_media(AudioConstraints::voice())
            .await
            .map_err(|e| {
                warn!("media.capture_failed name={} msg={}", e.name, e.message);
                CallError::from(e)
            })?;

        debug!("media.captured stream={} tracks={}", stream.id, stream.tracks.len());
        Ok(stream)
    }

    /// Add every audio track of `stream` to the session's peer connection.
    ///
    /// The session takes ownership of the stream first so a failure here
    /// still releases the tracks on close.
    pub async fn attach_tracks(
        &self,
        session: &mut CallSession,
        stream: LocalStream,
    ) -> CallResult<()> {
        if session.closed {
            stream.stop_all();
            return Err(CallError::PeerConnection("Session is closed".to_string()));
        }

        let tracks: Vec<LocalTrack> = stream.audio_tracks().cloned().collect();
        if let Some(previous) = session.local_stream.replace(stream) {
            previous.stop_all();
        }

        let peer = session.peer()?;
        for track in &tracks {
            peer.add_track(track).await?;
        }
        debug!("media.attached id={} tracks={}", session.id(), tracks.len());
        Ok(())
    }

    /// Create an offer and install it as the local description
    pub async fn create_offer(&self, session: &mut CallSession) -> CallResult<SessionDescription> {
        if session.role() != CallRole::Caller || session.local_description.is_some() {
            return Err(CallError::Negotiation(
                "Session is not ready to offer".to_string(),
            ));
        }

        let peer = session.peer()?;
        let offer = peer.create_offer().await?;
        peer.set_local_description(&offer).await?;
        session.local_description = Some(offer.clone());
        Ok(offer)
    }

    /// Create an answer to the applied remote offer and install it locally
    pub async fn create_answer(
        &self,
        session: &mut CallSession,
    ) -> CallResult<SessionDescription> {
        if session.role() != CallRole::Callee
            || session.remote_description.is_none()
            || session.local_description.is_some()
        {
            return Err(CallError::Negotiation(
                "Session is not ready to answer".to_string(),
            ));
        }

        let peer = session.peer()?;
        let answer = peer.create_answer().await?;
        peer.set_local_description(&answer).await?;
        session.local_description = Some(answer.clone());
        Ok(answer)
    }

    /// Apply the remote description, then every buffered candidate in receipt order
    pub async fn apply_remote_description(
        &self,
        session: &mut CallSession,
        description: SessionDescription,
    ) -> CallResult<()> {
        if !session.expects_remote_description(description.sdp_type) {
            return Err(CallError::Negotiation(format!(
                "Unexpected remote {:?} in state {}",
                description.sdp_type,
                session.state()
            )));
        }

        session
            .peer()?
            .set_remote_description(&description)
            .await
            .map_err(|e| match e {
                CallError::Negotiation(msg) => CallError::Negotiation(msg),
                other => CallError::Negotiation(other.to_string()),
            })?;
        session.remote_description = Some(description);

        let pending = std::mem::take(&mut session.pending_candidates);
        if !pending.is_empty() {
            debug!(
                "session.drain id={} candidates={}",
                session.id(),
                pending.len()
            );
        }
        let peer = session.peer()?;
        for candidate in pending {
            add_candidate(peer, &candidate).await;
        }
        Ok(())
    }

    /// Best-effort candidate application; buffers until a remote description exists
    pub async fn apply_remote_candidate(&self, session: &mut CallSession, candidate: IceCandidate) {
        if session.closed {
            debug!("session.candidate_ignored id={} closed", session.id());
            return;
        }

        if session.remote_description.is_none() || session.peer.is_none() {
            session.pending_candidates.push_back(candidate);
            debug!(
                "session.candidate_buffered id={} pending={}",
                session.id(),
                session.pending_candidates.len()
            );
            return;
        }

        if let Ok(peer) = session.peer() {
            add_candidate(peer, &candidate).await;
        }
    }

    /// Release the peer connection and stop all local tracks. Idempotent.
    pub async fn close(&self, session: &mut CallSession) {
        if session.closed {
            return;
        }
        session.closed = true;

        if let Some(task) = session.event_task.take() {
            task.abort();
        }
        if let Some(stream) = session.local_stream.take() {
            stream.stop_all();
        }
        if let Some(peer) = session.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("session.close_failed id={}: {}", session.id(), e);
            }
        }
        let had_remote = session
            .remote_stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        if had_remote {
            self.output.detach();
        }
        session.pending_candidates.clear();

        info!("session.closed id={}", session.id());
    }

    /// Route playback to the loudspeaker or back to the default output.
    ///
    /// Silently does nothing where output selection is unsupported.
    pub async fn set_output_device(&self, prefer_speaker: bool) {
        if !self.output.supports_sink_selection() {
            debug!("media.sink_selection_unsupported");
            return;
        }

        let device_id = if prefer_speaker {
            match self.output.output_devices().await {
                Ok(devices) => match devices.into_iter().next() {
                    Some(device) => device.id,
                    None => return,
                },
                Err(e) => {
                    warn!("media.output_enumeration_failed: {}", e);
                    return;
                }
            }
        } else {
            DEFAULT_SINK.to_string()
        };

        if let Err(e) = self.output.set_sink(&device_id).await {
            warn!("media.set_sink_failed device={}: {}", device_id, e);
        }
    }
}

async fn add_candidate(peer: &dyn PeerConnection, candidate: &IceCandidate) {
    if let Err(e) = peer.add_ice_candidate(candidate).await {
        let err = match e {
            CallError::CandidateApply(msg) => CallError::CandidateApply(msg),
            other => CallError::CandidateApply(other.to_string()),
        };
        warn!("session.candidate_rejected: {}", err);
    }
}

async fn forward_peer_events(
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    conversation_id: ConversationId,
    channel: Arc<SignalingChannel>,
    output: Arc<dyn AudioOutput>,
    remote_stream: Arc<std::sync::Mutex<Option<RemoteStream>>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                channel
                    .send(SignalingMessage::Candidate {
                        conversation_id: conversation_id.clone(),
                        candidate,
                    })
                    .await;
            }
            PeerEvent::RemoteTrack(stream) => {
                info!("media.remote_track room={} stream={}", conversation_id, stream.id);
                *remote_stream.lock().unwrap_or_else(|e| e.into_inner()) = Some(stream.clone());
                output.attach(stream);
            }
            PeerEvent::StateChanged(state) => {
                debug!("peer.state room={} state={}", conversation_id, state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::call::channel::MockSignalingTransport;

    struct NoDevices;

    #[async_trait]
    impl MediaDevices for NoDevices {
        async fn get_user_media(
            &self,
            _constraints: AudioConstraints,
        ) -> std::result::Result<LocalStream, DeviceError> {
            Err(DeviceError::new("NotFoundError", "no input"))
        }
    }

    struct NoPeers;

    #[async_trait]
    impl PeerConnectionFactory for NoPeers {
        async fn create(
            &self,
            _ice_servers: &[IceServer],
            _events: PeerEventSender,
        ) -> CallResult<Box<dyn PeerConnection>> {
            Err(CallError::PeerConnection("unavailable".into()))
        }
    }

    struct SilentOutput;

    #[async_trait]
    impl AudioOutput for SilentOutput {
        fn attach(&self, _stream: RemoteStream) {}
        fn detach(&self) {}
        fn supports_sink_selection(&self) -> bool {
            false
        }
        async fn output_devices(&self) -> CallResult<Vec<OutputDevice>> {
            panic!("must not enumerate when unsupported")
        }
        async fn set_sink(&self, _device_id: &str) -> CallResult<()> {
            panic!("must not select a sink when unsupported")
        }
    }

    fn manager(ice: MockIceConfigSource) -> MediaSessionManager {
        let transport = MockSignalingTransport::new();
        let channel = Arc::new(SignalingChannel::new("c1".into(), Arc::new(transport)));
        MediaSessionManager::new(
            Arc::new(ice),
            Arc::new(NoPeers),
            Arc::new(NoDevices),
            Arc::new(SilentOutput),
            channel,
        )
    }

    #[tokio::test]
    async fn test_config_fetch_failure_aborts_session() {
        let mut ice = MockIceConfigSource::new();
        ice.expect_fetch()
            .times(1)
            .returning(|| Err(CallError::ConfigFetch("unreachable".into())));

        let result = manager(ice).create_session("c1".into(), CallRole::Caller).await;
        assert!(matches!(result, Err(CallError::ConfigFetch(_))));
    }

    #[tokio::test]
    async fn test_capture_maps_device_errors() {
        let manager = manager(MockIceConfigSource::new());
        let result = manager.capture_local_audio().await;
        assert_eq!(result.unwrap_err(), CallError::DeviceNotFound);
    }

    #[tokio::test]
    async fn test_candidates_buffer_without_peer() {
        let manager = manager(MockIceConfigSource::new());
        let mut session = CallSession::new("c1".into(), CallRole::Callee);

        manager
            .apply_remote_candidate(&mut session, IceCandidate::new("candidate:1"))
            .await;
        manager
            .apply_remote_candidate(&mut session, IceCandidate::new("candidate:2"))
            .await;

        assert_eq!(session.pending_candidate_count(), 2);
    }

    #[tokio::test]
    async fn test_remote_description_in_wrong_state() {
        let manager = manager(MockIceConfigSource::new());
        let mut session = CallSession::new("c1".into(), CallRole::Caller);

        let result = manager
            .apply_remote_description(&mut session, SessionDescription::answer("v=0"))
            .await;
        assert!(matches!(result, Err(CallError::Negotiation(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let manager = manager(MockIceConfigSource::new());
        let mut session = CallSession::new("c1".into(), CallRole::Caller);

        manager.close(&mut session).await;
        manager.close(&mut session).await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_output_selection_unsupported_is_noop() {
        let manager = manager(MockIceConfigSource::new());
        manager.set_output_device(true).await;
        manager.set_output_device(false).await;
    }
}
