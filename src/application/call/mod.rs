//! Voice call use cases: signaling, media sessions and negotiation

pub mod channel;
pub mod listener;
pub mod media;
pub mod session;
pub mod state_machine;
pub mod ui;

pub use channel::{HandlerGuard, HandlerId, SignalingChannel, SignalingTransport};
pub use listener::{CallListener, StubListener};
pub use media::{
    AudioOutput, IceConfigSource, MediaDevices, MediaSessionManager, PeerConnection,
    PeerConnectionFactory, PeerEvent, PeerEventSender,
};
pub use session::CallSession;
pub use state_machine::{CallCommand, CallHandle, CallMailbox, CallSettings, CallStateMachine};
pub use ui::{CallUiController, CallView, IncomingPrompt, Screen};
