//! webrtc-rs backed media collaborators

pub mod devices;
pub mod peer;

pub use devices::{NullAudioOutput, WebRtcAudioDevices, WebRtcAudioTrack};
pub use peer::{WebRtcPeer, WebRtcPeerFactory};
