//! Call bounded context - state, roles and media types of a voice call

pub mod media;
pub mod value_object;

pub use media::{
    AudioConstraints, IceCandidate, LocalStream, LocalTrack, OutputDevice, RemoteStream, SdpType,
    SessionDescription, TrackKind, TrackSource,
};
pub use value_object::{CallRole, CallState, EndReason};
