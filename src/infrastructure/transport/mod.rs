pub mod websocket;

pub use websocket::{InboundFrames, WsSignalingTransport};
