//! API interface implementations

pub mod call_relay;
pub mod chat_relay;
pub mod hub;
pub mod ice_handler;
pub mod metrics_handler;
pub mod router;
pub mod state;

pub use call_relay::{relay_call_frame, RelayOutcome};
pub use chat_relay::relay_chat_frame;
pub use hub::{Envelope, JoinedRooms, RelayHub};
pub use metrics_handler::init_metrics;
pub use router::build_router;
pub use state::AppState;
