//! Shared state of the relay server

use super::hub::RelayHub;
use crate::config::Config;
use crate::domain::signaling::{RoomKeys, RoomRegistry};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
    pub keys: RoomKeys,
    pub call_hub: RelayHub,
    pub chat_hub: RelayHub,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            rooms: Arc::new(RoomRegistry::new(config.calls.max_room_members)),
            keys: RoomKeys::new(&config.security.room_key_secret),
            call_hub: RelayHub::new(),
            chat_hub: RelayHub::new(),
            config: Arc::new(config),
        }
    }
}
