//! Relay-side call room state and room keys

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ConversationId, PeerId};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

/// Derives and verifies per-conversation room keys
#[derive(Clone)]
pub struct RoomKeys {
    secret: Vec<u8>,
}

impl RoomKeys {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, room: &ConversationId) -> Option<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret).ok()?;
        mac.update(room.as_str().as_bytes());
        Some(mac)
    }

    /// Hex-encoded HMAC-SHA256 of the conversation id
    pub fn key_for(&self, room: &ConversationId) -> String {
        self.mac(room)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Constant-time check of a presented key
    pub fn verify(&self, room: &ConversationId, key: &str) -> bool {
        let Ok(presented) = hex::decode(key) else {
            return false;
        };
        match self.mac(room) {
            Some(mac) => mac.verify_slice(&presented).is_ok(),
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct RoomState {
    accepted: bool,
    members: HashSet<PeerId>,
}

/// Call rooms keyed by conversation id
pub struct RoomRegistry {
    rooms: RwLock<HashMap<ConversationId, RoomState>>,
    max_members: usize,
}

impl RoomRegistry {
    pub fn new(max_members: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_members,
        }
    }

    /// Add a connection to a room, creating the room on first join
    pub async fn join(&self, room: &ConversationId, peer: PeerId) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let members = rooms.get(room).map(|state| &state.members);

        if members.map(|m| m.contains(&peer)).unwrap_or(false) {
            return Ok(());
        }
        if members.map(|m| m.len()).unwrap_or(0) >= self.max_members {
            return Err(DomainError::RoomFull(room.to_string()));
        }

        rooms.entry(room.clone()).or_default().members.insert(peer);
        info!("call.joined room={} peer={}", room, peer);
        Ok(())
    }

    pub async fn contains(&self, room: &ConversationId) -> bool {
        self.rooms.read().await.contains_key(room)
    }

    pub async fn is_member(&self, room: &ConversationId, peer: PeerId) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|state| state.members.contains(&peer))
            .unwrap_or(false)
    }

    /// Mark the room's call as accepted so media negotiation may flow
    pub async fn mark_accepted(&self, room: &ConversationId) {
        let mut rooms = self.rooms.write().await;
        if let Some(state) = rooms.get_mut(room) {
            state.accepted = true;
        }
    }

    pub async fn is_accepted(&self, room: &ConversationId) -> bool {
        let rooms = self.rooms.read().await;
        rooms.get(room).map(|state| state.accepted).unwrap_or(false)
    }

    /// Clear the accepted flag. Returns false when the room does not exist.
    pub async fn end_call(&self, room: &ConversationId) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(room) {
            Some(state) => {
                state.accepted = false;
                true
            }
            None => false,
        }
    }

    /// Remove a connection from every room; returns rooms deleted because they became empty
    pub async fn leave_all(&self, peer: PeerId) -> Vec<ConversationId> {
        let mut rooms = self.rooms.write().await;
        let mut emptied = Vec::new();

        for (room, state) in rooms.iter_mut() {
            if state.members.remove(&peer) {
                debug!("Removed {} from room {}", peer, room);
                if state.members.is_empty() {
                    emptied.push(room.clone());
                }
            }
        }

        for room in &emptied {
            rooms.remove(room);
            info!("Deleted empty room {}", room);
        }

        emptied
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_key_roundtrip() {
        let keys = RoomKeys::new("secret");
        let room = ConversationId::new("c1");
        let key = keys.key_for(&room);

        assert_eq!(key.len(), 64);
        assert!(keys.verify(&room, &key));
        assert!(!keys.verify(&ConversationId::new("c2"), &key));
        assert!(!keys.verify(&room, "not-hex"));
        assert!(!RoomKeys::new("other").verify(&room, &key));
    }

    #[tokio::test]
    async fn test_room_capacity() {
        let registry = RoomRegistry::new(2);
        let room = ConversationId::new("c1");

        registry.join(&room, PeerId::new()).await.unwrap();
        registry.join(&room, PeerId::new()).await.unwrap();
        let result = registry.join(&room, PeerId::new()).await;

        assert_eq!(result, Err(DomainError::RoomFull("c1".to_string())));
    }

    #[tokio::test]
    async fn test_rejoin_is_not_counted_twice() {
        let registry = RoomRegistry::new(1);
        let room = ConversationId::new("c1");
        let peer = PeerId::new();

        registry.join(&room, peer).await.unwrap();
        assert!(registry.join(&room, peer).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_join_creates_no_room() {
        let registry = RoomRegistry::new(0);
        let room = ConversationId::new("c1");

        let result = registry.join(&room, PeerId::new()).await;

        assert!(matches!(result, Err(DomainError::RoomFull(_))));
        assert!(!registry.contains(&room).await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_accept_and_end() {
        let registry = RoomRegistry::new(10);
        let room = ConversationId::new("c1");

        assert!(!registry.end_call(&room).await);

        registry.join(&room, PeerId::new()).await.unwrap();
        assert!(!registry.is_accepted(&room).await);

        registry.mark_accepted(&room).await;
        assert!(registry.is_accepted(&room).await);

        assert!(registry.end_call(&room).await);
        assert!(!registry.is_accepted(&room).await);
    }

    #[tokio::test]
    async fn test_leave_all_deletes_empty_rooms() {
        let registry = RoomRegistry::new(10);
        let alice = PeerId::new();
        let bob = PeerId::new();
        let c1 = ConversationId::new("c1");
        let c2 = ConversationId::new("c2");

        registry.join(&c1, alice).await.unwrap();
        registry.join(&c1, bob).await.unwrap();
        registry.join(&c2, alice).await.unwrap();

        let emptied = registry.leave_all(alice).await;

        assert_eq!(emptied, vec![c2.clone()]);
        assert_eq!(registry.room_count().await, 1);
        assert!(registry.is_member(&c1, bob).await);
        assert!(!registry.is_member(&c1, alice).await);
    }
}
