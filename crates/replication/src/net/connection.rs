use std::collections::HashMap;

use crate::registry::{EntityId, PeerId};

use super::transport::ConnectionHandle;

const FIRST_PEER_ID: PeerId = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    pub peer_id: PeerId,
    pub handle: ConnectionHandle,
    pub joined_frame: u32,
    pub player_entity: Option<EntityId>,
}

impl PeerConnection {
    pub fn new(peer_id: PeerId, handle: ConnectionHandle, joined_frame: u32) -> Self {
        Self {
            peer_id,
            handle,
            joined_frame,
            player_entity: None,
        }
    }
}

/// Arbiter-side mapping from peer identity to transport connection.
/// Identities are handed out sequentially and never reused.
#[derive(Debug)]
pub struct PeerIndex {
    peers_by_handle: HashMap<ConnectionHandle, PeerId>,
    peers: HashMap<PeerId, PeerConnection>,
    next_peer_id: PeerId,
}

impl Default for PeerIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerIndex {
    pub fn new() -> Self {
        Self {
            peers_by_handle: HashMap::new(),
            peers: HashMap::new(),
            next_peer_id: FIRST_PEER_ID,
        }
    }

    /// Assigns the next identity to `handle`. A handle that is already
    /// registered keeps the identity it has.
    pub fn register(&mut self, handle: ConnectionHandle, frame: u32) -> &mut PeerConnection {
        let peer_id = match self.peers_by_handle.get(&handle) {
            Some(&peer_id) => peer_id,
            None => {
                let peer_id = self.next_peer_id;
                self.next_peer_id += 1;
                self.peers_by_handle.insert(handle, peer_id);
                peer_id
            }
        };

        self.peers
            .entry(peer_id)
            .or_insert_with(|| PeerConnection::new(peer_id, handle, frame))
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&PeerConnection> {
        self.peers.get(&peer_id)
    }

    pub fn get_mut(&mut self, peer_id: PeerId) -> Option<&mut PeerConnection> {
        self.peers.get_mut(&peer_id)
    }

    pub fn get_by_handle(&self, handle: ConnectionHandle) -> Option<&PeerConnection> {
        self.peers_by_handle
            .get(&handle)
            .and_then(|id| self.peers.get(id))
    }

    pub fn remove_by_handle(&mut self, handle: ConnectionHandle) -> Option<PeerConnection> {
        let peer_id = self.peers_by_handle.remove(&handle)?;
        self.peers.remove(&peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerConnection> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_start_at_one_and_increase() {
        let mut index = PeerIndex::new();
        let first = index.register(ConnectionHandle(10), 0).peer_id;
        let second = index.register(ConnectionHandle(11), 5).peer_id;

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(index.get(2).unwrap().joined_frame, 5);
    }

    #[test]
    fn reregistering_a_handle_keeps_identity() {
        let mut index = PeerIndex::new();
        index.register(ConnectionHandle(3), 0);
        let again = index.register(ConnectionHandle(3), 9).peer_id;

        assert_eq!(again, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn identities_are_not_reused_after_removal() {
        let mut index = PeerIndex::new();
        index.register(ConnectionHandle(1), 0);
        let removed = index.remove_by_handle(ConnectionHandle(1)).unwrap();
        assert_eq!(removed.peer_id, 1);
        assert!(index.is_empty());

        let next = index.register(ConnectionHandle(2), 0).peer_id;
        assert_eq!(next, 2);
        assert!(index.get_by_handle(ConnectionHandle(1)).is_none());
    }
}
