use crate::registry::{EntityId, PeerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Listening {
        port: u16,
    },
    PeerConnected {
        peer_id: PeerId,
        player_entity: Option<EntityId>,
    },
    PeerDisconnected {
        peer_id: PeerId,
        reclaimed: Vec<EntityId>,
    },
    Joined {
        peer_id: PeerId,
        frame: u32,
    },
    Disconnected,
    PacketRejected {
        reason: String,
    },
}
