pub mod net;
pub mod registry;
pub mod replication;
pub mod session;

#[cfg(test)]
mod testing;

pub use net::{
    Channel, ConnectionHandle, DEFAULT_PORT, DEFAULT_TICK_RATE, DecodeError, DeliveryOrder,
    FIELDS_MARKER, InboundPacket, JoinPacket, LatencyConfig, LatencySimulator, LocalNetwork,
    LocalTransport, NetworkStats, OutboundPacket, Packet, PacketReader, PacketType, PacketWriter,
    PeerConnection, PeerIndex, Target, Transport, TransportError, TransportEvent,
};
pub use registry::{
    ARBITER_PEER, EntityFactory, EntityId, EntityKind, EntityRecord, InputControl, PayloadError,
    PeerId, Registry, RegistryError, RegistryEvent, Replicated,
};
pub use replication::{
    EntityWaitlist, ReplicationError, ReplicationManager, ReplicationStats,
};
pub use session::{Role, Session, SessionConfig, SessionError, SessionEvent};
