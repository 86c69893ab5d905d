mod codec;
mod connection;
mod local;
mod protocol;
mod simulator;
mod stats;
mod transport;

pub use codec::{DecodeError, PacketReader, PacketWriter};
pub use connection::{PeerConnection, PeerIndex};
pub use local::{DeliveryOrder, LocalNetwork, LocalTransport};
pub use protocol::{
    DEFAULT_PORT, DEFAULT_TICK_RATE, FIELDS_MARKER, JoinPacket, OwnershipRecord, Packet,
    PacketType, PayloadRecord, SpawnRecord, peek_packet_type,
};
pub use simulator::{InboundPacket, LatencySimulator, OutboundPacket};
pub use stats::{LatencyConfig, NetworkStats};
pub use transport::{
    Channel, ConnectionHandle, Target, Transport, TransportError, TransportEvent,
};
