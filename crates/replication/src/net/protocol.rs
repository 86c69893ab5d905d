use crate::registry::{EntityId, EntityKind, PeerId};

use super::codec::{DecodeError, PacketReader, PacketWriter};
use super::transport::Channel;

pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Discriminator byte that leads a non-empty Fields body. Reserved for typed
/// payloads, always written as zero for now.
pub const FIELDS_MARKER: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Join = 0,
    State = 1,
    Fields = 2,
    Spawn = 3,
    SetOwnership = 4,
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Join),
            1 => Ok(Self::State),
            2 => Ok(Self::Fields),
            3 => Ok(Self::Spawn),
            4 => Ok(Self::SetOwnership),
            other => Err(DecodeError::UnknownPacketType(other)),
        }
    }
}

impl PacketType {
    pub fn channel(self) -> Channel {
        match self {
            Self::Join => Channel::OrderedReliable,
            _ => Channel::UnorderedReliable,
        }
    }
}

pub fn peek_packet_type(data: &[u8]) -> Result<PacketType, DecodeError> {
    let tag = *data.first().ok_or(DecodeError::Empty)?;
    PacketType::try_from(tag)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPacket {
    pub peer_id: PeerId,
    pub frame: u32,
}

impl JoinPacket {
    pub fn new(peer_id: PeerId, frame: u32) -> Self {
        Self { peer_id, frame }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::with_packet_type(PacketType::Join);
        writer.write_u32(self.peer_id);
        writer.write_u32(self.frame);
        writer.take()
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = PacketReader::new(data);
        let tag = reader.read_u8()?;
        if PacketType::try_from(tag)? != PacketType::Join {
            return Err(DecodeError::UnknownPacketType(tag));
        }
        let peer_id = reader.read_u32()?;
        let frame = reader.read_u32()?;
        Ok(Self { peer_id, frame })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadRecord<'a> {
    pub id: EntityId,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnRecord {
    pub id: EntityId,
    pub kind: EntityKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipRecord {
    pub owner: PeerId,
    pub id: EntityId,
}

/// A packet decoded in full. Payloads borrow from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    Join(JoinPacket),
    State(Vec<PayloadRecord<'a>>),
    Fields(Vec<PayloadRecord<'a>>),
    Spawn(Vec<SpawnRecord>),
    SetOwnership(Vec<OwnershipRecord>),
}

impl<'a> Packet<'a> {
    /// Decodes every record before returning, so a truncated packet yields an
    /// error rather than a prefix.
    pub fn decode(data: &'a [u8]) -> Result<Self, DecodeError> {
        let packet_type = peek_packet_type(data)?;
        let mut reader = PacketReader::new(&data[1..]);

        let packet = match packet_type {
            PacketType::Join => Self::Join(JoinPacket::decode(data)?),
            PacketType::State => Self::State(read_payload_records(&mut reader)?),
            PacketType::Fields => {
                if !reader.is_empty() {
                    reader.read_u8()?;
                }
                Self::Fields(read_payload_records(&mut reader)?)
            }
            PacketType::Spawn => {
                let mut records = Vec::new();
                while !reader.is_empty() {
                    let id = reader.read_u32()?;
                    let kind = reader.read_u32()?;
                    records.push(SpawnRecord { id, kind });
                }
                Self::Spawn(records)
            }
            PacketType::SetOwnership => {
                let mut records = Vec::new();
                while !reader.is_empty() {
                    let owner = reader.read_u32()?;
                    let id = reader.read_u32()?;
                    records.push(OwnershipRecord { owner, id });
                }
                Self::SetOwnership(records)
            }
        };
        Ok(packet)
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Join(_) => PacketType::Join,
            Self::State(_) => PacketType::State,
            Self::Fields(_) => PacketType::Fields,
            Self::Spawn(_) => PacketType::Spawn,
            Self::SetOwnership(_) => PacketType::SetOwnership,
        }
    }

    pub fn record_count(&self) -> usize {
        match self {
            Self::Join(_) => 1,
            Self::State(records) | Self::Fields(records) => records.len(),
            Self::Spawn(records) => records.len(),
            Self::SetOwnership(records) => records.len(),
        }
    }
}

fn read_payload_records<'a>(
    reader: &mut PacketReader<'a>,
) -> Result<Vec<PayloadRecord<'a>>, DecodeError> {
    let mut records = Vec::new();
    while !reader.is_empty() {
        let id = reader.read_u32()?;
        let payload = reader.read_bytes()?;
        records.push(PayloadRecord { id, payload });
    }
    Ok(records)
}
