use std::fmt;
use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    OrderedReliable,
    UnorderedReliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Broadcast,
    Peer(ConnectionHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionRequest(ConnectionHandle),
    Connected(ConnectionHandle),
    Disconnected(ConnectionHandle),
    Packet {
        from: ConnectionHandle,
        channel: Channel,
        data: Vec<u8>,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("port {0} is already in use")]
    AddressInUse(u16),
    #[error("nothing is listening on {addr}:{port}")]
    Unreachable { addr: String, port: u16 },
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionHandle),
    #[error("transport is not connected")]
    NotConnected,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Packet transport the session drives. Implementations deliver events
/// synchronously from `poll`; nothing here may block.
pub trait Transport {
    fn listen(&mut self, port: u16) -> Result<(), TransportError>;

    fn connect(&mut self, addr: &str, port: u16) -> Result<(), TransportError>;

    fn accept(&mut self, connection: ConnectionHandle) -> Result<(), TransportError>;

    fn send(&mut self, data: &[u8], channel: Channel, target: Target)
    -> Result<(), TransportError>;

    fn poll(&mut self) -> Vec<TransportEvent>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn listen(&mut self, port: u16) -> Result<(), TransportError> {
        (**self).listen(port)
    }

    fn connect(&mut self, addr: &str, port: u16) -> Result<(), TransportError> {
        (**self).connect(addr, port)
    }

    fn accept(&mut self, connection: ConnectionHandle) -> Result<(), TransportError> {
        (**self).accept(connection)
    }

    fn send(
        &mut self,
        data: &[u8],
        channel: Channel,
        target: Target,
    ) -> Result<(), TransportError> {
        (**self).send(data, channel, target)
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        (**self).poll()
    }
}
