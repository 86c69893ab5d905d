//! In-process transport.
//!
//! Every endpoint created from one [`LocalNetwork`] shares a hub; packets are
//! delivered reliably into the recipient's mailbox and handed out on the next
//! `poll`. [`DeliveryOrder::UnorderedFirst`] lets unordered traffic overtake
//! ordered traffic, which is the cross-channel race real transports exhibit.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use super::transport::{
    Channel, ConnectionHandle, Target, Transport, TransportError, TransportEvent,
};

type EndpointId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryOrder {
    #[default]
    SendOrder,
    UnorderedFirst,
}

#[derive(Debug)]
struct Link {
    local: EndpointId,
    remote: EndpointId,
    remote_handle: ConnectionHandle,
    established: bool,
}

#[derive(Debug, Default)]
struct Mailbox {
    ordered: VecDeque<(u64, TransportEvent)>,
    unordered: VecDeque<(u64, TransportEvent)>,
}

#[derive(Debug, Default)]
struct Hub {
    listeners: HashMap<u16, EndpointId>,
    mailboxes: Vec<Mailbox>,
    links: HashMap<ConnectionHandle, Link>,
    next_handle: u64,
    next_stamp: u64,
    order: DeliveryOrder,
}

impl Hub {
    fn allocate_handle(&mut self) -> ConnectionHandle {
        self.next_handle += 1;
        ConnectionHandle(self.next_handle)
    }

    fn push(&mut self, endpoint: EndpointId, channel: Channel, event: TransportEvent) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        if let Some(mailbox) = self.mailboxes.get_mut(endpoint) {
            match channel {
                Channel::OrderedReliable => mailbox.ordered.push_back((stamp, event)),
                Channel::UnorderedReliable => mailbox.unordered.push_back((stamp, event)),
            }
        }
    }

    fn owned_link(
        &self,
        endpoint: EndpointId,
        handle: ConnectionHandle,
    ) -> Result<&Link, TransportError> {
        self.links
            .get(&handle)
            .filter(|link| link.local == endpoint)
            .ok_or(TransportError::UnknownConnection(handle))
    }

    fn drain(&mut self, endpoint: EndpointId) -> Vec<TransportEvent> {
        let order = self.order;
        let Some(mailbox) = self.mailboxes.get_mut(endpoint) else {
            return Vec::new();
        };

        let mut ordered = std::mem::take(&mut mailbox.ordered);
        let mut unordered = std::mem::take(&mut mailbox.unordered);

        match order {
            DeliveryOrder::UnorderedFirst => unordered
                .into_iter()
                .chain(ordered)
                .map(|(_, event)| event)
                .collect(),
            DeliveryOrder::SendOrder => {
                let mut events = Vec::with_capacity(ordered.len() + unordered.len());
                loop {
                    let next = match (ordered.front(), unordered.front()) {
                        (Some((a, _)), Some((b, _))) if a < b => ordered.pop_front(),
                        (Some(_), Some(_)) => unordered.pop_front(),
                        (Some(_), None) => ordered.pop_front(),
                        (None, Some(_)) => unordered.pop_front(),
                        (None, None) => break,
                    };
                    if let Some((_, event)) = next {
                        events.push(event);
                    }
                }
                events
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self) -> LocalTransport {
        let mut hub = self.hub.borrow_mut();
        hub.mailboxes.push(Mailbox::default());
        LocalTransport {
            id: hub.mailboxes.len() - 1,
            hub: Rc::clone(&self.hub),
        }
    }

    pub fn set_delivery_order(&self, order: DeliveryOrder) {
        self.hub.borrow_mut().order = order;
    }
}

#[derive(Debug)]
pub struct LocalTransport {
    id: EndpointId,
    hub: Rc<RefCell<Hub>>,
}

impl LocalTransport {
    /// Tears the link down; both ends see `Disconnected` on their next poll.
    pub fn disconnect(&mut self, connection: ConnectionHandle) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        hub.owned_link(self.id, connection)?;
        let link = hub
            .links
            .remove(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        hub.links.remove(&link.remote_handle);

        hub.push(
            link.remote,
            Channel::OrderedReliable,
            TransportEvent::Disconnected(link.remote_handle),
        );
        hub.push(
            self.id,
            Channel::OrderedReliable,
            TransportEvent::Disconnected(connection),
        );
        Ok(())
    }

    pub fn connections(&self) -> Vec<ConnectionHandle> {
        let hub = self.hub.borrow();
        let mut handles: Vec<_> = hub
            .links
            .iter()
            .filter(|(_, link)| link.local == self.id && link.established)
            .map(|(&handle, _)| handle)
            .collect();
        handles.sort();
        handles
    }
}

impl Transport for LocalTransport {
    fn listen(&mut self, port: u16) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        if hub.listeners.contains_key(&port) {
            return Err(TransportError::AddressInUse(port));
        }
        hub.listeners.insert(port, self.id);
        Ok(())
    }

    fn connect(&mut self, addr: &str, port: u16) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        let server = *hub
            .listeners
            .get(&port)
            .ok_or_else(|| TransportError::Unreachable {
                addr: addr.to_string(),
                port,
            })?;

        let client_handle = hub.allocate_handle();
        let server_handle = hub.allocate_handle();
        hub.links.insert(
            client_handle,
            Link {
                local: self.id,
                remote: server,
                remote_handle: server_handle,
                established: false,
            },
        );
        hub.links.insert(
            server_handle,
            Link {
                local: server,
                remote: self.id,
                remote_handle: client_handle,
                established: false,
            },
        );

        hub.push(
            server,
            Channel::OrderedReliable,
            TransportEvent::ConnectionRequest(server_handle),
        );
        Ok(())
    }

    fn accept(&mut self, connection: ConnectionHandle) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        let link = hub.owned_link(self.id, connection)?;
        let (remote, remote_handle) = (link.remote, link.remote_handle);

        for handle in [connection, remote_handle] {
            if let Some(link) = hub.links.get_mut(&handle) {
                link.established = true;
            }
        }

        hub.push(
            self.id,
            Channel::OrderedReliable,
            TransportEvent::Connected(connection),
        );
        hub.push(
            remote,
            Channel::OrderedReliable,
            TransportEvent::Connected(remote_handle),
        );
        Ok(())
    }

    fn send(
        &mut self,
        data: &[u8],
        channel: Channel,
        target: Target,
    ) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();

        let routes: Vec<(EndpointId, ConnectionHandle)> = match target {
            Target::Broadcast => hub
                .links
                .values()
                .filter(|link| link.local == self.id && link.established)
                .map(|link| (link.remote, link.remote_handle))
                .collect(),
            Target::Peer(handle) => {
                let link = hub.owned_link(self.id, handle)?;
                if !link.established {
                    return Err(TransportError::NotConnected);
                }
                vec![(link.remote, link.remote_handle)]
            }
        };

        for (remote, from) in routes {
            hub.push(
                remote,
                channel,
                TransportEvent::Packet {
                    from,
                    channel,
                    data: data.to_vec(),
                },
            );
        }
        Ok(())
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        self.hub.borrow_mut().drain(self.id)
    }
}
