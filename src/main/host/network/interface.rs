use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::host::descriptor::SocketHandle;

/// The remote address that a listening socket is associated with. Packets that don't match a
/// specific association fall back to this one.
pub const WILDCARD_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct AssociatedSocketKey {
    local: SocketAddrV4,
    remote: SocketAddrV4,
}

impl AssociatedSocketKey {
    fn new(local: SocketAddrV4, remote: SocketAddrV4) -> Self {
        Self { local, remote }
    }
}

/// Represents a network device that can send and receive packets. Sockets are associated with an
/// interface by their local port and remote address so that incoming packets can be routed to
/// them.
#[derive(Debug)]
pub struct NetworkInterface {
    name: &'static str,
    addr: Ipv4Addr,
    /// The sockets that have packets ready to be sent, in the order they became ready.
    send_sockets: VecDeque<SocketHandle>,
    /// The sockets to which we will push incoming packets.
    recv_sockets: HashMap<AssociatedSocketKey, SocketHandle>,
}

impl NetworkInterface {
    pub fn new(name: &'static str, addr: Ipv4Addr) -> Self {
        log::debug!("Bringing up network interface '{name}' at '{addr}'");

        Self {
            name,
            addr,
            send_sockets: VecDeque::new(),
            recv_sockets: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Route packets sent to `port` from `peer` to `socket`. Use [`WILDCARD_ADDR`] as the peer for
    /// listening sockets. Returns false if the association already exists.
    #[must_use]
    pub fn associate(&mut self, socket: SocketHandle, port: u16, peer: SocketAddrV4) -> bool {
        let local = SocketAddrV4::new(self.addr, port);
        let key = AssociatedSocketKey::new(local, peer);
        log::trace!("Associating socket {socket} with key {key:?} on '{}'", self.name);

        match self.recv_sockets.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(socket);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn disassociate(&mut self, port: u16, peer: SocketAddrV4) {
        let local = SocketAddrV4::new(self.addr, port);
        let key = AssociatedSocketKey::new(local, peer);
        log::trace!("Disassociating socket key {key:?} on '{}'", self.name);

        if self.recv_sockets.remove(&key).is_none() {
            debug_panic!("Attempted to disassociate a vacant socket key {key:?}");
        }
    }

    pub fn is_addr_in_use(&self, port: u16, peer: SocketAddrV4) -> bool {
        let local = SocketAddrV4::new(self.addr, port);
        let key = AssociatedSocketKey::new(local, peer);
        self.recv_sockets.contains_key(&key)
    }

    /// Find the socket that should receive a packet sent to `port` from `peer`. A socket with the
    /// specific association takes priority over a listening socket with the wildcard association.
    pub fn lookup(&self, port: u16, peer: SocketAddrV4) -> Option<SocketHandle> {
        let local = SocketAddrV4::new(self.addr, port);
        let key = AssociatedSocketKey::new(local, peer);

        log::trace!("Looking for socket associated with specific key {key:?}");
        self.recv_sockets.get(&key).copied().or_else(|| {
            let key = AssociatedSocketKey::new(local, WILDCARD_ADDR);
            log::trace!("Looking for socket associated with general key {key:?}");
            self.recv_sockets.get(&key).copied()
        })
    }

    /// Add the socket to the list of sockets that have packets ready for us to send.
    pub fn add_data_source(&mut self, socket: SocketHandle) {
        if !self.send_sockets.contains(&socket) {
            self.send_sockets.push_back(socket);
        } else {
            log::trace!("Socket {socket} is already in the queue of sending sockets. Ignoring.");
        }
    }

    /// Take the next socket that has packets ready to send.
    pub fn pop_data_source(&mut self) -> Option<SocketHandle> {
        let socket = self.send_sockets.pop_front();

        if socket.is_none() {
            log::trace!(
                "Interface {} is now idle with no sockets containing sendable packets",
                self.addr
            );
        }

        socket
    }

    /// Disassociate all sockets and empty the sending queue.
    pub fn remove_all_sockets(&mut self) {
        self.recv_sockets.clear();
        self.send_sockets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(11, 0, 0, a), port)
    }

    #[test]
    fn test_specific_before_wildcard() {
        let mut iface = NetworkInterface::new("eth0", Ipv4Addr::new(11, 0, 0, 1));
        let listener = SocketHandle::from(1);
        let child = SocketHandle::from(2);

        assert!(iface.associate(listener, 80, WILDCARD_ADDR));
        assert!(iface.associate(child, 80, addr(2, 5000)));

        assert_eq!(iface.lookup(80, addr(2, 5000)), Some(child));
        // a different peer falls back to the listener
        assert_eq!(iface.lookup(80, addr(2, 5001)), Some(listener));
        // nothing on this port
        assert_eq!(iface.lookup(81, addr(2, 5000)), None);

        iface.disassociate(80, addr(2, 5000));
        assert_eq!(iface.lookup(80, addr(2, 5000)), Some(listener));
    }

    #[test]
    fn test_associate_twice() {
        let mut iface = NetworkInterface::new("lo", Ipv4Addr::LOCALHOST);

        assert!(iface.associate(SocketHandle::from(1), 80, WILDCARD_ADDR));
        assert!(iface.is_addr_in_use(80, WILDCARD_ADDR));
        assert!(!iface.associate(SocketHandle::from(2), 80, WILDCARD_ADDR));
        assert_eq!(iface.lookup(80, addr(2, 1)), Some(SocketHandle::from(1)));
    }

    #[test]
    fn test_data_sources_fifo() {
        let mut iface = NetworkInterface::new("eth0", Ipv4Addr::new(11, 0, 0, 1));

        iface.add_data_source(SocketHandle::from(3));
        iface.add_data_source(SocketHandle::from(1));
        // already queued
        iface.add_data_source(SocketHandle::from(3));

        assert_eq!(iface.pop_data_source(), Some(SocketHandle::from(3)));
        assert_eq!(iface.pop_data_source(), Some(SocketHandle::from(1)));
        assert_eq!(iface.pop_data_source(), None);
    }
}
