use std::net::{Ipv4Addr, SocketAddrV4};

use crate::host::descriptor::SocketHandle;
use crate::host::network::interface::{NetworkInterface, WILDCARD_ADDR};

// The start of our random port range in host order, used if the application doesn't specify the
// port it wants to bind to, and for client connections.
const MIN_RANDOM_PORT: u16 = 10000;

/// The host's networking objects: a loopback interface and an internet-facing interface.
#[derive(Debug)]
pub struct NetworkNamespace {
    pub localhost: NetworkInterface,
    pub internet: NetworkInterface,
    pub default_ip: Ipv4Addr,
}

impl NetworkNamespace {
    pub fn new(public_ip: Ipv4Addr) -> Self {
        Self {
            localhost: NetworkInterface::new("lo", Ipv4Addr::LOCALHOST),
            internet: NetworkInterface::new("eth0", public_ip),
            default_ip: public_ip,
        }
    }

    /// Returns `None` if there is no such interface.
    pub fn interface(&self, addr: Ipv4Addr) -> Option<&NetworkInterface> {
        // Notes:
        // - `is_loopback` matches all loopback addresses, but only 127.0.0.1 is associated
        // - 0.0.0.0 maps to the `internet` interface
        if addr.is_loopback() {
            Some(&self.localhost)
        } else if addr == self.default_ip || addr.is_unspecified() {
            Some(&self.internet)
        } else {
            None
        }
    }

    /// Returns `None` if there is no such interface.
    pub fn interface_mut(&mut self, addr: Ipv4Addr) -> Option<&mut NetworkInterface> {
        if addr.is_loopback() {
            Some(&mut self.localhost)
        } else if addr == self.default_ip || addr.is_unspecified() {
            Some(&mut self.internet)
        } else {
            None
        }
    }

    /// Whether the local address is associated with `peer` on any applicable interface.
    pub fn is_addr_in_use(&self, local: SocketAddrV4, peer: SocketAddrV4) -> Result<bool, NoInterface> {
        if local.ip().is_unspecified() {
            Ok(self.localhost.is_addr_in_use(local.port(), peer)
                || self.internet.is_addr_in_use(local.port(), peer))
        } else {
            match self.interface(*local.ip()) {
                Some(i) => Ok(i.is_addr_in_use(local.port(), peer)),
                None => Err(NoInterface),
            }
        }
    }

    /// Returns a random port in host byte order that is free for `peer` on `interface_ip`.
    pub fn get_random_free_port(
        &self,
        interface_ip: Ipv4Addr,
        peer: SocketAddrV4,
        mut rng: impl rand::Rng,
    ) -> Option<u16> {
        let is_free = |port| {
            let local = SocketAddrV4::new(interface_ip, port);
            // `is_addr_in_use` will check all interfaces in the case of INADDR_ANY
            let specific_in_use = self.is_addr_in_use(local, peer).unwrap_or(true);
            let generic_in_use = self.is_addr_in_use(local, WILDCARD_ADDR).unwrap_or(true);
            !specific_in_use && !generic_in_use
        };

        // if choosing randomly doesn't succeed within 10 tries, then we have already allocated a
        // lot of ports (>90% on average), so we fall back to a linear search
        for _ in 0..10 {
            let random_port = rng.gen_range(MIN_RANDOM_PORT..=u16::MAX);
            if is_free(random_port) {
                return Some(random_port);
            }
        }

        // start from a random port instead of the min
        let start = rng.gen_range(MIN_RANDOM_PORT..=u16::MAX);
        if let Some(port) = (start..=u16::MAX)
            .chain(MIN_RANDOM_PORT..start)
            .find(|port| is_free(*port))
        {
            return Some(port);
        }

        log::warn!("Unable to find free ephemeral port for peer {peer}");
        None
    }

    /// Associate the socket with any applicable network interfaces. The caller must later pass the
    /// returned handle to [`disassociate_interface`](Self::disassociate_interface).
    pub fn associate_interface(
        &mut self,
        socket: SocketHandle,
        bind_addr: SocketAddrV4,
        peer_addr: SocketAddrV4,
    ) -> Result<AssociationHandle, AssociationError> {
        if self.is_addr_in_use(bind_addr, peer_addr)? {
            return Err(AssociationError::AddrInUse);
        }

        if bind_addr.ip().is_unspecified() {
            // need to associate all interfaces
            let lo = self.localhost.associate(socket, bind_addr.port(), peer_addr);
            let eth = self.internet.associate(socket, bind_addr.port(), peer_addr);
            debug_check!(lo && eth, "Address {bind_addr} was unexpectedly in use");
        } else {
            let iface = self.interface_mut(*bind_addr.ip()).ok_or(NoInterface)?;
            let added = iface.associate(socket, bind_addr.port(), peer_addr);
            debug_check!(added, "Address {bind_addr} was unexpectedly in use");
        }

        Ok(AssociationHandle {
            local_addr: bind_addr,
            remote_addr: peer_addr,
        })
    }

    /// Disassociate the socket associated using the local and remote addresses from all network
    /// interfaces.
    pub fn disassociate_interface(&mut self, handle: AssociationHandle) {
        let bind_addr = handle.local_addr;
        let peer_addr = handle.remote_addr;

        if bind_addr.ip().is_unspecified() {
            // need to disassociate all interfaces
            self.localhost.disassociate(bind_addr.port(), peer_addr);
            self.internet.disassociate(bind_addr.port(), peer_addr);
        } else if let Some(iface) = self.interface_mut(*bind_addr.ip()) {
            iface.disassociate(bind_addr.port(), peer_addr);
        }
    }

    /// Mark the socket as having packets to send. `local_ip` chooses the interface; sockets bound to
    /// all interfaces are queued on the internet interface.
    pub fn add_data_source(&mut self, socket: SocketHandle, local_ip: Ipv4Addr) {
        match self.interface_mut(local_ip) {
            Some(iface) => iface.add_data_source(socket),
            None => {
                debug_panic!("No interface for local address {local_ip}");
            }
        }
    }

    /// The next socket with packets to send. Sockets queued on the internet interface go first.
    pub fn pop_data_source(&mut self) -> Option<SocketHandle> {
        self.internet
            .pop_data_source()
            .or_else(|| self.localhost.pop_data_source())
    }

    /// Clean up the network namespace when the host is shut down.
    pub fn cleanup(&mut self) {
        self.localhost.remove_all_sockets();
        self.internet.remove_all_sockets();
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NoInterface;

impl std::fmt::Display for NoInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "No interface available")
    }
}

impl std::error::Error for NoInterface {}

/// Why a socket couldn't be associated with an address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssociationError {
    AddrInUse,
    NoFreePort,
    NoInterface,
}

impl From<NoInterface> for AssociationError {
    fn from(_: NoInterface) -> Self {
        Self::NoInterface
    }
}

impl std::fmt::Display for AssociationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::AddrInUse => write!(f, "Address already in use"),
            Self::NoFreePort => write!(f, "No free ephemeral port"),
            Self::NoInterface => write!(f, "{}", NoInterface),
        }
    }
}

impl std::error::Error for AssociationError {}

/// A socket's association with a network interface(s).
#[derive(Debug, PartialEq, Eq)]
pub struct AssociationHandle {
    local_addr: SocketAddrV4,
    remote_addr: SocketAddrV4,
}

impl AssociationHandle {
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddrV4 {
        self.remote_addr
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    const PUBLIC_IP: Ipv4Addr = Ipv4Addr::new(11, 0, 0, 1);

    #[test]
    fn test_wildcard_bind_uses_all_interfaces() {
        let mut ns = NetworkNamespace::new(PUBLIC_IP);
        let socket = SocketHandle::from(1);
        let bind = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 80);

        let handle = ns.associate_interface(socket, bind, WILDCARD_ADDR).unwrap();

        let peer = SocketAddrV4::new(Ipv4Addr::new(11, 0, 0, 2), 3000);
        assert_eq!(ns.localhost.lookup(80, peer), Some(socket));
        assert_eq!(ns.internet.lookup(80, peer), Some(socket));

        // a second listener on the same port
        assert_eq!(
            ns.associate_interface(SocketHandle::from(2), bind, WILDCARD_ADDR),
            Err(AssociationError::AddrInUse)
        );

        ns.disassociate_interface(handle);
        assert_eq!(ns.internet.lookup(80, peer), None);
    }

    #[test]
    fn test_unknown_interface() {
        let mut ns = NetworkNamespace::new(PUBLIC_IP);
        let bind = SocketAddrV4::new(Ipv4Addr::new(11, 0, 0, 9), 80);

        assert!(ns.interface(*bind.ip()).is_none());
        assert_eq!(
            ns.associate_interface(SocketHandle::from(1), bind, WILDCARD_ADDR),
            Err(AssociationError::NoInterface)
        );
    }

    #[test]
    fn test_random_free_port() {
        let mut ns = NetworkNamespace::new(PUBLIC_IP);
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(1);
        let peer = SocketAddrV4::new(Ipv4Addr::new(11, 0, 0, 2), 80);

        for i in 0..100 {
            let port = ns.get_random_free_port(PUBLIC_IP, peer, &mut rng).unwrap();
            assert!(port >= MIN_RANDOM_PORT);

            let local = SocketAddrV4::new(PUBLIC_IP, port);
            assert!(!ns.is_addr_in_use(local, peer).unwrap());
            ns.associate_interface(SocketHandle::from(i), local, peer)
                .unwrap();
        }
    }
}
