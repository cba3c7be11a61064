//! Packets carry TCP segments between hosts. A [`Packet`] is read-only after creation, and is
//! shared through [`PacketRc`] handles so that passing a packet between hosts and events never
//! copies its payload.

use std::net::SocketAddrV4;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;
use bytes::Bytes;

/// Emulated IPv4 header size in bytes.
const IPV4_HEADER_LEN: usize = 20;
/// Emulated TCP header size in bytes (no options).
const TCP_HEADER_LEN: usize = 20;

/// Checkpoints in a packet's life. Only recorded when trace logging is enabled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketStatus {
    SndCreated,
    SndInterfaceSent,
    InetSent,
    InetDropped,
    RcvInterfaceReceived,
    RcvInterfaceDropped,
    RcvSocketProcessed,
    RcvSocketDropped,
}

/// Packets with a lower priority value are sent first when several sockets want to send at once.
pub type PacketPriority = u64;

/// A thread-safe shared reference to a [`Packet`].
///
/// Cloning acquires a new reference and dropping releases one; the packet is freed when its last
/// reference is dropped. The `PartialEq` implementation compares the pointers of the wrapped
/// packets.
///
/// `PacketRc` implements `Deref` so that all methods on `Packet` can be used directly.
#[derive(Clone, Debug)]
pub struct PacketRc {
    inner: Arc<Packet>,
}

impl PacketRc {
    /// See [`Packet::new_ipv4_tcp`].
    pub fn new_ipv4_tcp(
        header: tcp::TcpHeader,
        payload: tcp::Payload,
        priority: PacketPriority,
    ) -> Self {
        Self::from(Packet::new_ipv4_tcp(header, payload, priority))
    }

    /// The number of live references to this packet.
    pub fn ref_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }
}

impl PartialEq for PacketRc {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for PacketRc {}

impl From<Packet> for PacketRc {
    fn from(packet: Packet) -> Self {
        Self {
            inner: Arc::new(packet),
        }
    }
}

impl std::ops::Deref for PacketRc {
    type Target = Packet;
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

/// An IPv4 TCP segment: the header fields the TCP state machine uses and the payload chunks.
#[derive(Debug)]
pub struct Packet {
    header: tcp::TcpHeader,
    payload: tcp::Payload,
    priority: PacketPriority,
    // only allocated when trace logging is enabled
    statuses: Option<AtomicRefCell<Vec<PacketStatus>>>,
}

impl Packet {
    /// Creates a new IPv4 TCP packet. The payload chunks are reference-counted, so this doesn't
    /// copy any payload bytes.
    pub fn new_ipv4_tcp(
        header: tcp::TcpHeader,
        payload: tcp::Payload,
        priority: PacketPriority,
    ) -> Self {
        let statuses = log::log_enabled!(log::Level::Trace).then(|| AtomicRefCell::new(vec![]));

        let packet = Self {
            header,
            payload,
            priority,
            statuses,
        };

        packet.add_status(PacketStatus::SndCreated);
        packet
    }

    pub fn tcp_header(&self) -> &tcp::TcpHeader {
        &self.header
    }

    /// Returns the payload chunks. Cloning the chunks only clones references.
    pub fn payload(&self) -> tcp::Payload {
        self.payload.clone()
    }

    /// Returns the total simulated length of the packet, which is the sum of the emulated IP and
    /// TCP header lengths and the payload length.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        IPV4_HEADER_LEN + TCP_HEADER_LEN + self.payload_len()
    }

    pub fn payload_len(&self) -> usize {
        self.payload.0.iter().map(Bytes::len).sum()
    }

    pub fn src_address(&self) -> SocketAddrV4 {
        self.header.src()
    }

    pub fn dst_address(&self) -> SocketAddrV4 {
        self.header.dst()
    }

    pub fn priority(&self) -> PacketPriority {
        self.priority
    }

    /// Appends `status` to the packet's list of status checkpoints.
    ///
    /// This has no effect unless `log::Level::Trace` is enabled.
    pub fn add_status(&self, status: PacketStatus) {
        if log::log_enabled!(log::Level::Trace) {
            if let Some(statuses) = self.statuses.as_ref() {
                statuses.borrow_mut().push(status);
            }
            log::trace!(
                "[{status:?}] {} -> {} flags={:?} seq={} ack={} len={}",
                self.src_address(),
                self.dst_address(),
                self.header.flags,
                self.header.seq,
                self.header.ack,
                self.payload_len(),
            );
        }
    }

    /// The recorded status checkpoints, oldest first. Empty unless trace logging was enabled when
    /// the packet was created.
    pub fn statuses(&self) -> Vec<PacketStatus> {
        self.statuses
            .as_ref()
            .map(|x| x.borrow().clone())
            .unwrap_or_default()
    }
}
