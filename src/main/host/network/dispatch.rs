//! Delivery of packets that arrive at a host.

use crate::core::work::task::TaskRef;
use crate::host::host::Host;
use crate::network::packet::{PacketRc, PacketStatus};

/// A packet arriving at a host. This is a one-shot unit of work: when it runs it finds the host
/// interface for the packet's destination address, and the interface finds the socket that should
/// process the packet. Packets that don't match an interface or a socket are dropped.
///
/// The event holds one reference to the packet, which is released when the packet is handed to the
/// socket, or when the event is dropped without having run.
#[derive(Debug)]
pub struct PacketArrival {
    packet: Option<PacketRc>,
}

impl PacketArrival {
    pub fn new(packet: PacketRc) -> Self {
        Self {
            packet: Some(packet),
        }
    }

    pub fn packet(&self) -> Option<&PacketRc> {
        self.packet.as_ref()
    }

    /// Deliver the packet to `host`.
    pub fn execute(mut self, host: &mut Host) {
        let Some(packet) = self.packet.take() else {
            debug_panic!("Packet arrival event ran without a packet");
            return;
        };

        let src = packet.src_address();
        let dst = packet.dst_address();

        log::trace!("Packet arrival event started for {src} -> {dst}");

        let Some(iface) = host.network_namespace().interface(*dst.ip()) else {
            log::debug!(
                "Dropping packet from {src}: no interface with address {} on host '{}'",
                dst.ip(),
                host.name(),
            );
            packet.add_status(PacketStatus::RcvInterfaceDropped);
            host.count_dropped_packet();
            return;
        };

        packet.add_status(PacketStatus::RcvInterfaceReceived);

        let Some(socket) = iface.lookup(dst.port(), src) else {
            log::debug!(
                "Dropping packet from {src}: no socket for port {} on interface '{}'",
                dst.port(),
                iface.name(),
            );
            packet.add_status(PacketStatus::RcvInterfaceDropped);
            host.count_dropped_packet();
            return;
        };

        host.push_packet_to_socket(socket, packet);

        log::trace!("Packet arrival event finished for {src} -> {dst}");
    }

    /// A task that delivers the packet when it runs. The task only does something the first time
    /// it runs.
    pub fn into_task(self) -> TaskRef {
        TaskRef::new_once(move |host| self.execute(host))
    }
}
