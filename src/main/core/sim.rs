//! The simulation driver: owns the hosts, runs their events in time order, and carries packets
//! between them.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use crate::core::support::emulated_time::EmulatedTime;
use crate::core::support::simulation_time::SimulationTime;
use crate::core::work::event::Event;
use crate::host::host::{Host, HostId, HostParameters};
use crate::host::network::dispatch::PacketArrival;
use crate::network::packet::{PacketRc, PacketStatus};

#[derive(Debug)]
pub enum AddHostError {
    IdInUse(HostId),
    AddrInUse(Ipv4Addr),
}

impl std::fmt::Display for AddHostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdInUse(id) => write!(f, "A host with id {id} already exists"),
            Self::AddrInUse(ip) => write!(f, "A host with address {ip} already exists"),
        }
    }
}

impl std::error::Error for AddHostError {}

/// Counters for packets that crossed the network between hosts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub packets_routed: u64,
    pub packets_dropped: u64,
}

/// A set of hosts connected by a network with a constant one-way latency.
///
/// Events run one at a time in global time order. Ties are broken by the lowest host id, so a run
/// is deterministic for a given configuration.
#[derive(Debug)]
pub struct Simulation {
    hosts: BTreeMap<HostId, Host>,
    addresses: HashMap<Ipv4Addr, HostId>,
    latency: SimulationTime,
    // the latest time the simulation has reached
    now: EmulatedTime,
    stats: NetworkStats,
}

impl Simulation {
    pub fn new(latency: SimulationTime) -> Self {
        Self {
            hosts: BTreeMap::new(),
            addresses: HashMap::new(),
            latency,
            now: EmulatedTime::SIMULATION_START,
            stats: NetworkStats::default(),
        }
    }

    pub fn add_host(&mut self, params: HostParameters) -> Result<HostId, AddHostError> {
        let id = params.id;

        if self.hosts.contains_key(&id) {
            return Err(AddHostError::IdInUse(id));
        }
        if self.addresses.contains_key(&params.ip_addr) {
            return Err(AddHostError::AddrInUse(params.ip_addr));
        }

        log::debug!(
            "Adding host '{}' (id {id}) with address {}",
            params.name,
            params.ip_addr
        );

        self.addresses.insert(params.ip_addr, id);
        self.hosts.insert(id, Host::new(params));

        Ok(id)
    }

    /// Shut down and remove a host. Its pending events are dropped, and packets sent to it later
    /// are dropped by the network.
    pub fn remove_host(&mut self, id: HostId) -> bool {
        let Some(mut host) = self.hosts.remove(&id) else {
            return false;
        };

        self.addresses.retain(|_, x| *x != id);
        host.shutdown_host();

        log::debug!("Removed host '{}' (id {id})", host.name());
        true
    }

    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(&id)
    }

    pub fn host_mut(&mut self, id: HostId) -> Option<&mut Host> {
        self.hosts.get_mut(&id)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn latency(&self) -> SimulationTime {
        self.latency
    }

    pub fn current_time(&self) -> EmulatedTime {
        self.now
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    /// The time of the earliest pending event of any host.
    pub fn next_event_time(&self) -> Option<EmulatedTime> {
        self.hosts.values().filter_map(Host::next_event_time).min()
    }

    /// Run the earliest pending event of any host, then route the packets that the host sent.
    /// Returns the time of that event, or `None` if no host has a pending event.
    pub fn step(&mut self) -> Option<EmulatedTime> {
        // packets sent by the application outside of an event
        self.route_outbound();

        // the earliest event; `min_by_key` keeps the first (lowest id) host on a tie
        let (id, time) = self
            .hosts
            .iter()
            .filter_map(|(id, host)| Some((*id, host.next_event_time()?)))
            .min_by_key(|(_, time)| *time)?;

        let host = self.hosts.get_mut(&id)?;
        host.execute_next_event(time + SimulationTime::NANOSECOND);
        self.now = std::cmp::max(self.now, time);

        let packets = host.take_outbound_packets();
        for packet in packets {
            self.route(id, packet);
        }

        Some(time)
    }

    /// Run all events earlier than `end`.
    pub fn run_until(&mut self, end: EmulatedTime) {
        self.route_outbound();

        while self.next_event_time().is_some_and(|t| t < end) {
            self.step();
        }

        self.now = std::cmp::max(self.now, end);
    }

    fn route_outbound(&mut self) {
        let mut packets = Vec::new();
        for (id, host) in self.hosts.iter_mut() {
            packets.extend(host.take_outbound_packets().into_iter().map(|p| (*id, p)));
        }

        for (id, packet) in packets {
            self.route(id, packet);
        }
    }

    fn route(&mut self, src_id: HostId, packet: PacketRc) {
        let dst_ip = *packet.dst_address().ip();

        let Some(dst_id) = self.addresses.get(&dst_ip).copied() else {
            log::debug!(
                "Dropping packet {} -> {}: no host has the destination address",
                packet.src_address(),
                packet.dst_address(),
            );
            packet.add_status(PacketStatus::InetDropped);
            self.stats.packets_dropped += 1;
            return;
        };

        let (Some(src), Some(dst)) = (self.hosts.get(&src_id), self.hosts.get(&dst_id)) else {
            debug_panic!("Routing a packet between hosts that don't exist");
            return;
        };

        packet.add_status(PacketStatus::InetSent);
        self.stats.packets_routed += 1;

        // a host's clock lags behind the simulation's when the application sends outside of an
        // event, and no host may receive an event earlier than one it already ran
        let time = std::cmp::max(src.current_time(), self.now) + self.latency;
        let task = PacketArrival::new(packet).into_task();
        let event = Event::new(task, time, src.shared(), dst_id);
        dst.shared().push_event(event);
    }
}
