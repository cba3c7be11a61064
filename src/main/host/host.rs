use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::core::support::emulated_time::{AtomicEmulatedTime, EmulatedTime};
use crate::core::support::simulation_time::SimulationTime;
use crate::core::work::event::Event;
use crate::core::work::event_queue::EventQueue;
use crate::core::work::task::TaskRef;
use crate::core::worker::{HostInfo, Worker};
use crate::host::cpu::Cpu;
use crate::host::descriptor::tcp::{TcpDeps, TcpSocket};
use crate::host::descriptor::{SocketError, SocketHandle};
use crate::host::network::dispatch::PacketArrival;
use crate::host::network::interface::WILDCARD_ADDR;
use crate::host::network::namespace::{AssociationError, AssociationHandle, NetworkNamespace};
use crate::network::packet::{PacketPriority, PacketRc, PacketStatus};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub struct HostId(u32);

impl HostId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl From<u32> for HostId {
    fn from(val: u32) -> Self {
        HostId(val)
    }
}

impl From<HostId> for u32 {
    fn from(val: HostId) -> Self {
        val.0
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The parts of a host that other objects (TCP timer dependencies, other hosts' events) need to
/// reach without borrowing the [`Host`]: its identity, clock and event queue.
#[derive(Debug)]
pub struct HostShared {
    id: HostId,
    name: Arc<str>,
    event_queue: Mutex<EventQueue>,
    // the time of the event that's currently executing, or of the last one executed
    now: AtomicEmulatedTime,
    event_id_counter: AtomicU64,
}

impl HostShared {
    pub fn new(id: HostId, name: String) -> Self {
        Self {
            id,
            name: name.into(),
            event_queue: Mutex::new(EventQueue::new()),
            now: AtomicEmulatedTime::new(EmulatedTime::SIMULATION_START),
            event_id_counter: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_new_event_id(&self) -> u64 {
        self.event_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn current_time(&self) -> EmulatedTime {
        self.now.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current_time(&self, now: EmulatedTime) {
        self.now.store(now, Ordering::Relaxed);
    }

    /// Schedule `task` to run on this host at `time`. Panics if `time` is earlier than an event
    /// that this host has already run.
    pub fn schedule_task_at_time(&self, task: TaskRef, time: EmulatedTime) {
        let event = Event::new(task, time, self, self.id);
        self.push_event(event);
    }

    pub fn schedule_task_with_delay(&self, task: TaskRef, delay: SimulationTime) {
        self.schedule_task_at_time(task, self.current_time() + delay);
    }

    /// Add an event (possibly created by a different host) to this host's queue.
    pub fn push_event(&self, event: Event) {
        assert_eq!(event.host_id(), self.id);
        self.event_queue.lock().unwrap().push(event);
    }

    pub fn next_event_time(&self) -> Option<EmulatedTime> {
        self.event_queue.lock().unwrap().next_event_time()
    }

    /// Pop the next event if it's earlier than `until`.
    fn pop_event_before(&self, until: EmulatedTime) -> Option<Event> {
        let mut queue = self.event_queue.lock().unwrap();
        match queue.next_event_time() {
            Some(t) if t < until => queue.pop(),
            _ => None,
        }
    }

    fn clear_events(&self) -> usize {
        let mut queue = self.event_queue.lock().unwrap();
        let mut count = 0;
        while queue.pop().is_some() {
            count += 1;
        }
        count
    }
}

/// Everything needed to build a [`Host`].
#[derive(Clone, Debug)]
pub struct HostParameters {
    pub id: HostId,
    pub name: String,
    pub ip_addr: Ipv4Addr,
    pub seed: u64,
    pub cpu_frequency_khz: u64,
    /// The frequency of the machine running the simulation, if known.
    pub cpu_raw_frequency_khz: Option<u64>,
    pub cpu_threshold: Option<SimulationTime>,
    pub cpu_precision: Option<SimulationTime>,
    /// Native processing time charged to the CPU for every packet delivered to a socket.
    pub packet_cpu_cost: SimulationTime,
    pub loopback_latency: SimulationTime,
    pub tcp_config: tcp::TcpConfig,
    /// Upper limit for the backlog of listening sockets.
    pub tcp_backlog_max: u32,
    pub log_level: Option<log::LevelFilter>,
}

impl HostParameters {
    /// Parameters with a 2.5 GHz CPU that never delays the host and default TCP settings.
    pub fn new(id: HostId, name: String, ip_addr: Ipv4Addr) -> Self {
        Self {
            id,
            name,
            ip_addr,
            seed: 1,
            cpu_frequency_khz: 2_500_000,
            cpu_raw_frequency_khz: Some(2_500_000),
            cpu_threshold: None,
            cpu_precision: None,
            packet_cpu_cost: SimulationTime::ZERO,
            loopback_latency: SimulationTime::MILLISECOND,
            tcp_config: tcp::TcpConfig::default(),
            tcp_backlog_max: 4096,
            log_level: None,
        }
    }
}

/// Packet counters for a host.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HostStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// A simulated Host.
///
/// The host owns its sockets, network interfaces and CPU. It runs the events in its queue, and
/// hands packets for other hosts to whoever drives the simulation through
/// [`take_outbound_packets`](Self::take_outbound_packets).
#[derive(Debug)]
pub struct Host {
    shared: Arc<HostShared>,
    info: HostInfo,
    params: HostParameters,
    cpu: Cpu,
    net_ns: NetworkNamespace,
    sockets: BTreeMap<SocketHandle, TcpSocket>,
    next_socket_handle: u32,
    random: Xoshiro256PlusPlus,
    // packets for other hosts that haven't been routed yet
    outbound: Vec<PacketRc>,
    next_packet_priority: PacketPriority,
    // a task to resume sending packets once the CPU is no longer blocked
    resume_sending_scheduled: bool,
    stats: HostStats,
}

impl Host {
    pub fn new(params: HostParameters) -> Self {
        log::debug!(
            "Setting up host '{}' (id {}) with address {}",
            params.name,
            params.id,
            params.ip_addr
        );

        let shared = Arc::new(HostShared::new(params.id, params.name.clone()));

        let info = HostInfo {
            name: Arc::clone(&shared.name),
            default_ip: params.ip_addr,
            log_level: params.log_level,
        };

        let cpu = Cpu::new(
            params.cpu_frequency_khz,
            params.cpu_raw_frequency_khz,
            params.cpu_threshold,
            params.cpu_precision,
        );

        Self {
            shared,
            info,
            cpu,
            net_ns: NetworkNamespace::new(params.ip_addr),
            sockets: BTreeMap::new(),
            next_socket_handle: 1,
            random: Xoshiro256PlusPlus::seed_from_u64(params.seed),
            outbound: Vec::new(),
            next_packet_priority: 0,
            resume_sending_scheduled: false,
            stats: HostStats::default(),
            params,
        }
    }

    pub fn id(&self) -> HostId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn default_ip(&self) -> Ipv4Addr {
        self.params.ip_addr
    }

    pub fn info(&self) -> &HostInfo {
        &self.info
    }

    pub fn shared(&self) -> &Arc<HostShared> {
        &self.shared
    }

    pub fn network_namespace(&self) -> &NetworkNamespace {
        &self.net_ns
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn stats(&self) -> HostStats {
        self.stats
    }

    pub fn random(&mut self) -> &mut impl rand::Rng {
        &mut self.random
    }

    pub fn current_time(&self) -> EmulatedTime {
        self.shared.current_time()
    }

    pub fn schedule_task_at_time(&self, task: TaskRef, time: EmulatedTime) {
        self.shared.schedule_task_at_time(task, time);
    }

    pub fn schedule_task_with_delay(&self, task: TaskRef, delay: SimulationTime) {
        self.shared.schedule_task_with_delay(task, delay);
    }

    pub fn next_event_time(&self) -> Option<EmulatedTime> {
        self.shared.next_event_time()
    }

    /// The number of sockets the host is tracking, including closed sockets that are still
    /// finishing their connection.
    pub fn num_sockets(&self) -> usize {
        self.sockets.len()
    }

    /// Create a new unconnected TCP socket.
    pub fn create_socket(&mut self) -> SocketHandle {
        let handle = Self::allocate_handle(&mut self.next_socket_handle);
        let deps = TcpDeps::new(Arc::clone(&self.shared), handle);
        self.sockets
            .insert(handle, TcpSocket::new(deps, self.params.tcp_config));

        log::trace!("Created socket {handle}");
        handle
    }

    fn allocate_handle(next: &mut u32) -> SocketHandle {
        let handle = SocketHandle::from(*next);
        *next += 1;
        handle
    }

    /// Give up the application's handle to the socket. The connection is closed if it isn't
    /// already, and the host keeps the socket until the connection has finished closing. The
    /// handle is invalid after this returns.
    pub fn destroy_socket(&mut self, handle: SocketHandle) -> Result<(), SocketError> {
        let socket = self.app_socket_mut(handle)?;

        if !socket.app_closed {
            if let Err(e) = socket.update(|state| state.close()) {
                log::debug!("Closing socket {handle} while destroying it failed: {e:?}");
            }
            socket.app_closed = true;
        }
        socket.detached = true;

        self.socket_updated(handle);
        Ok(())
    }

    /// Put the socket in server mode, listening on `addr`. A port of 0 chooses a random free port.
    /// The backlog is limited by the host's configured maximum. Calling this on a socket that's
    /// already listening only updates the backlog.
    pub fn listen(
        &mut self,
        handle: SocketHandle,
        addr: SocketAddrV4,
        backlog: u32,
    ) -> Result<(), SocketError> {
        let backlog = std::cmp::min(backlog, self.params.tcp_backlog_max);

        let Host {
            sockets,
            net_ns,
            random,
            ..
        } = self;

        let socket = sockets
            .get_mut(&handle)
            .filter(|s| !s.detached)
            .ok_or(SocketError::InvalidHandle)?;
        let is_associated = socket.association.is_some();

        let association = socket.update(|state| {
            state.listen(backlog, || -> Result<_, AssociationError> {
                if is_associated {
                    return Ok(None);
                }

                let port = if addr.port() == 0 {
                    net_ns
                        .get_random_free_port(*addr.ip(), WILDCARD_ADDR, &mut *random)
                        .ok_or(AssociationError::NoFreePort)?
                } else {
                    addr.port()
                };

                let addr = SocketAddrV4::new(*addr.ip(), port);
                net_ns.associate_interface(handle, addr, WILDCARD_ADDR).map(Some)
            })
        })?;

        if let Some(association) = association {
            log::trace!(
                "Socket {handle} listening on {} with backlog {backlog}",
                association.local_addr()
            );
            socket.association = Some(association);
        }

        Ok(())
    }

    /// Start connecting to `peer`. The socket is bound to a random free port on the interface
    /// that can reach the peer.
    pub fn connect(&mut self, handle: SocketHandle, peer: SocketAddrV4) -> Result<(), SocketError> {
        let Host {
            sockets,
            net_ns,
            random,
            ..
        } = self;

        let socket = sockets
            .get_mut(&handle)
            .filter(|s| !s.detached)
            .ok_or(SocketError::InvalidHandle)?;

        let association = socket.update(|state| {
            state.connect(peer, || -> Result<_, AssociationError> {
                let local_ip = if peer.ip().is_loopback() {
                    Ipv4Addr::LOCALHOST
                } else {
                    net_ns.default_ip
                };

                let port = net_ns
                    .get_random_free_port(local_ip, peer, &mut *random)
                    .ok_or(AssociationError::NoFreePort)?;
                let local = SocketAddrV4::new(local_ip, port);

                let association = net_ns.associate_interface(handle, local, peer)?;
                Ok((local, association))
            })
        })?;

        log::trace!(
            "Socket {handle} connecting from {} to {peer}",
            association.local_addr()
        );
        socket.association = Some(association);

        self.socket_updated(handle);
        Ok(())
    }

    /// Take a completed connection from a listening socket. Returns the peer's address and the
    /// handle of the new connected socket.
    pub fn accept_peer(
        &mut self,
        handle: SocketHandle,
    ) -> Result<(SocketAddrV4, SocketHandle), SocketError> {
        let Host {
            sockets,
            net_ns,
            next_socket_handle,
            ..
        } = self;

        let socket = sockets
            .get_mut(&handle)
            .filter(|s| !s.detached)
            .ok_or(SocketError::InvalidHandle)?;

        let accepted = socket.update(|state| state.accept())?;
        let local = accepted.local_addr();
        let remote = accepted.remote_addr();

        let new_handle = Self::allocate_handle(next_socket_handle);

        let association = match net_ns.associate_interface(new_handle, local, remote) {
            Ok(x) => x,
            Err(e) => {
                log::warn!("Unable to associate accepted connection {local} <-> {remote}: {e}");
                // nothing else refers to the connection, so just let it go
                let mut state = accepted.finalize(|deps| deps.retarget(new_handle));
                if let Err(e) = state.close() {
                    log::debug!("Closing unassociated connection {local} <-> {remote} failed: {e:?}");
                }
                return Err(e.into());
            }
        };

        let state = accepted.finalize(|deps| deps.retarget(new_handle));
        sockets.insert(new_handle, TcpSocket::new_accepted(state, association));

        log::trace!("Socket {handle} accepted {new_handle} for {local} <-> {remote}");

        // the listener or the new socket may have packets to send
        self.socket_updated(handle);
        self.socket_updated(new_handle);

        Ok((remote, new_handle))
    }

    /// Why the socket's connection attempt failed, if it did.
    pub fn connect_error(
        &self,
        handle: SocketHandle,
    ) -> Result<Option<tcp::ConnectFailure>, SocketError> {
        Ok(self.app_socket(handle)?.tcp_state.connect_error())
    }

    /// Copy bytes into the socket's send buffer. Returns the number of bytes accepted.
    pub fn send(&mut self, handle: SocketHandle, data: &[u8]) -> Result<usize, SocketError> {
        let socket = self.app_socket_mut(handle)?;
        let rv = socket.update(|state| state.send(data, data.len()));

        self.socket_updated(handle);
        Ok(rv?)
    }

    /// Copy received bytes into `buf`. Returns the number of bytes read.
    pub fn recv(&mut self, handle: SocketHandle, buf: &mut [u8]) -> Result<usize, SocketError> {
        let len = buf.len();
        let socket = self.app_socket_mut(handle)?;
        let rv = socket.update(|state| state.recv(buf, len));

        // reading may have opened the receive window
        self.socket_updated(handle);
        Ok(rv?)
    }

    /// Close the connection. The handle stays valid until the connection has fully closed.
    pub fn close(&mut self, handle: SocketHandle) -> Result<(), SocketError> {
        let socket = self.app_socket_mut(handle)?;
        let rv = socket.update(|state| state.close());

        if rv.is_ok() {
            socket.app_closed = true;
        }

        self.socket_updated(handle);
        Ok(rv?)
    }

    pub fn shutdown(&mut self, handle: SocketHandle, how: tcp::Shutdown) -> Result<(), SocketError> {
        let socket = self.app_socket_mut(handle)?;
        let rv = socket.update(|state| state.shutdown(how));

        self.socket_updated(handle);
        Ok(rv?)
    }

    /// End the socket's `TIME_WAIT` period now instead of waiting for its close timer. The socket
    /// is removed and the handle becomes invalid.
    pub fn close_timer_expired(&mut self, handle: SocketHandle) -> Result<(), SocketError> {
        let socket = self.app_socket_mut(handle)?;
        let rv = socket.update(|state| state.close_timer_expired());

        self.socket_updated(handle);
        Ok(rv?)
    }

    pub fn poll(&self, handle: SocketHandle) -> Result<tcp::PollState, SocketError> {
        Ok(self.app_socket(handle)?.tcp_state.poll())
    }

    pub fn socket_state(&self, handle: SocketHandle) -> Result<tcp::TcpStateKind, SocketError> {
        Ok(self.app_socket(handle)?.state())
    }

    /// The address the socket is bound to, if any.
    pub fn socket_local_addr(&self, handle: SocketHandle) -> Result<Option<SocketAddrV4>, SocketError> {
        let socket = self.app_socket(handle)?;
        Ok(socket.association.as_ref().map(AssociationHandle::local_addr))
    }

    pub fn socket_stats(&self, handle: SocketHandle) -> Result<tcp::SegmentStats, SocketError> {
        Ok(self.app_socket(handle)?.tcp_state.stats())
    }

    /// Take the pending error of the socket's connection, if any.
    pub fn clear_error(&mut self, handle: SocketHandle) -> Result<Option<tcp::TcpError>, SocketError> {
        Ok(self.app_socket_mut(handle)?.tcp_state.clear_error())
    }

    fn app_socket(&self, handle: SocketHandle) -> Result<&TcpSocket, SocketError> {
        self.sockets
            .get(&handle)
            .filter(|s| !s.detached)
            .ok_or(SocketError::InvalidHandle)
    }

    fn app_socket_mut(&mut self, handle: SocketHandle) -> Result<&mut TcpSocket, SocketError> {
        self.sockets
            .get_mut(&handle)
            .filter(|s| !s.detached)
            .ok_or(SocketError::InvalidHandle)
    }

    /// Run `f` on the socket's TCP state if the socket still exists. Used by TCP timers.
    pub(crate) fn with_tcp_state(
        &mut self,
        handle: SocketHandle,
        f: impl FnOnce(&mut tcp::TcpState<TcpDeps>),
    ) {
        let Some(socket) = self.sockets.get_mut(&handle) else {
            log::trace!("Socket {handle} no longer exists; ignoring its timer");
            return;
        };

        socket.update(f);
        self.socket_updated(handle);
    }

    /// Deliver a packet to a socket. Processing the packet is charged to the host's CPU.
    pub(crate) fn push_packet_to_socket(&mut self, handle: SocketHandle, packet: PacketRc) {
        self.cpu.add_delay(self.params.packet_cpu_cost);

        let Some(socket) = self.sockets.get_mut(&handle) else {
            debug_panic!("Socket {handle} is associated with an interface but doesn't exist");
            packet.add_status(PacketStatus::RcvSocketDropped);
            self.stats.packets_dropped += 1;
            return;
        };

        let payload_len = packet.payload_len();
        let rv = socket.update(|state| state.push_packet(packet.tcp_header(), packet.payload()));

        match rv {
            Ok(_) => {
                packet.add_status(PacketStatus::RcvSocketProcessed);
                self.stats.packets_received += 1;
                self.stats.bytes_received += payload_len as u64;
            }
            Err(e) => {
                log::debug!(
                    "Socket {handle} in state {} dropped packet from {}: {e:?}",
                    socket.state(),
                    packet.src_address(),
                );
                packet.add_status(PacketStatus::RcvSocketDropped);
                self.stats.packets_dropped += 1;
            }
        }

        // release our packet reference before sending, which may take a while if the CPU is busy
        drop(packet);

        self.socket_updated(handle);
    }

    /// Deliver a packet that arrives now. Usually packets are delivered by [`PacketArrival`]
    /// events.
    pub fn deliver(&mut self, packet: PacketRc) {
        PacketArrival::new(packet).execute(self);
    }

    pub(crate) fn count_dropped_packet(&mut self) {
        self.stats.packets_dropped += 1;
    }

    /// The socket's state may have changed: queue it to send packets, or remove it if it's done.
    fn socket_updated(&mut self, handle: SocketHandle) {
        let Some(socket) = self.sockets.get(&handle) else {
            return;
        };

        if socket.tcp_state.wants_to_send() {
            let local_ip = socket.local_ip();
            self.net_ns.add_data_source(handle, local_ip);
            self.send_packets();
        }

        self.reap_if_finished(handle);
    }

    /// Send packets from sockets that want to send, one packet per socket at a time, until no
    /// socket has anything left to send or the CPU is blocked.
    fn send_packets(&mut self) {
        loop {
            if self.cpu.is_blocked() {
                self.schedule_resume_sending();
                return;
            }

            let Some(handle) = self.net_ns.pop_data_source() else {
                return;
            };

            let Some(socket) = self.sockets.get_mut(&handle) else {
                // removed after it was queued
                continue;
            };

            let (header, payload) = match socket.update(|state| state.pop_packet()) {
                Ok(x) => x,
                Err(tcp::PopPacketError::NoPacket) => {
                    self.reap_if_finished(handle);
                    continue;
                }
                Err(tcp::PopPacketError::InvalidState) => {
                    log::warn!("Socket {handle} was queued to send but can't send packets");
                    continue;
                }
            };

            if socket.tcp_state.wants_to_send() {
                let local_ip = socket.local_ip();
                self.net_ns.add_data_source(handle, local_ip);
            }

            let priority = self.next_packet_priority;
            self.next_packet_priority += 1;

            let packet = PacketRc::new_ipv4_tcp(header, payload, priority);
            packet.add_status(PacketStatus::SndInterfaceSent);
            self.route_packet(packet);

            self.reap_if_finished(handle);
        }
    }

    fn schedule_resume_sending(&mut self) {
        if self.resume_sending_scheduled {
            return;
        }
        self.resume_sending_scheduled = true;

        // the host's clock can lag behind the CPU's when the application acts between events,
        // so resume at the absolute time rather than a delay from the host's clock
        let time = self.cpu.time_available();
        log::trace!("CPU is blocked; resuming sending at {time:?}");

        let task = TaskRef::new_once(|host: &mut Host| {
            host.resume_sending_scheduled = false;
            host.send_packets();
        });
        self.shared.schedule_task_at_time(task, time);
    }

    /// Packets for this host go straight back onto its own queue. Everything else waits for the
    /// simulation to route it.
    fn route_packet(&mut self, packet: PacketRc) {
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += packet.payload_len() as u64;

        let dst_ip = *packet.dst_address().ip();

        if dst_ip.is_loopback() || dst_ip == self.default_ip() {
            let task = PacketArrival::new(packet).into_task();
            self.shared
                .schedule_task_with_delay(task, self.params.loopback_latency);
        } else {
            self.outbound.push(packet);
        }
    }

    /// Packets sent to other hosts since the last call.
    pub fn take_outbound_packets(&mut self) -> Vec<PacketRc> {
        std::mem::take(&mut self.outbound)
    }

    fn reap_if_finished(&mut self, handle: SocketHandle) {
        if !self.sockets.get(&handle).is_some_and(TcpSocket::is_finished) {
            return;
        }

        let Some(socket) = self.sockets.remove(&handle) else {
            return;
        };

        if let Some(association) = socket.association {
            self.net_ns.disassociate_interface(association);
        }

        log::trace!("Removed closed socket {handle}");
    }

    /// Run the next event if it's earlier than `until`. Returns false if there was no such event.
    ///
    /// If the CPU is still busy with earlier work, the event is pushed back until the CPU is
    /// available instead of running.
    pub fn execute_next_event(&mut self, until: EmulatedTime) -> bool {
        let Some(mut event) = self.shared.pop_event_before(until) else {
            return false;
        };

        self.cpu.update_time(event.time());
        let cpu_delay = self.cpu.delay();

        if cpu_delay > SimulationTime::ZERO {
            log::trace!("Event blocked on CPU, rescheduled for {cpu_delay} from now");
            event.set_time(event.time() + cpu_delay);
            self.shared.push_event(event);
            return true;
        }

        self.run_event(event);
        true
    }

    /// Run all events earlier than `until`.
    pub fn execute(&mut self, until: EmulatedTime) {
        while self.execute_next_event(until) {}
    }

    fn run_event(&mut self, event: Event) {
        let time = event.time();
        self.shared.set_current_time(time);
        self.cpu.update_time(time);

        let info = self.info.clone();
        Worker::with_host_context(info, || {
            Worker::set_current_time(time);
            event.execute(self);
        });
    }

    /// Drop all sockets and pending events. Packets in flight to this host are dropped when they
    /// arrive.
    pub fn shutdown_host(&mut self) {
        log::debug!(
            "Shutting down host '{}' with {} sockets",
            self.name(),
            self.sockets.len()
        );

        self.sockets.clear();
        self.net_ns.cleanup();
        self.outbound.clear();

        let dropped = self.shared.clear_events();
        log::trace!("Dropped {dropped} pending events of host '{}'", self.name());
    }
}
