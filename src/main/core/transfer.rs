//! Bulk transfers between two hosts: a client connects to a server, sends a fixed number of bytes,
//! and closes. The server accepts one connection, reads until the client closes, and closes too.
//!
//! Both sides are driven by host tasks that poll their sockets and reschedule themselves until
//! they're done.

use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use crate::core::sim::Simulation;
use crate::core::sim_config::TransferInfo;
use crate::core::support::emulated_time::EmulatedTime;
use crate::core::support::simulation_time::SimulationTime;
use crate::core::work::task::TaskRef;
use crate::host::descriptor::{SocketError, SocketHandle};
use crate::host::host::Host;

// application reads and writes are at most this size
const IO_SIZE: usize = 64 * 1024;

fn poll_interval() -> SimulationTime {
    SimulationTime::MILLISECOND
}

/// What happened during a transfer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connected_at: Option<EmulatedTime>,
    /// When the server saw the end of the stream.
    pub completed_at: Option<EmulatedTime>,
    pub error: Option<String>,
}

impl TransferReport {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some() && self.error.is_none()
    }
}

#[derive(Debug)]
pub struct BulkTransfer {
    info: TransferInfo,
    report: Arc<AtomicRefCell<TransferReport>>,
}

impl BulkTransfer {
    pub fn new(info: TransferInfo) -> Self {
        Self {
            info,
            report: Arc::new(AtomicRefCell::new(TransferReport::default())),
        }
    }

    pub fn info(&self) -> &TransferInfo {
        &self.info
    }

    pub fn report(&self) -> TransferReport {
        self.report.borrow().clone()
    }

    /// Schedule the server to start listening at the start of the simulation, and the client to
    /// connect at the transfer's start time.
    pub fn start(&self, sim: &mut Simulation) -> anyhow::Result<()> {
        let info = self.info.clone();

        let server = sim
            .host(info.server)
            .ok_or_else(|| anyhow::anyhow!("No server host with id {}", info.server))?;
        let report = Arc::clone(&self.report);
        let server_info = info.clone();
        server.schedule_task_at_time(
            TaskRef::new_once(move |host| Server::start(host, server_info, report)),
            EmulatedTime::SIMULATION_START,
        );

        let client = sim
            .host(info.client)
            .ok_or_else(|| anyhow::anyhow!("No client host with id {}", info.client))?;
        let report = Arc::clone(&self.report);
        let start_time = EmulatedTime::SIMULATION_START + info.start_time;
        client.schedule_task_at_time(
            TaskRef::new_once(move |host| Client::start(host, info, report)),
            start_time,
        );

        Ok(())
    }
}

fn fail(report: &AtomicRefCell<TransferReport>, msg: String) {
    log::warn!("Transfer failed: {msg}");
    report.borrow_mut().error.get_or_insert(msg);
}

struct Server {
    listener: SocketHandle,
    conn: Option<SocketHandle>,
    report: Arc<AtomicRefCell<TransferReport>>,
}

impl Server {
    fn start(host: &mut Host, info: TransferInfo, report: Arc<AtomicRefCell<TransferReport>>) {
        let listener = host.create_socket();

        if let Err(e) = host.listen(listener, info.server_addr, 1) {
            fail(&report, format!("Server could not listen on {}: {e}", info.server_addr));
            let _ = host.destroy_socket(listener);
            return;
        }

        log::debug!("Server listening on {}", info.server_addr);

        let server = Self {
            listener,
            conn: None,
            report,
        };
        server.schedule(host);
    }

    fn schedule(self, host: &mut Host) {
        host.schedule_task_with_delay(
            TaskRef::new_once(move |host| self.poll(host)),
            poll_interval(),
        );
    }

    fn poll(mut self, host: &mut Host) {
        if self.conn.is_none() {
            match host.accept_peer(self.listener) {
                Ok((peer, handle)) => {
                    log::info!("Server accepted a connection from {peer}");
                    self.conn = Some(handle);
                    // only one connection per transfer
                    let _ = host.destroy_socket(self.listener);
                }
                Err(e) if e.is_would_block() => {}
                Err(e) => {
                    fail(&self.report, format!("Server could not accept: {e}"));
                    let _ = host.destroy_socket(self.listener);
                    return;
                }
            }
        }

        if let Some(conn) = self.conn {
            match self.drain(host, conn) {
                Ok(true) => {
                    let now = host.current_time();
                    let received = self.report.borrow().bytes_received;
                    log::info!("Server received {received} bytes; the client closed the connection");
                    self.report.borrow_mut().completed_at = Some(now);

                    if let Err(e) = host.close(conn) {
                        log::debug!("Server could not close its connection: {e}");
                    }
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    fail(&self.report, format!("Server could not receive: {e}"));
                    let _ = host.destroy_socket(conn);
                    return;
                }
            }
        }

        self.schedule(host);
    }

    /// Read everything that's available. Returns true if the peer has closed the stream.
    fn drain(&self, host: &mut Host, conn: SocketHandle) -> Result<bool, SocketError> {
        let mut buf = vec![0u8; IO_SIZE];

        loop {
            match host.recv(conn, &mut buf) {
                Ok(n) => self.report.borrow_mut().bytes_received += n as u64,
                Err(SocketError::Recv(tcp::RecvError::StreamClosed)) => return Ok(true),
                Err(e) if e.is_would_block() => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }
}

struct Client {
    socket: SocketHandle,
    remaining: u64,
    report: Arc<AtomicRefCell<TransferReport>>,
}

impl Client {
    fn start(host: &mut Host, info: TransferInfo, report: Arc<AtomicRefCell<TransferReport>>) {
        let socket = host.create_socket();

        if let Err(e) = host.connect(socket, info.server_addr) {
            fail(&report, format!("Client could not connect to {}: {e}", info.server_addr));
            let _ = host.destroy_socket(socket);
            return;
        }

        log::debug!("Client connecting to {}", info.server_addr);

        let client = Self {
            socket,
            remaining: info.size,
            report,
        };
        client.schedule(host);
    }

    fn schedule(self, host: &mut Host) {
        host.schedule_task_with_delay(
            TaskRef::new_once(move |host| self.poll(host)),
            poll_interval(),
        );
    }

    fn poll(mut self, host: &mut Host) {
        match self.try_poll(host) {
            Ok(true) => self.schedule(host),
            Ok(false) => {}
            Err(e) => {
                fail(&self.report, e);
                let _ = host.destroy_socket(self.socket);
            }
        }
    }

    /// Send as much as the socket will take. Returns true if the client should keep polling.
    fn try_poll(&mut self, host: &mut Host) -> Result<bool, String> {
        if let Some(failure) = host.connect_error(self.socket).map_err(|e| e.to_string())? {
            return Err(format!("Client could not connect: {failure:?}"));
        }
        if let Some(err) = host.clear_error(self.socket).map_err(|e| e.to_string())? {
            return Err(format!("Client connection failed: {err:?}"));
        }

        let state = host.poll(self.socket).map_err(|e| e.to_string())?;
        if !state.contains(tcp::PollState::CONNECTED) {
            return Ok(true);
        }

        if self.report.borrow().connected_at.is_none() {
            log::info!("Client connected");
            self.report.borrow_mut().connected_at = Some(host.current_time());
        }

        // the payload contents don't matter
        let buf = vec![0xAB; IO_SIZE];

        while self.remaining > 0 {
            let len = std::cmp::min(self.remaining, IO_SIZE as u64) as usize;
            match host.send(self.socket, &buf[..len]) {
                Ok(n) => {
                    self.remaining -= n as u64;
                    self.report.borrow_mut().bytes_sent += n as u64;
                }
                Err(e) if e.is_would_block() => return Ok(true),
                Err(e) => return Err(format!("Client could not send: {e}")),
            }
        }

        log::info!("Client sent all bytes; closing");
        host.close(self.socket)
            .map_err(|e| format!("Client could not close: {e}"))?;

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use super::*;
    use crate::host::host::{HostId, HostParameters};

    fn sim() -> Simulation {
        let mut sim = Simulation::new(SimulationTime::from_millis(5));
        for (id, ip) in [(0, Ipv4Addr::new(11, 0, 0, 1)), (1, Ipv4Addr::new(11, 0, 0, 2))] {
            sim.add_host(HostParameters::new(HostId::from(id), format!("host{id}"), ip))
                .unwrap();
        }
        sim
    }

    fn transfer(size: u64, port: u16) -> TransferInfo {
        TransferInfo {
            client: HostId::from(0),
            server: HostId::from(1),
            server_addr: SocketAddrV4::new(Ipv4Addr::new(11, 0, 0, 2), port),
            size,
            start_time: SimulationTime::from_millis(100),
        }
    }

    #[test]
    fn test_transfer_completes() {
        let mut sim = sim();
        let transfer = BulkTransfer::new(transfer(1_000_000, 80));
        transfer.start(&mut sim).unwrap();

        sim.run_until(EmulatedTime::SIMULATION_START + SimulationTime::from_secs(30));

        let report = transfer.report();
        assert!(report.is_complete(), "{report:?}");
        assert_eq!(report.bytes_sent, 1_000_000);
        assert_eq!(report.bytes_received, 1_000_000);
        assert!(report.connected_at.unwrap() < report.completed_at.unwrap());
    }

    #[test]
    fn test_two_transfers() {
        let mut sim = sim();
        let first = BulkTransfer::new(transfer(200_000, 80));
        let second = BulkTransfer::new(transfer(300_000, 81));
        first.start(&mut sim).unwrap();
        second.start(&mut sim).unwrap();

        sim.run_until(EmulatedTime::SIMULATION_START + SimulationTime::from_secs(30));

        assert_eq!(first.report().bytes_received, 200_000);
        assert_eq!(second.report().bytes_received, 300_000);
    }

    #[test]
    fn test_same_port_fails() {
        let mut sim = sim();
        let first = BulkTransfer::new(transfer(1000, 80));
        // starts after the first transfer is done
        let mut info = transfer(1000, 80);
        info.start_time = SimulationTime::from_secs(5);
        let second = BulkTransfer::new(info);
        first.start(&mut sim).unwrap();
        second.start(&mut sim).unwrap();

        sim.run_until(EmulatedTime::SIMULATION_START + SimulationTime::from_secs(30));

        assert!(first.report().is_complete());
        assert!(second.report().error.is_some());
    }

    #[test]
    fn test_unknown_host() {
        let mut sim = sim();
        let mut info = transfer(1000, 80);
        info.server = HostId::from(7);

        assert!(BulkTransfer::new(info).start(&mut sim).is_err());
    }
}
