use std::net::{Ipv4Addr, SocketAddrV4};

use shadow_netcore::core::sim::Simulation;
use shadow_netcore::core::support::emulated_time::EmulatedTime;
use shadow_netcore::core::support::simulation_time::SimulationTime;
use shadow_netcore::host::descriptor::{SocketError, SocketHandle};
use shadow_netcore::host::host::{HostId, HostParameters};

const CLIENT: HostId = HostId::new(0);
const SERVER: HostId = HostId::new(1);
const SERVER_IP: Ipv4Addr = Ipv4Addr::new(11, 0, 0, 2);

fn server_addr() -> SocketAddrV4 {
    SocketAddrV4::new(SERVER_IP, 80)
}

fn at(millis: u64) -> EmulatedTime {
    EmulatedTime::SIMULATION_START + SimulationTime::from_millis(millis)
}

/// Two hosts with a 10 ms latency between them.
fn simulation(server_params: impl FnOnce(&mut HostParameters)) -> Simulation {
    let mut sim = Simulation::new(SimulationTime::from_millis(10));

    let client = HostParameters::new(CLIENT, "client".into(), Ipv4Addr::new(11, 0, 0, 1));
    sim.add_host(client).unwrap();

    let mut server = HostParameters::new(SERVER, "server".into(), SERVER_IP);
    server_params(&mut server);
    sim.add_host(server).unwrap();

    sim
}

fn listen(sim: &mut Simulation, backlog: u32) -> SocketHandle {
    let server = sim.host_mut(SERVER).unwrap();
    let listener = server.create_socket();
    server.listen(listener, server_addr(), backlog).unwrap();
    listener
}

fn connect(sim: &mut Simulation) -> SocketHandle {
    let client = sim.host_mut(CLIENT).unwrap();
    let socket = client.create_socket();
    client.connect(socket, server_addr()).unwrap();
    socket
}

fn state(sim: &Simulation, host: HostId, socket: SocketHandle) -> tcp::TcpStateKind {
    sim.host(host).unwrap().socket_state(socket).unwrap()
}

#[test]
fn handshake_then_accept_with_backlog_one() {
    let mut sim = simulation(|_| {});
    let listener = listen(&mut sim, 1);
    let client = connect(&mut sim);

    // SYN, SYN-ACK and ACK
    sim.run_until(at(35));
    assert_eq!(state(&sim, CLIENT, client), tcp::TcpStateKind::Established);

    let server = sim.host_mut(SERVER).unwrap();
    let (peer, accepted) = server.accept_peer(listener).unwrap();
    assert_eq!(*peer.ip(), Ipv4Addr::new(11, 0, 0, 1));
    assert_eq!(
        server.socket_state(accepted).unwrap(),
        tcp::TcpStateKind::Established
    );
    assert_eq!(
        server.socket_local_addr(accepted).unwrap(),
        Some(server_addr())
    );

    // the queue is empty now
    let err = server.accept_peer(listener).unwrap_err();
    assert!(matches!(
        err,
        SocketError::Accept(tcp::AcceptError::NothingToAccept)
    ));
    assert!(err.is_would_block());
    assert_eq!(server.socket_state(listener).unwrap(), tcp::TcpStateKind::Listen);
}

#[test]
fn full_backlog_drops_syn_silently() {
    let mut sim = simulation(|_| {});
    let listener = listen(&mut sim, 0);
    let client = connect(&mut sim);

    sim.run_until(at(100));

    let server = sim.host(SERVER).unwrap();
    assert_eq!(server.socket_state(listener).unwrap(), tcp::TcpStateKind::Listen);
    assert!(server.socket_stats(listener).unwrap().dropped_syn >= 1);

    // no SYN-ACK and no RST
    assert_eq!(server.stats().packets_sent, 0);
    assert_eq!(state(&sim, CLIENT, client), tcp::TcpStateKind::SynSent);

    let err = sim.host_mut(SERVER).unwrap().accept_peer(listener).unwrap_err();
    assert!(err.is_would_block());
}

#[test]
fn time_wait_ends_with_close_timer() {
    let mut sim = simulation(|_| {});
    let listener = listen(&mut sim, 10);
    let client = connect(&mut sim);
    sim.run_until(at(35));

    let (_, accepted) = sim.host_mut(SERVER).unwrap().accept_peer(listener).unwrap();

    // only a connection in TIME_WAIT can have its close timer expire
    assert!(matches!(
        sim.host_mut(CLIENT).unwrap().close_timer_expired(client),
        Err(SocketError::CloseTimer(tcp::CloseTimerError::InvalidState))
    ));

    // active close by the client
    sim.host_mut(CLIENT).unwrap().close(client).unwrap();
    sim.run_until(at(100));
    assert_eq!(state(&sim, CLIENT, client), tcp::TcpStateKind::FinWaitTwo);
    assert_eq!(state(&sim, SERVER, accepted), tcp::TcpStateKind::CloseWait);

    let server = sim.host_mut(SERVER).unwrap();
    let mut buf = [0u8; 16];
    assert!(matches!(
        server.recv(accepted, &mut buf),
        Err(SocketError::Recv(tcp::RecvError::StreamClosed))
    ));
    server.close(accepted).unwrap();

    sim.run_until(at(200));
    assert_eq!(state(&sim, CLIENT, client), tcp::TcpStateKind::TimeWait);

    // the server's socket is gone once its FIN was acknowledged
    assert!(matches!(
        sim.host(SERVER).unwrap().socket_state(accepted),
        Err(SocketError::InvalidHandle)
    ));

    // still waiting well before the close timer
    sim.run_until(at(10_000));
    assert_eq!(state(&sim, CLIENT, client), tcp::TcpStateKind::TimeWait);

    let host = sim.host_mut(CLIENT).unwrap();
    host.close_timer_expired(client).unwrap();
    assert!(matches!(
        host.socket_state(client),
        Err(SocketError::InvalidHandle)
    ));
    assert!(matches!(
        host.send(client, b"data"),
        Err(SocketError::InvalidHandle)
    ));
    assert_eq!(host.num_sockets(), 0);
}

#[test]
fn time_wait_close_timer_fires() {
    let mut sim = simulation(|_| {});
    let listener = listen(&mut sim, 10);
    let client = connect(&mut sim);
    sim.run_until(at(35));

    let (_, accepted) = sim.host_mut(SERVER).unwrap().accept_peer(listener).unwrap();
    sim.host_mut(CLIENT).unwrap().close(client).unwrap();
    sim.host_mut(SERVER).unwrap().close(accepted).unwrap();

    sim.run_until(at(1_000));
    assert_eq!(state(&sim, CLIENT, client), tcp::TcpStateKind::TimeWait);

    // the default TIME_WAIT period is 60 seconds
    sim.run_until(at(62_000));
    assert!(matches!(
        sim.host(CLIENT).unwrap().socket_state(client),
        Err(SocketError::InvalidHandle)
    ));
}

#[test]
fn data_arrives_in_order() {
    let mut sim = simulation(|_| {});
    let listener = listen(&mut sim, 10);
    let client = connect(&mut sim);
    sim.run_until(at(35));

    let (_, accepted) = sim.host_mut(SERVER).unwrap().accept_peer(listener).unwrap();

    let data: Vec<u8> = (0..50_000u32).map(|x| (x % 251) as u8).collect();
    let sent = sim.host_mut(CLIENT).unwrap().send(client, &data).unwrap();
    assert_eq!(sent, data.len());

    sim.run_until(at(1_000));

    let mut received = vec![0u8; 100_000];
    let n = sim
        .host_mut(SERVER)
        .unwrap()
        .recv(accepted, &mut received)
        .unwrap();
    assert_eq!(&received[..n], &data[..]);

    let stats = sim.host(CLIENT).unwrap().socket_stats(client).unwrap();
    assert_eq!(stats.retransmitted, 0);
}

#[test]
fn removed_host_drops_packets() {
    let mut sim = simulation(|_| {});
    let _listener = listen(&mut sim, 10);
    let client = connect(&mut sim);

    // the SYN is on its way
    sim.run_until(at(1));
    assert_eq!(sim.stats().packets_routed, 1);

    assert!(sim.remove_host(SERVER));
    sim.run_until(at(100));
    assert_eq!(state(&sim, CLIENT, client), tcp::TcpStateKind::SynSent);

    // the retransmitted SYNs have nowhere to go, and the handshake times out
    sim.run_until(at(70_000));
    assert!(sim.stats().packets_dropped >= 1);

    let host = sim.host(CLIENT).unwrap();
    assert_eq!(
        host.connect_error(client).unwrap(),
        Some(tcp::ConnectFailure::TimedOut)
    );
    assert_eq!(host.socket_state(client).unwrap(), tcp::TcpStateKind::Closed);
}

#[test]
fn busy_cpu_delays_replies() {
    let mut sim = simulation(|params| {
        params.cpu_threshold = Some(SimulationTime::NANOSECOND);
        params.packet_cpu_cost = SimulationTime::from_millis(5);
    });
    let _listener = listen(&mut sim, 10);
    let client = connect(&mut sim);

    // without the CPU cost the SYN-ACK would arrive at 20 ms
    sim.run_until(at(22));
    assert_eq!(state(&sim, CLIENT, client), tcp::TcpStateKind::SynSent);

    sim.run_until(at(26));
    assert_eq!(state(&sim, CLIENT, client), tcp::TcpStateKind::Established);
}
