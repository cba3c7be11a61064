//! Test operations that are expected to result in state transitions.

use bytes::Bytes;

use crate::tests::util::time::Duration;
use crate::tests::{
    establish, peer_header, state, Scheduler, TestSocket, HOST_IP, HOST_PORT, PEER_ADDR,
};
use crate::{
    AcceptError, CloseTimerError, ConnectError, ConnectFailure, Ipv4Header, Payload, PollState,
    RecvError, SendError, Shutdown, TcpConfig, TcpError, TcpFlags, TcpHeader, TcpStateKind,
};

/// A header for a packet from a client at 5.6.7.8:`src_port` to a listening socket at
/// 1.2.3.4:10.
fn client_header(src_port: u16, flags: TcpFlags, seq: u32, ack: u32) -> TcpHeader {
    TcpHeader {
        ip: Ipv4Header {
            src: *PEER_ADDR.ip(),
            dst: HOST_IP,
        },
        flags,
        src_port,
        dst_port: HOST_PORT,
        seq,
        ack,
        window_size: 10000,
    }
}

#[test]
fn test_close() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());
    let mut tcp_ref = tcp.borrow_mut();
    assert_eq!(tcp_ref.tcp_state().state(), TcpStateKind::Closed);
    assert!(tcp_ref.tcp_state().poll().is_empty());

    tcp_ref.close().unwrap();
    assert!(tcp_ref.tcp_state().as_closed().is_some());
    assert!(tcp_ref.tcp_state().poll().contains(PollState::CLOSED));
}

#[test]
fn test_listen() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());

    tcp.borrow_mut().listen(10).unwrap();
    assert_eq!(state(&tcp).as_listen().unwrap().max_backlog, 10);

    // we can update the backlog while already in the "listen" state
    tcp.borrow_mut().listen(2).unwrap();
    assert_eq!(state(&tcp).as_listen().unwrap().max_backlog, 2);
}

#[test]
fn test_accept() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());

    tcp.borrow_mut().listen(10).unwrap();
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 0);

    // send the SYN
    let header = client_header(20, TcpFlags::SYN, 0, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 1);

    // read the SYN+ACK
    let (response_header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(response_header.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(response_header.seq, 0);
    assert_eq!(response_header.ack, 1);

    // the connection is not yet established so the accept() fails
    assert!(matches!(
        tcp.borrow_mut().accept(),
        Err(AcceptError::NothingToAccept)
    ));
    assert!(!state(&tcp).poll().contains(PollState::READY_TO_ACCEPT));

    // send the ACK
    let header = client_header(20, TcpFlags::ACK, 1, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 1);
    assert!(state(&tcp).poll().contains(PollState::READY_TO_ACCEPT));

    // the connection is now established
    let accepted_socket = tcp.borrow_mut().accept().unwrap();
    assert!(state(&accepted_socket).as_established().is_some());
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 0);
    assert_eq!(
        state(&accepted_socket).local_remote_addrs(),
        Some((
            "1.2.3.4:10".parse().unwrap(),
            "5.6.7.8:20".parse().unwrap()
        ))
    );
}

/// Test accept()ing a child socket that is in the "close-wait" state (has already received a FIN).
#[test]
fn test_accept_close_wait() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());
    tcp.borrow_mut().listen(10).unwrap();

    // send the SYN
    let header = client_header(20, TcpFlags::SYN, 0, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());

    // read the SYN+ACK
    let (response_header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(response_header.flags, TcpFlags::SYN | TcpFlags::ACK);

    // send the ACK with a FIN
    let header = client_header(20, TcpFlags::ACK | TcpFlags::FIN, 1, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 1);

    // read the ACK for the FIN
    let (response_header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(response_header.flags, TcpFlags::ACK);
    assert_eq!(response_header.ack, 2);

    let accepted_socket = tcp.borrow_mut().accept().unwrap();
    assert_eq!(state(&accepted_socket).state(), TcpStateKind::CloseWait);
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 0);

    // the peer won't send any more data
    let mut buf = [0u8; 10];
    assert!(matches!(
        accepted_socket.borrow_mut().recv(&mut buf[..], 10),
        Err(RecvError::StreamClosed)
    ));
}

#[test]
fn test_listen_zero_backlog() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());
    tcp.borrow_mut().listen(0).unwrap();

    let header = client_header(20, TcpFlags::SYN, 0, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());

    // the SYN was dropped without a response
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 0);
    assert!(scheduler.pop_packet().is_none());
    assert_eq!(state(&tcp).stats().dropped_syn, 1);
}

#[test]
fn test_listen_backlog_full() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());
    tcp.borrow_mut().listen(1).unwrap();

    // the first SYN fills the syn queue
    let header = client_header(20, TcpFlags::SYN, 0, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    let (response_header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(response_header.flags, TcpFlags::SYN | TcpFlags::ACK);

    // so the second is dropped
    let header = client_header(21, TcpFlags::SYN, 0, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(scheduler.pop_packet().is_none());
    assert_eq!(state(&tcp).stats().dropped_syn, 1);

    // complete the first handshake, which moves it to the accept queue
    let header = client_header(20, TcpFlags::ACK, 1, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());

    // now the accept queue is full
    let header = client_header(22, TcpFlags::SYN, 0, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(scheduler.pop_packet().is_none());
    assert_eq!(state(&tcp).stats().dropped_syn, 2);
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 1);

    let accepted_socket = tcp.borrow_mut().accept().unwrap();
    assert!(state(&accepted_socket).as_established().is_some());
    assert!(matches!(
        tcp.borrow_mut().accept(),
        Err(AcceptError::NothingToAccept)
    ));

    // there's room again
    let header = client_header(22, TcpFlags::SYN, 0, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    let (response_header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(response_header.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(response_header.dst_port, 22);
}

/// A handshake-completing ACK is dropped while the accept queue is full, and the peer's
/// retransmitted ACK completes it later.
#[test]
fn test_ack_dropped_when_accept_queue_full() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());
    tcp.borrow_mut().listen(2).unwrap();

    for port in [20, 21] {
        let header = client_header(port, TcpFlags::SYN, 0, 0);
        tcp.borrow_mut().push_in_packet(&header, Payload::default());
        scheduler.pop_packet().unwrap();
    }

    let header = client_header(20, TcpFlags::ACK, 1, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());

    // shrink the backlog so that the accept queue is full
    tcp.borrow_mut().listen(1).unwrap();

    let header = client_header(21, TcpFlags::ACK, 1, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert_eq!(state(&tcp).as_listen().unwrap().accept_queue.len(), 1);
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 2);

    let first = tcp.borrow_mut().accept().unwrap();
    assert_eq!(state(&first).local_remote_addrs().unwrap().1.port(), 20);

    // the retransmitted ACK is accepted now
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    let second = tcp.borrow_mut().accept().unwrap();
    assert!(state(&second).as_established().is_some());
    assert_eq!(state(&second).local_remote_addrs().unwrap().1.port(), 21);
}

#[test]
fn test_connect_active_open() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());

    tcp.borrow_mut().connect(PEER_ADDR).unwrap();
    assert!(state(&tcp).as_syn_sent().is_some());
    assert!(state(&tcp).poll().contains(PollState::CONNECTING));

    // read the SYN
    let (response_header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(response_header.flags, TcpFlags::SYN);
    assert_eq!(response_header.seq, 0);

    // get the autobind address of the socket
    let tcp_bind_addr = response_header.src();
    assert_eq!(tcp_bind_addr, "1.2.3.4:10".parse().unwrap());

    // connecting again fails
    assert!(matches!(
        tcp.borrow_mut().connect(PEER_ADDR),
        Err(ConnectError::InProgress)
    ));

    // send the SYN+ACK
    let header = peer_header(TcpFlags::SYN | TcpFlags::ACK, 0, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_established().is_some());
    assert!(state(&tcp).poll().contains(PollState::CONNECTED));
    assert_eq!(state(&tcp).connect_error(), None);

    // read the ACK
    let (response_header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(response_header.flags, TcpFlags::ACK);
    assert_eq!(response_header.seq, 1);
    assert_eq!(response_header.ack, 1);
}

#[test]
fn test_connect_simultaneous_open() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());

    tcp.borrow_mut().connect(PEER_ADDR).unwrap();

    // read the SYN
    let (response_header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(response_header.flags, TcpFlags::SYN);

    // send a SYN
    let header = peer_header(TcpFlags::SYN, 0, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_syn_received().is_some());

    // read the ACK
    let (response_header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(response_header.flags, TcpFlags::ACK);
    assert_eq!(response_header.ack, 1);

    // send an ACK
    let header = peer_header(TcpFlags::ACK, 1, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_established().is_some());
}

#[test]
fn test_connect_refused() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());
    tcp.borrow_mut().connect(PEER_ADDR).unwrap();
    scheduler.pop_packet().unwrap();

    // an RST that doesn't acknowledge our SYN is ignored
    let header = peer_header(TcpFlags::RST | TcpFlags::ACK, 0, 5);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_syn_sent().is_some());

    let header = peer_header(TcpFlags::RST | TcpFlags::ACK, 0, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_closed().is_some());
    assert_eq!(state(&tcp).connect_error(), Some(ConnectFailure::Refused));
    assert_eq!(
        tcp.borrow_mut().update(|s| s.clear_error()),
        Some(TcpError::ResetReceived)
    );

    // we never reply to an RST
    assert!(scheduler.pop_packet().is_none());
}

#[test]
fn test_connect_timeout() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());
    tcp.borrow_mut().connect(PEER_ADDR).unwrap();
    scheduler.pop_packet().unwrap();

    scheduler.advance(Duration::from_secs(59));
    assert!(state(&tcp).as_syn_sent().is_some());

    // the SYN was retransmitted at 1, 3, 7, 15, and 31 seconds
    let mut retransmitted = 0;
    while let Some((header, _)) = scheduler.pop_packet() {
        assert_eq!(header.flags, TcpFlags::SYN);
        assert_eq!(header.seq, 0);
        retransmitted += 1;
    }
    assert_eq!(retransmitted, 5);
    assert_eq!(state(&tcp).stats().retransmitted, 5);

    scheduler.advance(Duration::from_secs(2));
    assert!(state(&tcp).as_closed().is_some());
    assert_eq!(state(&tcp).connect_error(), Some(ConnectFailure::TimedOut));
    assert_eq!(
        tcp.borrow_mut().update(|s| s.clear_error()),
        Some(TcpError::TimedOut)
    );

    // the pending retransmission timer no longer applies
    scheduler.advance(Duration::from_secs(10));
    assert!(scheduler.pop_packet().is_none());
    assert!(state(&tcp).as_closed().is_some());
}

#[test]
fn test_passive_close() {
    let scheduler = Scheduler::new();

    // get an established tcp socket
    let tcp = establish(&scheduler);

    // send a FIN (move tcp to the "close-wait" state)
    let header = peer_header(TcpFlags::FIN | TcpFlags::ACK, 1, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert_eq!(state(&tcp).state(), TcpStateKind::CloseWait);
    assert!(state(&tcp).poll().contains(PollState::RECV_CLOSED));

    // check the ACK packet sent by the socket
    let (header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(header.flags, TcpFlags::ACK);
    assert_eq!(header.ack, 2);

    // send on the socket
    tcp.borrow_mut().send(&b"hello"[..], 5).unwrap();

    // check the data packet sent by the socket
    let (_, payload) = scheduler.pop_packet().unwrap();
    assert_eq!(payload.concat()[..], b"hello"[..]);

    // close the socket (move tcp to the "last-ack" state)
    tcp.borrow_mut().close().unwrap();
    assert_eq!(state(&tcp).state(), TcpStateKind::LastAck);

    // check the FIN packet sent by the socket
    let (header, _) = scheduler.pop_packet().unwrap();
    assert!(header.flags.contains(TcpFlags::FIN));
    assert_eq!(header.seq, 6);

    // acknowledge the data and FIN (move tcp to the "time-wait" state)
    let header = peer_header(TcpFlags::ACK, 2, 7);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_time_wait().is_some());

    scheduler.advance(Duration::from_secs(59));
    assert!(state(&tcp).as_time_wait().is_some());

    scheduler.advance(Duration::from_secs(2));
    assert!(state(&tcp).as_closed().is_some());
    assert!(scheduler.pop_packet().is_none());
}

#[test]
fn test_poll_through_passive_close() {
    let scheduler = Scheduler::new();
    let tcp = establish(&scheduler);
    assert_eq!(state(&tcp).poll(), PollState::CONNECTED | PollState::WRITABLE);

    // "close-wait" can still send
    let header = peer_header(TcpFlags::FIN | TcpFlags::ACK, 1, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert_eq!(
        state(&tcp).poll(),
        PollState::CONNECTED | PollState::RECV_CLOSED | PollState::WRITABLE,
    );

    tcp.borrow_mut().close().unwrap();
    assert_eq!(state(&tcp).state(), TcpStateKind::LastAck);
    assert_eq!(
        state(&tcp).poll(),
        PollState::CONNECTED | PollState::RECV_CLOSED | PollState::SEND_CLOSED,
    );
}

#[test]
fn test_poll_after_shutdown_write() {
    let scheduler = Scheduler::new();
    let tcp = establish(&scheduler);

    let header = peer_header(TcpFlags::ACK, 1, 1);
    tcp.borrow_mut()
        .push_in_packet(&header, Bytes::from(&b"hi"[..]).into());
    assert_eq!(
        state(&tcp).poll(),
        PollState::CONNECTED | PollState::READABLE | PollState::WRITABLE,
    );

    // unread data stays readable, but the socket isn't writable anymore
    tcp.borrow_mut().shutdown(Shutdown::Write).unwrap();
    assert_eq!(state(&tcp).state(), TcpStateKind::FinWaitOne);
    assert_eq!(
        state(&tcp).poll(),
        PollState::CONNECTED | PollState::SEND_CLOSED | PollState::READABLE,
    );
    assert!(matches!(
        tcp.borrow_mut().send(&b"x"[..], 1),
        Err(SendError::StreamClosed)
    ));

    let mut buf = [0; 2];
    assert_eq!(tcp.borrow_mut().recv(&mut buf[..], 2).unwrap(), 2);
    assert_eq!(&buf, b"hi");
    assert_eq!(state(&tcp).poll(), PollState::CONNECTED | PollState::SEND_CLOSED);
}

#[test]
fn test_active_close_1() {
    let scheduler = Scheduler::new();

    // get an established tcp socket
    let tcp = establish(&scheduler);

    // close the socket (move tcp to the "fin-wait-1" state)
    tcp.borrow_mut().close().unwrap();
    assert_eq!(state(&tcp).state(), TcpStateKind::FinWaitOne);

    // check the FIN packet sent by the socket
    let (header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(header.flags, TcpFlags::FIN | TcpFlags::ACK);

    // send an ACK (move tcp to the "fin-wait-2" state)
    let header = peer_header(TcpFlags::ACK, 1, 2);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert_eq!(state(&tcp).state(), TcpStateKind::FinWaitTwo);

    // send a FIN (move tcp to the "time-wait" state)
    let header = peer_header(TcpFlags::FIN | TcpFlags::ACK, 1, 2);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_time_wait().is_some());

    // check the ACK packet sent by the socket
    let (header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(header.flags, TcpFlags::ACK);
    assert_eq!(header.ack, 2);

    // wait 30 seconds
    scheduler.advance(Duration::from_secs(30));
    assert!(state(&tcp).as_time_wait().is_some());

    // wait another 31 seconds
    scheduler.advance(Duration::from_secs(31));
    assert!(state(&tcp).as_closed().is_some());
}

#[test]
fn test_active_close_2() {
    let scheduler = Scheduler::new();

    // get an established tcp socket
    let tcp = establish(&scheduler);

    // close the socket (move tcp to the "fin-wait-1" state)
    tcp.borrow_mut().close().unwrap();
    assert_eq!(state(&tcp).state(), TcpStateKind::FinWaitOne);

    // check the FIN packet sent by the socket
    let (header, _) = scheduler.pop_packet().unwrap();
    assert!(header.flags.contains(TcpFlags::FIN));

    // send a FIN that also acks our FIN (move tcp to the "time-wait" state)
    let header = peer_header(TcpFlags::FIN | TcpFlags::ACK, 1, 2);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_time_wait().is_some());

    // check the ACK packet sent by the socket
    let (header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(header.flags, TcpFlags::ACK);

    // wait 30 seconds
    scheduler.advance(Duration::from_secs(30));
    assert!(state(&tcp).as_time_wait().is_some());

    // wait another 31 seconds
    scheduler.advance(Duration::from_secs(31));
    assert!(state(&tcp).as_closed().is_some());
}

#[test]
fn test_active_close_3() {
    let scheduler = Scheduler::new();

    // get an established tcp socket
    let tcp = establish(&scheduler);

    // close the socket (move tcp to the "fin-wait-1" state)
    tcp.borrow_mut().close().unwrap();
    assert_eq!(state(&tcp).state(), TcpStateKind::FinWaitOne);

    // check the FIN packet sent by the socket
    let (header, _) = scheduler.pop_packet().unwrap();
    assert!(header.flags.contains(TcpFlags::FIN));

    // send a FIN that doesn't ack our FIN (move tcp to the "closing" state)
    let header = peer_header(TcpFlags::FIN | TcpFlags::ACK, 1, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert_eq!(state(&tcp).state(), TcpStateKind::Closing);

    // check the ACK packet sent by the socket
    let (header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(header.flags, TcpFlags::ACK);

    // send an ACK (move tcp to the "time-wait" state)
    let header = peer_header(TcpFlags::ACK, 2, 2);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_time_wait().is_some());

    // wait 30 seconds
    scheduler.advance(Duration::from_secs(30));
    assert!(state(&tcp).as_time_wait().is_some());

    // wait another 31 seconds
    scheduler.advance(Duration::from_secs(31));
    assert!(state(&tcp).as_closed().is_some());
}

#[test]
fn test_time_wait_duplicate_fin() {
    let scheduler = Scheduler::new();

    let tcp = establish(&scheduler);
    tcp.borrow_mut().close().unwrap();
    scheduler.pop_packet().unwrap();

    let header = peer_header(TcpFlags::FIN | TcpFlags::ACK, 1, 2);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_time_wait().is_some());
    scheduler.pop_packet().unwrap();

    // our ACK was lost, so the peer retransmits its FIN and we acknowledge it again
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_time_wait().is_some());
    assert_eq!(state(&tcp).stats().dropped_duplicate, 1);

    let (header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(header.flags, TcpFlags::ACK);
    assert_eq!(header.ack, 2);
}

#[test]
fn test_close_timer_expired() {
    let scheduler = Scheduler::new();

    let tcp = establish(&scheduler);
    tcp.borrow_mut().close().unwrap();
    scheduler.pop_packet().unwrap();

    let header = peer_header(TcpFlags::FIN | TcpFlags::ACK, 1, 2);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_time_wait().is_some());

    // expire the "time-wait" timer early
    tcp.borrow_mut()
        .update(|s| s.close_timer_expired())
        .unwrap();
    assert!(state(&tcp).as_closed().is_some());

    assert!(matches!(
        tcp.borrow_mut().update(|s| s.close_timer_expired()),
        Err(CloseTimerError::InvalidState)
    ));

    // the original timer is no longer live
    scheduler.advance(Duration::from_secs(61));
    assert!(state(&tcp).as_closed().is_some());
}

#[test]
fn test_rst_in_established() {
    let scheduler = Scheduler::new();

    let tcp = establish(&scheduler);

    // an RST outside of the receive window is ignored
    let header = peer_header(TcpFlags::RST, 1_000_000, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_established().is_some());
    assert_eq!(state(&tcp).stats().dropped_out_of_window, 1);

    let header = peer_header(TcpFlags::RST, 1, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_closed().is_some());
    assert!(scheduler.pop_packet().is_none());

    let poll = state(&tcp).poll();
    assert!(poll.contains(PollState::CLOSED | PollState::ERROR));

    assert!(matches!(
        tcp.borrow_mut().send(&b"hello"[..], 5),
        Err(SendError::StreamClosed)
    ));
    assert_eq!(
        tcp.borrow_mut().update(|s| s.clear_error()),
        Some(TcpError::ResetReceived)
    );
}

#[test]
fn test_close_with_unread_data() {
    let scheduler = Scheduler::new();

    let tcp = establish(&scheduler);

    let header = peer_header(TcpFlags::ACK, 1, 1);
    tcp.borrow_mut()
        .push_in_packet(&header, bytes::Bytes::from_static(b"hello").into());
    let (header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(header.ack, 6);

    // closing without reading the data aborts the connection
    tcp.borrow_mut().close().unwrap();
    assert!(state(&tcp).as_closed().is_some());

    let (header, _) = scheduler.pop_packet().unwrap();
    assert!(header.flags.contains(TcpFlags::RST));
    assert_eq!(header.seq, 1);
    assert!(scheduler.pop_packet().is_none());

    assert_eq!(
        tcp.borrow_mut().update(|s| s.clear_error()),
        Some(TcpError::ResetSent)
    );
}
