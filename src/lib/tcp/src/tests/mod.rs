//! Tests for the TCP state machine. A [`Scheduler`] stands in for the host: it owns the clock, runs
//! the timers that sockets register, and collects the packets that sockets send.

mod transitions;

pub mod util {
    pub mod time;
}

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::convert::Infallible;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::{Rc, Weak};

use crate::tests::util::time::{Duration, Instant};
use crate::{
    AcceptError, CloseError, ConnectError, Dependencies, Ipv4Header, ListenError, Payload,
    RecvError, SendError, Shutdown, ShutdownError, TcpConfig, TcpFlags, TcpHeader, TcpState,
    TcpStateKind, TimerRegisteredBy,
};

/// The address of the host that the sockets under test live on.
const HOST_IP: Ipv4Addr = Ipv4Addr::new(1, 2, 3, 4);
/// The port that every test socket binds to.
const HOST_PORT: u16 = 10;
/// The remote end of connections made by [`establish`].
const PEER_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(5, 6, 7, 8), 20);

type Packet = (TcpHeader, Payload);
type SocketRc = Rc<RefCell<TestSocket>>;

/// Pending timers, ordered by time and then by the order they were registered in.
#[derive(Default)]
struct TimerQueue {
    timers: BTreeMap<(Instant, u64), Box<dyn FnOnce()>>,
    next_id: u64,
}

impl TimerQueue {
    fn push(&mut self, time: Instant, f: impl FnOnce() + 'static) {
        self.timers.insert((time, self.next_id), Box::new(f));
        self.next_id += 1;
    }

    /// Remove the earliest timer if it's due no later than `end`.
    fn pop_due(&mut self, end: Instant) -> Option<(Instant, Box<dyn FnOnce()>)> {
        let entry = self.timers.first_entry()?;
        if entry.key().0 > end {
            return None;
        }

        let ((time, _), f) = entry.remove_entry();
        Some((time, f))
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.timers.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
struct Scheduler {
    now: Rc<Cell<Instant>>,
    timers: Rc<RefCell<TimerQueue>>,
    /// Packets sent by any socket, in the order they were sent.
    sent: Rc<RefCell<VecDeque<Packet>>>,
}

impl Scheduler {
    fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::EPOCH)),
            timers: Rc::default(),
            sent: Rc::default(),
        }
    }

    /// Move the clock forward, running timers in order as it reaches them.
    fn advance(&self, duration: Duration) {
        let end = self.now.get() + duration;

        loop {
            // a timer may register more timers, so release the queue before running it
            let next = self.timers.borrow_mut().pop_due(end);
            let Some((time, f)) = next else {
                break;
            };

            self.now.set(time);
            f();
        }

        self.now.set(end);
    }

    fn pop_packet(&self) -> Option<Packet> {
        self.sent.borrow_mut().pop_front()
    }

    fn pending_timers(&self) -> usize {
        self.timers.borrow().timers.len()
    }
}

/// The socket that a timer runs on. A child that hasn't been accepted runs its timers on its
/// listening parent.
#[derive(Clone, Debug)]
struct TimerTarget {
    socket: Weak<RefCell<TestSocket>>,
    registered_by: TimerRegisteredBy,
}

#[derive(Debug)]
struct TestDeps {
    scheduler: Scheduler,
    // shared with pending timers, so retargeting an accepted child also moves its timers
    target: Rc<RefCell<TimerTarget>>,
}

impl Dependencies for TestDeps {
    type Instant = Instant;
    type Duration = Duration;

    fn register_timer(
        &self,
        time: Instant,
        f: impl FnOnce(&mut TcpState<Self>, TimerRegisteredBy) + Send + Sync + 'static,
    ) {
        let target = Rc::clone(&self.target);

        self.scheduler.timers.borrow_mut().push(time, move || {
            let TimerTarget {
                socket,
                registered_by,
            } = target.borrow().clone();

            if let Some(socket) = socket.upgrade() {
                socket.borrow_mut().update(|state| f(state, registered_by));
            }
        });
    }

    fn current_time(&self) -> Instant {
        self.scheduler.now.get()
    }

    fn fork(&self) -> Self {
        let target = self.target.borrow();
        assert_eq!(target.registered_by, TimerRegisteredBy::Parent);

        Self {
            scheduler: self.scheduler.clone(),
            target: Rc::new(RefCell::new(TimerTarget {
                socket: target.socket.clone(),
                registered_by: TimerRegisteredBy::Child,
            })),
        }
    }
}

/// A TCP state wrapped the way the host wraps it. After every operation the packets that the
/// state wants to send are moved to the scheduler.
#[derive(Debug)]
struct TestSocket {
    state: TcpState<TestDeps>,
    sent: Rc<RefCell<VecDeque<Packet>>>,
    local_addr: Option<SocketAddrV4>,
    collect_packets: bool,
}

impl TestSocket {
    fn new(scheduler: &Scheduler, config: TcpConfig) -> SocketRc {
        Rc::new_cyclic(|weak| {
            let deps = TestDeps {
                scheduler: scheduler.clone(),
                target: Rc::new(RefCell::new(TimerTarget {
                    socket: weak.clone(),
                    registered_by: TimerRegisteredBy::Parent,
                })),
            };

            RefCell::new(Self {
                state: TcpState::new(deps, config),
                sent: Rc::clone(&scheduler.sent),
                local_addr: None,
                collect_packets: true,
            })
        })
    }

    fn tcp_state(&self) -> &TcpState<TestDeps> {
        &self.state
    }

    fn update<T>(&mut self, f: impl FnOnce(&mut TcpState<TestDeps>) -> T) -> T {
        let rv = f(&mut self.state);
        if self.collect_packets {
            self.collect();
        }
        rv
    }

    fn collect(&mut self) {
        while self.state.wants_to_send() {
            let Ok(packet) = self.state.pop_packet() else {
                break;
            };
            self.sent.borrow_mut().push_back(packet);
        }
    }

    /// While disabled, packets stay in the state and small writes can be coalesced.
    fn collect_packets(&mut self, collect_packets: bool) {
        self.collect_packets = collect_packets;
        if collect_packets {
            self.collect();
        }
    }

    fn push_in_packet(&mut self, header: &TcpHeader, payload: Payload) {
        self.update(|state| state.push_packet(header, payload))
            .unwrap();
    }

    fn bound_addr(&self) -> SocketAddrV4 {
        self.local_addr
            .unwrap_or(SocketAddrV4::new(HOST_IP, HOST_PORT))
    }

    fn listen(&mut self, backlog: u32) -> Result<(), ListenError<Infallible>> {
        let addr = self.bound_addr();
        let addr = self.update(|state| state.listen(backlog, || Ok::<_, Infallible>(addr)))?;
        self.local_addr = Some(addr);
        Ok(())
    }

    fn connect(&mut self, peer: SocketAddrV4) -> Result<(), ConnectError<Infallible>> {
        let addr = self.bound_addr();
        self.update(|state| state.connect(peer, || Ok::<_, Infallible>((addr, ()))))?;
        self.local_addr = Some(addr);
        Ok(())
    }

    fn accept(&mut self) -> Result<SocketRc, AcceptError> {
        let accepted = self.update(|state| state.accept())?;
        let local_addr = accepted.local_addr();

        let socket: SocketRc = Rc::new_cyclic(|weak: &Weak<RefCell<Self>>| {
            let state = accepted.finalize(|deps| {
                *deps.target.borrow_mut() = TimerTarget {
                    socket: weak.clone(),
                    registered_by: TimerRegisteredBy::Parent,
                };
            });

            RefCell::new(Self {
                state,
                sent: Rc::clone(&self.sent),
                local_addr: Some(local_addr),
                collect_packets: true,
            })
        });

        socket.borrow_mut().update(|_| ());
        Ok(socket)
    }

    fn send(&mut self, reader: impl Read, len: usize) -> Result<usize, SendError> {
        self.update(|state| state.send(reader, len))
    }

    fn recv(&mut self, writer: impl Write, len: usize) -> Result<usize, RecvError> {
        self.update(|state| state.recv(writer, len))
    }

    fn close(&mut self) -> Result<(), CloseError> {
        self.update(|state| state.close())
    }

    fn shutdown(&mut self, how: Shutdown) -> Result<(), ShutdownError> {
        self.update(|state| state.shutdown(how))
    }
}

fn state(tcp: &SocketRc) -> Ref<TcpState<TestDeps>> {
    Ref::map(tcp.borrow(), TestSocket::tcp_state)
}

/// A packet from [`PEER_ADDR`] to the socket returned by [`establish`].
fn peer_header(flags: TcpFlags, seq: u32, ack: u32) -> TcpHeader {
    TcpHeader {
        ip: Ipv4Header {
            src: *PEER_ADDR.ip(),
            dst: HOST_IP,
        },
        flags,
        src_port: PEER_ADDR.port(),
        dst_port: HOST_PORT,
        seq,
        ack,
        window_size: 10000,
    }
}

/// A socket connected to [`PEER_ADDR`], with the handshake's packets already taken from the
/// scheduler.
fn establish(scheduler: &Scheduler) -> SocketRc {
    establish_with_config(scheduler, TcpConfig::default())
}

fn establish_with_config(scheduler: &Scheduler, config: TcpConfig) -> SocketRc {
    let tcp = TestSocket::new(scheduler, config);
    assert_eq!(state(&tcp).state(), TcpStateKind::Closed);

    tcp.borrow_mut().connect(PEER_ADDR).unwrap();
    assert!(state(&tcp).as_syn_sent().is_some());

    let (header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(header.flags, TcpFlags::SYN);

    let header = peer_header(TcpFlags::SYN | TcpFlags::ACK, 0, 1);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert!(state(&tcp).as_established().is_some());

    let (header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(header.flags, TcpFlags::ACK);

    tcp
}

#[test]
fn test_syn_received_timeout() {
    let scheduler = Scheduler::new();

    let tcp = TestSocket::new(&scheduler, TcpConfig::default());
    tcp.borrow_mut().listen(10).unwrap();

    let header = peer_header(TcpFlags::SYN, 0, 0);
    tcp.borrow_mut().push_in_packet(&header, Payload::default());
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 1);

    let (header, _) = scheduler.pop_packet().unwrap();
    assert_eq!(header.flags, TcpFlags::SYN | TcpFlags::ACK);

    // the child closes itself if it's still in "syn-received" after 60 seconds, and retransmits
    // its SYN+ACK until then
    assert_eq!(scheduler.pending_timers(), 2);

    // retransmitted at 1, 3, 7, 15, and 31 seconds
    scheduler.advance(Duration::from_secs(59));
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 1);

    let mut retransmitted = 0;
    while let Some((header, _)) = scheduler.pop_packet() {
        assert_eq!(header.flags, TcpFlags::SYN | TcpFlags::ACK);
        retransmitted += 1;
    }
    assert_eq!(retransmitted, 5);

    scheduler.advance(Duration::from_secs(2));
    assert_eq!(state(&tcp).as_listen().unwrap().children.len(), 0);

    let (header, _) = scheduler.pop_packet().unwrap();
    assert!(header.flags.contains(TcpFlags::RST));

    // the remaining retransmission timer has no child to run on
    scheduler.advance(Duration::from_secs(10));
    assert!(scheduler.pop_packet().is_none());
    assert_eq!(scheduler.pending_timers(), 0);
}

#[test]
fn test_state_is_send_sync() {
    #[derive(Debug)]
    struct ThreadSafeDeps;

    impl Dependencies for ThreadSafeDeps {
        type Instant = Instant;
        type Duration = Duration;

        fn register_timer(
            &self,
            _time: Instant,
            _f: impl FnOnce(&mut TcpState<Self>, TimerRegisteredBy) + Send + Sync + 'static,
        ) {
            unimplemented!()
        }

        fn current_time(&self) -> Instant {
            unimplemented!()
        }

        fn fork(&self) -> Self {
            unimplemented!()
        }
    }

    // `TestDeps` is built on `Rc`, so check the state machine with dependencies that are
    // thread-safe
    static_assertions::assert_impl_all!(TcpState<ThreadSafeDeps>: Send, Sync);
}
