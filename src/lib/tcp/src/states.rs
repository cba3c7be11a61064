use std::collections::{HashMap, LinkedList};
use std::io::{Read, Write};
use std::net::SocketAddrV4;

use crate::connection::Connection;
use crate::seq::Seq;
use crate::util::remove_from_list;
use crate::util::time::Duration;
use crate::{
    AcceptError, AcceptedTcpState, CloseError, CloseTimerError, ConnectError, ConnectFailure,
    Dependencies, ListenError, Payload, PollState, PopPacketError, PushPacketError, RecvError,
    RstCloseError, SegmentStats, SendError, Shutdown, ShutdownError, TcpConfig, TcpError,
    TcpFlags, TcpHeader, TcpState, TcpStateEnum, TcpStateTrait, TimerRegisteredBy,
};

// state structs

/// The "closed" state. A socket starts here unused, and ends here after it's been used. We don't
/// allow TCP socket re-use, so a used closed socket can't listen or connect again.
#[derive(Debug)]
pub struct ClosedState<X: Dependencies> {
    pub(crate) common: Common<X>,
    /// Only set for an unused socket.
    pub(crate) config: Option<TcpConfig>,
    /// Was the socket previously connected? Should be `true` for any states that have previously
    /// been in the "syn-sent" or "syn-received" states, whether or not the connection succeeded.
    pub(crate) was_connected: bool,
    /// RST packets that still need to be sent (for example one for each child of a closed
    /// listener).
    pub(crate) rst_packets: LinkedList<TcpHeader>,
}

#[derive(Debug)]
pub struct ListenState<X: Dependencies> {
    pub(crate) common: Common<X>,
    pub(crate) config: TcpConfig,
    pub(crate) max_backlog: u32,
    /// Child TCP states.
    ///
    /// Child states should only be mutated through the [`with_child`](Self::with_child) method to
    /// ensure that this parent stays in sync with the child.
    pub(crate) children: slotmap::DenseSlotMap<ChildTcpKey, ChildEntry<X>>,
    /// A map from 4 tuple (source address, destination address) to child. Packets received from the
    /// source address will be forwarded to the child.
    pub(crate) conn_map: HashMap<RemoteLocalPair, ChildTcpKey>,
    /// Child TCP states in the "established" or "close-wait" states, ready to be accept()ed.
    pub(crate) accept_queue: LinkedList<ChildTcpKey>,
    /// Child TCP states that have packets to send.
    pub(crate) to_send: LinkedList<ChildTcpKey>,
}

/// Declares the states that carry a [`Connection`]. They share their layout, and the connection
/// decides which of them the socket is in.
macro_rules! connection_states {
    ($($(#[$attr:meta])* $name:ident;)*) => {
        $(
            $(#[$attr])*
            #[derive(Debug)]
            pub struct $name<X: Dependencies> {
                pub(crate) common: Common<X>,
                pub(crate) connection: Connection<X::Instant>,
            }

            impl<X: Dependencies> $name<X> {
                /// Wrap the parts without registering any timers.
                fn from_parts(common: Common<X>, connection: Connection<X::Instant>) -> Self {
                    Self { common, connection }
                }
            }
        )*
    };
}

connection_states! {
    /// Active open, waiting for the peer's SYN.
    SynSentState;
    /// Waiting for the ACK of our SYN.
    SynReceivedState;
    EstablishedState;
    /// We've sent a FIN, and it hasn't been acknowledged.
    FinWaitOneState;
    /// Our FIN was acknowledged, and we're waiting for the peer's FIN.
    FinWaitTwoState;
    /// Both sides sent a FIN, but ours hasn't been acknowledged.
    ClosingState;
    /// Both FINs were exchanged. The socket lingers until the close timer expires.
    TimeWaitState;
    /// The peer sent a FIN, but the application hasn't closed yet.
    CloseWaitState;
    /// The peer sent a FIN, and we're waiting for the ACK of ours.
    LastAckState;
}

// other helper types

/// Indicates that no child exists for the given [key](ChildTcpKey).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct ChildNotFound;

/// Identifies a timer registered through [`Common::register_timer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

/// The timers that are still allowed to run. A timer callback that isn't in this set when it fires
/// does nothing, which is how timers are cancelled (the host's event queue can't remove them).
#[derive(Debug, Default)]
pub(crate) struct TimerSet {
    next_id: u64,
    live: Vec<TimerId>,
}

impl TimerSet {
    fn add(&mut self) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.live.push(id);
        id
    }

    /// Returns `true` if the timer was live.
    fn remove(&mut self, id: TimerId) -> bool {
        let Some(pos) = self.live.iter().position(|x| *x == id) else {
            return false;
        };
        self.live.swap_remove(pos);
        true
    }

    fn clear(&mut self) {
        self.live.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.live.len()
    }
}

#[derive(Debug)]
pub(crate) struct Common<X: Dependencies> {
    pub(crate) deps: X,
    /// If the current state is a child of a parent state, this should be the key that the parent
    /// can use to lookup ths child state.
    pub(crate) child_key: Option<ChildTcpKey>,
    pub(crate) error: Option<TcpError>,
    pub(crate) connect_failure: Option<ConnectFailure>,
    pub(crate) stats: SegmentStats,
    pub(crate) timers: TimerSet,
}

impl<X: Dependencies> Common<X> {
    fn new(deps: X, child_key: Option<ChildTcpKey>) -> Self {
        Self {
            deps,
            child_key,
            error: None,
            connect_failure: None,
            stats: SegmentStats::default(),
            timers: TimerSet::default(),
        }
    }

    /// Register a timer for this state.
    ///
    /// This method will make sure that the callback gets run on the correct state, even if called
    /// by a child state. The callback won't run if the timer was cancelled, or if all timers were
    /// invalidated by a move to the "closed" state.
    pub fn register_timer(
        &mut self,
        time: X::Instant,
        f: impl FnOnce(TcpStateEnum<X>) -> TcpStateEnum<X> + Send + Sync + 'static,
    ) -> TimerId {
        let timer_id = self.timers.add();

        // the handle that identifies this state if the state is a child of some parent state
        let child_key = self.child_key;

        let checked_f = move |mut state: TcpStateEnum<X>| {
            if !state.common_mut().timers.remove(timer_id) {
                return state;
            }
            f(state)
        };

        // takes an owned `TcpStateEnum` and returns a `TcpStateEnum`
        let timer_cb_inner = move |mut parent_state, state_type| {
            match state_type {
                // we're the parent and the timer was registered by us
                TimerRegisteredBy::Parent => checked_f(parent_state),
                // we're the parent and the timer was registered by a child
                TimerRegisteredBy::Child => {
                    // if not in the listening state anymore, then the child must not exist
                    let TcpStateEnum::Listen(parent_listen_state) = &mut parent_state else {
                        return parent_state;
                    };

                    let child_key = child_key.expect(
                        "The timer was supposedly registered by a child state, but there was no \
                        key to identify the child",
                    );

                    let rv = parent_listen_state.with_child(child_key, |state| (checked_f(state), ()));

                    #[allow(clippy::single_match)]
                    match rv {
                        Ok(()) => {}
                        // the child may have been closed
                        Err(ChildNotFound) => {}
                    }

                    parent_state
                }
            }
        };

        let timer_cb = move |parent_state: &mut TcpState<X>, state_type| {
            parent_state.with_state(|state| (timer_cb_inner(state, state_type), ()))
        };

        self.deps.register_timer(time, timer_cb);

        timer_id
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        self.timers.remove(id);
    }

    pub fn current_time(&self) -> X::Instant {
        self.deps.current_time()
    }

    /// Returns true if the error was set, or false if the error was previously set and was not
    /// modified.
    pub fn set_error_if_unset(&mut self, new_error: TcpError) -> bool {
        if self.error.is_none() {
            self.error = Some(new_error);
            return true;
        }

        false
    }
}

/// A pair of remote and local addresses, typically used to represent a connection (the 4-tuple).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RemoteLocalPair {
    remote: SocketAddrV4,
    local: SocketAddrV4,
}

impl RemoteLocalPair {
    pub fn new(remote: SocketAddrV4, local: SocketAddrV4) -> Self {
        Self { remote, local }
    }
}

slotmap::new_key_type! { pub(crate) struct ChildTcpKey; }

#[derive(Debug)]
pub(crate) struct ChildEntry<X: Dependencies> {
    /// The `Option` is required so that we can run [`TcpState`] methods that require `self`, for
    /// example `child.push_packet()`.
    state: Option<TcpStateEnum<X>>,
    conn_addrs: RemoteLocalPair,
}

// helpers shared by the states that have a connection

/// Push a packet into the connection and update the retransmission timer.
fn connection_push_packet<X: Dependencies>(
    common: &mut Common<X>,
    connection: &mut Connection<X::Instant>,
    header: &TcpHeader,
    payload: Payload,
) -> u32 {
    let pushed_len = connection.push_packet(header, payload, &mut common.stats);
    sync_retransmit_timer(common, connection);
    pushed_len
}

/// Pop a packet from the connection and update the retransmission timer.
fn connection_pop_packet<X: Dependencies>(
    common: &mut Common<X>,
    connection: &mut Connection<X::Instant>,
) -> Result<(TcpHeader, Payload), PopPacketError> {
    let rv = connection.pop_packet(&mut common.stats);
    sync_retransmit_timer(common, connection);
    rv
}

/// The retransmission timer runs whenever there's unacknowledged data in flight, and restarts when
/// the peer acknowledges new data.
fn sync_retransmit_timer<X: Dependencies>(
    common: &mut Common<X>,
    connection: &mut Connection<X::Instant>,
) {
    if connection.take_ack_progress() {
        if let Some(id) = connection.retransmit_timer.take() {
            common.cancel_timer(id);
        }
    }

    match (connection.has_unacked(), connection.retransmit_timer) {
        (true, None) => {
            let time = common.current_time() + connection.rto();
            let id = common.register_timer(time, |state| state.on_retransmit_timer());
            connection.retransmit_timer = Some(id);
        }
        (false, Some(id)) => {
            common.cancel_timer(id);
            connection.retransmit_timer = None;
        }
        _ => {}
    }
}

/// Retransmit (or give up on) the connection. `rebuild` recreates the state that the timer fired
/// in.
fn handle_retransmit_timer<X: Dependencies>(
    mut common: Common<X>,
    mut connection: Connection<X::Instant>,
    rebuild: impl FnOnce(Common<X>, Connection<X::Instant>) -> TcpStateEnum<X>,
) -> TcpStateEnum<X> {
    if !connection.on_retransmit_timeout() {
        log::debug!(
            "{}: giving up on {} after too many retransmissions",
            connection.local_addr,
            connection.remote_addr,
        );

        // an active open that never completed
        if !connection.syn_was_acked() && common.child_key.is_none() {
            common.connect_failure.get_or_insert(ConnectFailure::TimedOut);
        }

        common.error = Some(TcpError::TimedOut);
        return reset_connection(common, connection);
    }

    sync_retransmit_timer(&mut common, &mut connection);
    rebuild(common, connection)
}

// state implementations

impl<X: Dependencies> ClosedState<X> {
    /// A new socket that hasn't been used yet.
    pub fn new_unused(deps: X, config: TcpConfig) -> Self {
        Self {
            common: Common::new(deps, None),
            config: Some(config),
            was_connected: false,
            rst_packets: LinkedList::new(),
        }
    }

    /// A socket that is finished being used. All of its timers are invalidated.
    fn new(mut common: Common<X>, rst_packets: LinkedList<TcpHeader>, was_connected: bool) -> Self {
        debug_assert!(rst_packets.iter().all(|x| x.flags.contains(TcpFlags::RST)));

        common.timers.clear();

        Self {
            common,
            config: None,
            was_connected,
            rst_packets,
        }
    }

    fn is_unused(&self) -> bool {
        self.config.is_some()
    }
}

impl<X: Dependencies> TcpStateTrait<X> for ClosedState<X> {
    fn close(mut self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        // an unused socket can't be used after it's been closed
        self.config = None;
        (self.into(), Ok(()))
    }

    fn rst_close(mut self) -> (TcpStateEnum<X>, Result<(), RstCloseError>) {
        self.config = None;
        (self.into(), Ok(()))
    }

    fn shutdown(self, _how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        if !self.was_connected {
            return (self.into(), Err(ShutdownError::NotConnected));
        }

        // already fully closed
        (self.into(), Ok(()))
    }

    fn listen<T, E>(
        self,
        backlog: u32,
        associate_fn: impl FnOnce() -> Result<T, E>,
    ) -> (TcpStateEnum<X>, Result<T, ListenError<E>>) {
        let Some(config) = self.config else {
            return (self.into(), Err(ListenError::InvalidState));
        };

        let rv = match associate_fn() {
            Ok(x) => x,
            Err(e) => return (self.into(), Err(ListenError::FailedAssociation(e))),
        };

        let new_state = ListenState::new(self.common, config, backlog);
        (new_state.into(), Ok(rv))
    }

    fn connect<T, E>(
        self,
        remote_addr: SocketAddrV4,
        associate_fn: impl FnOnce() -> Result<(SocketAddrV4, T), E>,
    ) -> (TcpStateEnum<X>, Result<T, ConnectError<E>>) {
        let Some(config) = self.config else {
            let err = if self.was_connected {
                ConnectError::AlreadyConnected
            } else {
                ConnectError::InvalidState
            };
            return (self.into(), Err(err));
        };

        let (local_addr, assoc_result) = match associate_fn() {
            Ok((local_addr, assoc_result)) => (local_addr, assoc_result),
            Err(e) => return (self.into(), Err(ConnectError::FailedAssociation(e))),
        };

        assert!(!local_addr.ip().is_unspecified());

        let connection = Connection::new(local_addr, remote_addr, Seq::new(0), config);

        let new_state = SynSentState::new(self.common, connection);
        (new_state.into(), Ok(assoc_result))
    }

    fn send(self, _reader: impl Read, _len: usize) -> (TcpStateEnum<X>, Result<usize, SendError>) {
        if self.was_connected {
            (self.into(), Err(SendError::StreamClosed))
        } else {
            (self.into(), Err(SendError::NotConnected))
        }
    }

    fn recv(self, _writer: impl Write, _len: usize) -> (TcpStateEnum<X>, Result<usize, RecvError>) {
        if self.was_connected {
            (self.into(), Err(RecvError::StreamClosed))
        } else {
            (self.into(), Err(RecvError::NotConnected))
        }
    }

    fn push_packet(
        self,
        _header: &TcpHeader,
        _payload: Payload,
    ) -> (TcpStateEnum<X>, Result<u32, PushPacketError>) {
        if self.is_unused() {
            // not associated with any address, so shouldn't be receiving packets
            return (self.into(), Err(PushPacketError::InvalidState));
        }

        // drop all packets received in this state
        (self.into(), Ok(0))
    }

    fn pop_packet(
        mut self,
    ) -> (
        TcpStateEnum<X>,
        Result<(TcpHeader, Payload), PopPacketError>,
    ) {
        let rv = match self.rst_packets.pop_front() {
            Some(header) => Ok((header, Payload::default())),
            None => Err(PopPacketError::NoPacket),
        };

        (self.into(), rv)
    }

    fn common(&self) -> &Common<X> {
        &self.common
    }

    fn common_mut(&mut self) -> &mut Common<X> {
        &mut self.common
    }

    fn poll(&self) -> PollState {
        let mut poll_state = PollState::empty();

        if !self.is_unused() {
            poll_state.insert(PollState::CLOSED | PollState::RECV_CLOSED | PollState::SEND_CLOSED);
        }

        if self.was_connected {
            poll_state.insert(PollState::CONNECTED);
        }

        if self.common.error.is_some() {
            poll_state.insert(PollState::ERROR);
        }

        poll_state
    }

    fn wants_to_send(&self) -> bool {
        !self.rst_packets.is_empty()
    }

    fn local_remote_addrs(&self) -> Option<(SocketAddrV4, SocketAddrV4)> {
        None
    }
}

impl<X: Dependencies> ListenState<X> {
    fn new(common: Common<X>, config: TcpConfig, max_backlog: u32) -> Self {
        ListenState {
            common,
            config,
            max_backlog,
            children: slotmap::DenseSlotMap::with_key(),
            conn_map: HashMap::new(),
            accept_queue: LinkedList::new(),
            to_send: LinkedList::new(),
        }
    }

    /// Register a new child TCP state for a new incoming connection.
    fn register_child(&mut self, header: &TcpHeader, payload: Payload) -> ChildTcpKey {
        let conn_addrs = RemoteLocalPair::new(header.src(), header.dst());

        let key = self.children.insert_with_key(|key| {
            let mut common = Common::new(self.common.deps.fork(), Some(key));

            assert!(header.flags.contains(TcpFlags::SYN));
            assert!(!header.flags.contains(TcpFlags::RST));

            let mut connection =
                Connection::new(header.dst(), header.src(), Seq::new(0), self.config);
            connection.push_packet(header, payload, &mut common.stats);

            let new_tcp = SynReceivedState::new(common, connection);

            ChildEntry {
                state: Some(new_tcp.into()),
                conn_addrs,
            }
        });

        assert!(self.conn_map.insert(conn_addrs, key).is_none());

        // make sure the child is added to all of the correct lists
        self.sync_child(key).unwrap();

        key
    }

    /// Make sure the parent's state is synchronized with the child's state. For example if the
    /// child is in the "established" state, it should be in the parent's accept queue.
    fn sync_child(&mut self, key: ChildTcpKey) -> Result<(), ChildNotFound> {
        let can_remove;

        {
            let entry = self.children.get_mut(key).ok_or(ChildNotFound)?;
            let child = entry.state.as_ref().unwrap();
            let conn_addrs = &entry.conn_addrs;

            if child.wants_to_send() {
                if !self.to_send.contains(&key) {
                    self.to_send.push_back(key);
                }
            } else {
                remove_from_list(&mut self.to_send, &key);
            }

            if matches!(
                child,
                TcpStateEnum::Established(_) | TcpStateEnum::CloseWait(_)
            ) {
                if !self.accept_queue.contains(&key) {
                    self.accept_queue.push_back(key);
                }
            } else {
                remove_from_list(&mut self.accept_queue, &key);
            }

            debug_assert_eq!(self.conn_map.get(conn_addrs), Some(&key));

            // a closed child may still have an RST to send
            can_remove = child.poll().contains(PollState::CLOSED) && !child.wants_to_send();
        }

        if can_remove {
            self.remove_child(key).unwrap();
        }

        Ok(())
    }

    /// Remove a child state and all references to it (except timers). Returns `None` if there was
    /// no child with the given key.
    fn remove_child(&mut self, key: ChildTcpKey) -> Option<TcpStateEnum<X>> {
        let entry = self.children.remove(key)?;
        let child = entry.state.unwrap();
        let conn_addrs = entry.conn_addrs;

        remove_from_list(&mut self.accept_queue, &key);
        remove_from_list(&mut self.to_send, &key);
        assert_eq!(self.conn_map.remove(&conn_addrs), Some(key));

        Some(child)
    }

    fn child(&self, key: ChildTcpKey) -> Option<&TcpStateEnum<X>> {
        self.children.get(key)?.state.as_ref()
    }

    /// Mutate the child's state, and automatically make sure that the parent's state is correctly
    /// synced with the child's state (see [`sync_child`](Self::sync_child)).
    fn with_child<T>(
        &mut self,
        key: ChildTcpKey,
        f: impl FnOnce(TcpStateEnum<X>) -> (TcpStateEnum<X>, T),
    ) -> Result<T, ChildNotFound> {
        let rv;

        {
            let child = &mut self.children.get_mut(key).ok_or(ChildNotFound)?.state;

            let mut state = child.take().unwrap();
            (state, rv) = f(state);
            *child = Some(state);
        }

        self.sync_child(key).unwrap();

        Ok(rv)
    }

    fn syn_queue_len(&self) -> usize {
        self.children.len() - self.accept_queue.len()
    }
}

impl<X: Dependencies> TcpStateTrait<X> for ListenState<X> {
    fn close(self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        let (new_state, rv) = self.rst_close();
        assert!(rv.is_ok());
        (new_state, Ok(()))
    }

    fn rst_close(mut self) -> (TcpStateEnum<X>, Result<(), RstCloseError>) {
        let child_keys = Vec::from_iter(self.children.keys());
        let mut rst_packets = LinkedList::new();

        for key in child_keys {
            self.with_child(key, |child| child.rst_close())
                .unwrap()
                .unwrap();

            // popping the last packet lets the child be removed, which is why we don't unwrap here
            while let Ok(Ok((header, payload))) = self.with_child(key, |child| child.pop_packet()) {
                debug_assert!(payload.is_empty());
                if header.flags.contains(TcpFlags::RST) {
                    rst_packets.push_back(header);
                }
            }
        }

        assert!(self.children.is_empty());

        let new_state = ClosedState::new(self.common, rst_packets, /* was_connected= */ false);
        (new_state.into(), Ok(()))
    }

    fn shutdown(self, _how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        (self.into(), Err(ShutdownError::NotConnected))
    }

    fn listen<T, E>(
        mut self,
        backlog: u32,
        associate_fn: impl FnOnce() -> Result<T, E>,
    ) -> (TcpStateEnum<X>, Result<T, ListenError<E>>) {
        // the caller can make this a no-op if it doesn't need to associate again
        let rv = match associate_fn() {
            Ok(x) => x,
            Err(e) => return (self.into(), Err(ListenError::FailedAssociation(e))),
        };

        self.max_backlog = backlog;
        (self.into(), Ok(rv))
    }

    fn connect<T, E>(
        self,
        _remote_addr: SocketAddrV4,
        _associate_fn: impl FnOnce() -> Result<(SocketAddrV4, T), E>,
    ) -> (TcpStateEnum<X>, Result<T, ConnectError<E>>) {
        (self.into(), Err(ConnectError::IsListening))
    }

    fn accept(mut self) -> (TcpStateEnum<X>, Result<AcceptedTcpState<X>, AcceptError>) {
        let Some(child_key) = self.accept_queue.pop_front() else {
            return (self.into(), Err(AcceptError::NothingToAccept));
        };

        let child = self.remove_child(child_key).unwrap();

        let accepted_state = match child.try_into() {
            Ok(x) => x,
            Err(child) => {
                panic!("Unexpected child TCP state in accept queue: {child:?}");
            }
        };

        (self.into(), Ok(accepted_state))
    }

    fn send(self, _reader: impl Read, _len: usize) -> (TcpStateEnum<X>, Result<usize, SendError>) {
        (self.into(), Err(SendError::NotConnected))
    }

    fn recv(self, _writer: impl Write, _len: usize) -> (TcpStateEnum<X>, Result<usize, RecvError>) {
        (self.into(), Err(RecvError::NotConnected))
    }

    fn push_packet(
        mut self,
        header: &TcpHeader,
        payload: Payload,
    ) -> (TcpStateEnum<X>, Result<u32, PushPacketError>) {
        // The backlog limits both the accept queue (children that finished the handshake) and the
        // syn queue (children still in "syn-received"). When the accept queue is full we also drop
        // ACKs that would complete a handshake, so the peer retransmits them later.

        let max_backlog = self.max_backlog as usize;
        let accept_queue_full = self.accept_queue.len() >= max_backlog;
        let syn_queue_full = self.syn_queue_len() >= max_backlog;

        let conn_addrs = RemoteLocalPair::new(header.src(), header.dst());

        // forward the packet to a child state if it's from a known src address
        if let Some(child_key) = self.conn_map.get(&conn_addrs).copied() {
            if matches!(self.child(child_key), Some(TcpStateEnum::SynReceived(_)))
                && header.flags.contains(TcpFlags::ACK)
                && accept_queue_full
            {
                log::trace!(
                    "{}: accept queue full, dropping ACK from {}",
                    header.dst(),
                    header.src(),
                );
                return (self.into(), Ok(0));
            }

            let rv = self
                .with_child(child_key, |state| state.push_packet(header, payload))
                .unwrap();

            return (self.into(), rv);
        }

        // this packet is meant for the listener, or for a child that no longer exists

        if !header.flags.contains(TcpFlags::SYN)
            || header.flags.intersects(TcpFlags::ACK | TcpFlags::RST)
        {
            self.common.stats.dropped_malformed += 1;
            return (self.into(), Ok(0));
        }

        if accept_queue_full || syn_queue_full {
            self.common.stats.dropped_syn += 1;
            log::debug!(
                "{}: backlog of {} is full, dropping SYN from {}",
                header.dst(),
                self.max_backlog,
                header.src(),
            );
            return (self.into(), Ok(0));
        }

        self.register_child(header, payload);

        (self.into(), Ok(0))
    }

    fn pop_packet(
        mut self,
    ) -> (
        TcpStateEnum<X>,
        Result<(TcpHeader, Payload), PopPacketError>,
    ) {
        let Some(child_key) = self.to_send.pop_front() else {
            return (self.into(), Err(PopPacketError::NoPacket));
        };

        let rv = self
            .with_child(child_key, |state| state.pop_packet())
            .unwrap();

        // if the child was in the list, then it must have had a packet to send
        let (header, payload) = rv.unwrap();
        debug_assert!(payload.is_empty());

        (self.into(), Ok((header, payload)))
    }

    fn common(&self) -> &Common<X> {
        &self.common
    }

    fn common_mut(&mut self) -> &mut Common<X> {
        &mut self.common
    }

    fn poll(&self) -> PollState {
        let mut poll_state = PollState::LISTENING;

        if !self.accept_queue.is_empty() {
            poll_state.insert(PollState::READY_TO_ACCEPT);
        }

        if self.common.error.is_some() {
            poll_state.insert(PollState::ERROR);
        }

        poll_state
    }

    fn wants_to_send(&self) -> bool {
        !self.to_send.is_empty()
    }

    fn local_remote_addrs(&self) -> Option<(SocketAddrV4, SocketAddrV4)> {
        None
    }
}

/// A state that carries a [`Connection`]. These states share their packet handling (see
/// `connection_state_methods!`) and differ in where the connection's progress takes them.
trait ConnectionState<X: Dependencies>: Sized
where
    TcpStateEnum<X>: From<Self>,
{
    /// Reported by `poll()`, along with the readable, writable and error flags that depend on the
    /// connection's buffers and the socket's error.
    const POLL_STATE: PollState;

    /// The state to move to after a packet that didn't reset the connection.
    fn after_push(self) -> TcpStateEnum<X> {
        self.into()
    }

    /// Runs when a received packet reset the connection, before moving to the "closed" state.
    fn on_reset(&mut self) {}
}

/// The [`TcpStateTrait`] methods that are the same for every [`ConnectionState`].
macro_rules! connection_state_methods {
    () => {
        fn push_packet(
            mut self,
            header: &TcpHeader,
            payload: Payload,
        ) -> (TcpStateEnum<X>, Result<u32, PushPacketError>) {
            if !self.connection.packet_addrs_match(header) {
                return (self.into(), Ok(0));
            }

            let pushed_len =
                connection_push_packet(&mut self.common, &mut self.connection, header, payload);

            if self.connection.is_reset() {
                self.on_reset();
                let new_state = connection_was_reset(self.common, self.connection);
                return (new_state, Ok(pushed_len));
            }

            (self.after_push(), Ok(pushed_len))
        }

        fn pop_packet(
            mut self,
        ) -> (
            TcpStateEnum<X>,
            Result<(TcpHeader, Payload), PopPacketError>,
        ) {
            let rv = connection_pop_packet(&mut self.common, &mut self.connection);
            (self.into(), rv)
        }

        fn on_retransmit_timer(self) -> TcpStateEnum<X> {
            handle_retransmit_timer(self.common, self.connection, |common, connection| {
                Self::from_parts(common, connection).into()
            })
        }

        fn common(&self) -> &Common<X> {
            &self.common
        }

        fn common_mut(&mut self) -> &mut Common<X> {
            &mut self.common
        }

        fn poll(&self) -> PollState {
            connection_poll_state(Self::POLL_STATE, &self.common, &self.connection)
        }

        fn wants_to_send(&self) -> bool {
            self.connection.wants_to_send()
        }

        fn local_remote_addrs(&self) -> Option<(SocketAddrV4, SocketAddrV4)> {
            Some((self.connection.local_addr, self.connection.remote_addr))
        }
    };
}

fn connection_poll_state<X: Dependencies>(
    mut poll_state: PollState,
    common: &Common<X>,
    connection: &Connection<X::Instant>,
) -> PollState {
    if poll_state.contains(PollState::CONNECTED) {
        if connection.recv_buf_has_data() {
            poll_state.insert(PollState::READABLE);
        }

        if !poll_state.contains(PollState::SEND_CLOSED) && connection.send_buf_has_space() {
            poll_state.insert(PollState::WRITABLE);
        }
    }

    if common.error.is_some() {
        poll_state.insert(PollState::ERROR);
    }

    poll_state
}

/// Close a socket that has already sent its FIN. Unread data is reset, and any data that arrives
/// later will be.
fn close_after_fin<X: Dependencies, S>(
    common: Common<X>,
    mut connection: Connection<X::Instant>,
    rebuild: impl FnOnce(Common<X>, Connection<X::Instant>) -> S,
) -> TcpStateEnum<X>
where
    TcpStateEnum<X>: From<S>,
{
    if connection.recv_buf_has_data() {
        return reset_connection(common, connection);
    }

    connection.send_rst_if_recv_payload();
    rebuild(common, connection).into()
}

impl<X: Dependencies> SynSentState<X> {
    fn new(mut common: Common<X>, connection: Connection<X::Instant>) -> Self {
        let timeout = X::Duration::from_millis(connection.config().establish_timeout_ms);
        let time = common.current_time() + timeout;

        common.register_timer(time, |state| {
            let TcpStateEnum::SynSent(mut state) = state else {
                return state;
            };

            log::debug!(
                "{}: connection to {} timed out",
                state.connection.local_addr,
                state.connection.remote_addr,
            );

            state.common.error = Some(TcpError::TimedOut);
            state.common.connect_failure = Some(ConnectFailure::TimedOut);

            let (state, rv) = state.rst_close();
            assert!(rv.is_ok());
            state
        });

        Self::from_parts(common, connection)
    }
}

impl<X: Dependencies> ConnectionState<X> for SynSentState<X> {
    const POLL_STATE: PollState = PollState::CONNECTING;

    fn after_push(self) -> TcpStateEnum<X> {
        match (self.connection.received_syn(), self.connection.syn_was_acked()) {
            (true, true) => EstablishedState::from_parts(self.common, self.connection).into(),
            // simultaneous open
            (true, false) => SynReceivedState::new(self.common, self.connection).into(),
            _ => self.into(),
        }
    }

    fn on_reset(&mut self) {
        if self.connection.rst_was_received() {
            self.common.connect_failure = Some(ConnectFailure::Refused);
        }
    }
}

impl<X: Dependencies> TcpStateTrait<X> for SynSentState<X> {
    connection_state_methods!();

    fn close(mut self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        // nothing was received yet, so there's no data to reset
        debug_assert!(!self.connection.recv_buf_has_data());

        self.common
            .set_error_if_unset(TcpError::ClosedWhileConnecting);

        let new_state = ClosedState::new(self.common, LinkedList::new(), true);
        (new_state.into(), Ok(()))
    }

    fn rst_close(self) -> (TcpStateEnum<X>, Result<(), RstCloseError>) {
        let (new_state, rv) = self.close();
        assert!(rv.is_ok());
        (new_state, Ok(()))
    }

    fn shutdown(mut self, how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        if how.stops_reading() {
            self.connection.send_rst_if_recv_payload()
        }

        if how.stops_writing() {
            let (new_state, rv) = self.close();
            assert!(rv.is_ok());
            return (new_state, Ok(()));
        }

        (self.into(), Ok(()))
    }

    fn connect<T, E>(
        self,
        _remote_addr: SocketAddrV4,
        _associate_fn: impl FnOnce() -> Result<(SocketAddrV4, T), E>,
    ) -> (TcpStateEnum<X>, Result<T, ConnectError<E>>) {
        (self.into(), Err(ConnectError::InProgress))
    }

    fn send(self, _reader: impl Read, _len: usize) -> (TcpStateEnum<X>, Result<usize, SendError>) {
        (self.into(), Err(SendError::NotConnected))
    }

    fn recv(self, _writer: impl Write, _len: usize) -> (TcpStateEnum<X>, Result<usize, RecvError>) {
        (self.into(), Err(RecvError::NotConnected))
    }
}

impl<X: Dependencies> SynReceivedState<X> {
    /// Closes with a RST if the handshake doesn't finish within the establishment timeout.
    fn new(mut common: Common<X>, connection: Connection<X::Instant>) -> Self {
        let timeout = X::Duration::from_millis(connection.config().establish_timeout_ms);
        let time = common.current_time() + timeout;

        common.register_timer(time, |state| {
            let TcpStateEnum::SynReceived(mut state) = state else {
                return state;
            };

            state.common.error = Some(TcpError::TimedOut);
            if state.common.child_key.is_none() {
                // a simultaneous open
                state.common.connect_failure = Some(ConnectFailure::TimedOut);
            }

            let (state, rv) = state.rst_close();
            assert!(rv.is_ok());
            state
        });

        Self::from_parts(common, connection)
    }

    fn send_fin(mut self) -> FinWaitOneState<X> {
        self.connection.send_fin();
        self.common
            .set_error_if_unset(TcpError::ClosedWhileConnecting);
        FinWaitOneState::from_parts(self.common, self.connection)
    }
}

impl<X: Dependencies> ConnectionState<X> for SynReceivedState<X> {
    const POLL_STATE: PollState = PollState::CONNECTING;

    fn after_push(self) -> TcpStateEnum<X> {
        if !self.connection.syn_was_acked() {
            return self.into();
        }

        // the handshake's final ACK may have come with a FIN
        if self.connection.received_fin() {
            CloseWaitState::from_parts(self.common, self.connection).into()
        } else {
            EstablishedState::from_parts(self.common, self.connection).into()
        }
    }

    fn on_reset(&mut self) {
        if self.connection.rst_was_received() && self.common.child_key.is_none() {
            self.common.connect_failure = Some(ConnectFailure::Refused);
        }
    }
}

impl<X: Dependencies> TcpStateTrait<X> for SynReceivedState<X> {
    connection_state_methods!();

    fn close(mut self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        if self.connection.recv_buf_has_data() {
            return (reset_connection(self.common, self.connection), Ok(()));
        }

        self.connection.send_rst_if_recv_payload();
        (self.send_fin().into(), Ok(()))
    }

    fn rst_close(self) -> (TcpStateEnum<X>, Result<(), RstCloseError>) {
        (reset_connection(self.common, self.connection), Ok(()))
    }

    fn shutdown(mut self, how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        if how.stops_reading() {
            self.connection.send_rst_if_recv_payload()
        }

        if how.stops_writing() {
            return (self.send_fin().into(), Ok(()));
        }

        (self.into(), Ok(()))
    }

    fn connect<T, E>(
        self,
        _remote_addr: SocketAddrV4,
        _associate_fn: impl FnOnce() -> Result<(SocketAddrV4, T), E>,
    ) -> (TcpStateEnum<X>, Result<T, ConnectError<E>>) {
        (self.into(), Err(ConnectError::InProgress))
    }

    fn send(self, _reader: impl Read, _len: usize) -> (TcpStateEnum<X>, Result<usize, SendError>) {
        (self.into(), Err(SendError::NotConnected))
    }

    fn recv(self, _writer: impl Write, _len: usize) -> (TcpStateEnum<X>, Result<usize, RecvError>) {
        (self.into(), Err(RecvError::NotConnected))
    }
}

impl<X: Dependencies> ConnectionState<X> for EstablishedState<X> {
    const POLL_STATE: PollState = PollState::CONNECTED;

    fn after_push(self) -> TcpStateEnum<X> {
        if self.connection.received_fin() {
            return CloseWaitState::from_parts(self.common, self.connection).into();
        }
        self.into()
    }
}

impl<X: Dependencies> TcpStateTrait<X> for EstablishedState<X> {
    connection_state_methods!();

    fn close(mut self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        if self.connection.recv_buf_has_data() {
            return (reset_connection(self.common, self.connection), Ok(()));
        }

        self.connection.send_fin();
        self.connection.send_rst_if_recv_payload();

        let new_state = FinWaitOneState::from_parts(self.common, self.connection);
        (new_state.into(), Ok(()))
    }

    fn rst_close(self) -> (TcpStateEnum<X>, Result<(), RstCloseError>) {
        (reset_connection(self.common, self.connection), Ok(()))
    }

    fn shutdown(mut self, how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        if how.stops_reading() {
            self.connection.send_rst_if_recv_payload()
        }

        if how.stops_writing() {
            self.connection.send_fin();
            let new_state = FinWaitOneState::from_parts(self.common, self.connection);
            return (new_state.into(), Ok(()));
        }

        (self.into(), Ok(()))
    }

    fn connect<T, E>(
        self,
        _remote_addr: SocketAddrV4,
        _associate_fn: impl FnOnce() -> Result<(SocketAddrV4, T), E>,
    ) -> (TcpStateEnum<X>, Result<T, ConnectError<E>>) {
        (self.into(), Err(ConnectError::AlreadyConnected))
    }

    fn send(
        mut self,
        reader: impl Read,
        len: usize,
    ) -> (TcpStateEnum<X>, Result<usize, SendError>) {
        let rv = self.connection.send(reader, len);
        (self.into(), rv)
    }

    fn recv(
        mut self,
        writer: impl Write,
        len: usize,
    ) -> (TcpStateEnum<X>, Result<usize, RecvError>) {
        let rv = self.connection.recv(writer, len);
        (self.into(), rv)
    }
}

/// The [`TcpStateTrait`] methods shared by the states that come after our FIN was sent. They can
/// still receive, but can't send or connect again.
macro_rules! fin_sent_methods {
    () => {
        fn rst_close(self) -> (TcpStateEnum<X>, Result<(), RstCloseError>) {
            (reset_connection(self.common, self.connection), Ok(()))
        }

        fn connect<T, E>(
            self,
            _remote_addr: SocketAddrV4,
            _associate_fn: impl FnOnce() -> Result<(SocketAddrV4, T), E>,
        ) -> (TcpStateEnum<X>, Result<T, ConnectError<E>>) {
            (self.into(), Err(ConnectError::AlreadyConnected))
        }

        fn send(
            self,
            _reader: impl Read,
            _len: usize,
        ) -> (TcpStateEnum<X>, Result<usize, SendError>) {
            (self.into(), Err(SendError::StreamClosed))
        }

        fn recv(
            mut self,
            writer: impl Write,
            len: usize,
        ) -> (TcpStateEnum<X>, Result<usize, RecvError>) {
            let rv = self.connection.recv(writer, len);
            (self.into(), rv)
        }
    };
}

impl<X: Dependencies> ConnectionState<X> for FinWaitOneState<X> {
    const POLL_STATE: PollState = PollState::CONNECTED.union(PollState::SEND_CLOSED);

    fn after_push(self) -> TcpStateEnum<X> {
        let (common, connection) = (self.common, self.connection);
        match (connection.received_fin(), connection.fin_was_acked()) {
            (true, true) => TimeWaitState::new(common, connection).into(),
            (true, false) => ClosingState::from_parts(common, connection).into(),
            (false, true) => FinWaitTwoState::from_parts(common, connection).into(),
            (false, false) => Self::from_parts(common, connection).into(),
        }
    }
}

impl<X: Dependencies> TcpStateTrait<X> for FinWaitOneState<X> {
    connection_state_methods!();
    fin_sent_methods!();

    fn close(self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        let new_state = close_after_fin(self.common, self.connection, Self::from_parts);
        (new_state, Ok(()))
    }

    fn shutdown(mut self, how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        if how.stops_reading() {
            self.connection.send_rst_if_recv_payload()
        }

        (self.into(), Ok(()))
    }
}

impl<X: Dependencies> ConnectionState<X> for FinWaitTwoState<X> {
    const POLL_STATE: PollState = PollState::CONNECTED.union(PollState::SEND_CLOSED);

    fn after_push(self) -> TcpStateEnum<X> {
        if self.connection.received_fin() {
            return TimeWaitState::new(self.common, self.connection).into();
        }
        self.into()
    }
}

impl<X: Dependencies> TcpStateTrait<X> for FinWaitTwoState<X> {
    connection_state_methods!();
    fin_sent_methods!();

    fn close(self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        let new_state = close_after_fin(self.common, self.connection, Self::from_parts);
        (new_state, Ok(()))
    }

    fn shutdown(mut self, how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        if how.stops_reading() {
            self.connection.send_rst_if_recv_payload()
        }

        (self.into(), Ok(()))
    }
}

impl<X: Dependencies> ConnectionState<X> for ClosingState<X> {
    const POLL_STATE: PollState = PollState::CONNECTED
        .union(PollState::RECV_CLOSED)
        .union(PollState::SEND_CLOSED);

    fn after_push(self) -> TcpStateEnum<X> {
        if self.connection.fin_was_acked() {
            return TimeWaitState::new(self.common, self.connection).into();
        }
        self.into()
    }
}

impl<X: Dependencies> TcpStateTrait<X> for ClosingState<X> {
    connection_state_methods!();
    fin_sent_methods!();

    fn close(self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        let new_state = close_after_fin(self.common, self.connection, Self::from_parts);
        (new_state, Ok(()))
    }

    fn shutdown(mut self, how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        if how.stops_reading() {
            self.connection.send_rst_if_recv_payload()
        }

        (self.into(), Ok(()))
    }
}

impl<X: Dependencies> TimeWaitState<X> {
    fn new(mut common: Common<X>, connection: Connection<X::Instant>) -> Self {
        let timeout = X::Duration::from_millis(connection.config().time_wait_timeout_ms);
        let time = common.current_time() + timeout;

        common.register_timer(time, |state| {
            let (state, rv) = state.close_timer_expired();
            debug_assert!(rv.is_ok());
            state
        });

        Self::from_parts(common, connection)
    }
}

// a retransmitted FIN means our last ACK was lost, and the connection will ACK it again
impl<X: Dependencies> ConnectionState<X> for TimeWaitState<X> {
    const POLL_STATE: PollState = PollState::CONNECTED
        .union(PollState::RECV_CLOSED)
        .union(PollState::SEND_CLOSED);
}

impl<X: Dependencies> TcpStateTrait<X> for TimeWaitState<X> {
    connection_state_methods!();
    fin_sent_methods!();

    fn close(self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        if self.connection.recv_buf_has_data() {
            return (reset_connection(self.common, self.connection), Ok(()));
        }
        (self.into(), Ok(()))
    }

    fn shutdown(self, _how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        (self.into(), Ok(()))
    }

    fn close_timer_expired(self) -> (TcpStateEnum<X>, Result<(), CloseTimerError>) {
        log::trace!(
            "{}: TIME-WAIT with {} is over",
            self.connection.local_addr,
            self.connection.remote_addr,
        );

        let new_state = ClosedState::new(self.common, LinkedList::new(), true);
        (new_state.into(), Ok(()))
    }
}

impl<X: Dependencies> ConnectionState<X> for CloseWaitState<X> {
    const POLL_STATE: PollState = PollState::CONNECTED.union(PollState::RECV_CLOSED);
}

impl<X: Dependencies> TcpStateTrait<X> for CloseWaitState<X> {
    connection_state_methods!();

    fn close(mut self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        if self.connection.recv_buf_has_data() {
            return (reset_connection(self.common, self.connection), Ok(()));
        }

        self.connection.send_fin();
        let new_state = LastAckState::from_parts(self.common, self.connection);
        (new_state.into(), Ok(()))
    }

    fn rst_close(self) -> (TcpStateEnum<X>, Result<(), RstCloseError>) {
        (reset_connection(self.common, self.connection), Ok(()))
    }

    fn shutdown(mut self, how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        if how.stops_writing() {
            self.connection.send_fin();
            let new_state = LastAckState::from_parts(self.common, self.connection);
            return (new_state.into(), Ok(()));
        }

        (self.into(), Ok(()))
    }

    fn connect<T, E>(
        self,
        _remote_addr: SocketAddrV4,
        _associate_fn: impl FnOnce() -> Result<(SocketAddrV4, T), E>,
    ) -> (TcpStateEnum<X>, Result<T, ConnectError<E>>) {
        (self.into(), Err(ConnectError::AlreadyConnected))
    }

    fn send(
        mut self,
        reader: impl Read,
        len: usize,
    ) -> (TcpStateEnum<X>, Result<usize, SendError>) {
        let rv = self.connection.send(reader, len);
        (self.into(), rv)
    }

    fn recv(
        mut self,
        writer: impl Write,
        len: usize,
    ) -> (TcpStateEnum<X>, Result<usize, RecvError>) {
        let rv = self.connection.recv(writer, len);
        (self.into(), rv)
    }
}

impl<X: Dependencies> ConnectionState<X> for LastAckState<X> {
    const POLL_STATE: PollState = PollState::CONNECTED
        .union(PollState::RECV_CLOSED)
        .union(PollState::SEND_CLOSED);

    fn after_push(self) -> TcpStateEnum<X> {
        // TIME-WAIT is where the host reclaims the connection, so we pass through it here too
        if self.connection.fin_was_acked() {
            return TimeWaitState::new(self.common, self.connection).into();
        }
        self.into()
    }
}

impl<X: Dependencies> TcpStateTrait<X> for LastAckState<X> {
    connection_state_methods!();
    fin_sent_methods!();

    fn close(self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        if self.connection.recv_buf_has_data() {
            return (reset_connection(self.common, self.connection), Ok(()));
        }
        (self.into(), Ok(()))
    }

    fn shutdown(self, _how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        (self.into(), Ok(()))
    }
}

/// Reset the connection and return a new "closed" state that will send the resulting RST packet.
fn reset_connection<X: Dependencies>(
    common: Common<X>,
    mut connection: Connection<X::Instant>,
) -> TcpStateEnum<X> {
    connection.send_rst();
    connection_was_reset(common, connection)
}

/// For a connection that was reset (either by us or by the peer), move to the "closed" state with
/// the remaining RST packet to send, if there is one.
fn connection_was_reset<X: Dependencies>(
    mut common: Common<X>,
    mut connection: Connection<X::Instant>,
) -> TcpStateEnum<X> {
    assert!(connection.is_reset());

    if connection.rst_was_received() {
        common.set_error_if_unset(TcpError::ResetReceived);
    }

    let mut rst_packets = LinkedList::new();

    if let Ok((header, payload)) = connection.pop_packet(&mut common.stats) {
        debug_assert!(payload.is_empty());
        debug_assert!(connection.pop_packet(&mut common.stats).is_err());

        common.set_error_if_unset(TcpError::ResetSent);
        rst_packets.push_back(header);
    }

    ClosedState::new(common, rst_packets, /* was_connected= */ true).into()
}
