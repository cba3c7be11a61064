//! A sans-I/O TCP connection state machine with a BSD-like socket API. It doesn't perform any
//! networking itself: packets are pushed in with [`TcpState::push_packet`] and taken out with
//! [`TcpState::pop_packet`]. A [dependencies](Dependencies) object must be provided so that the
//! state machine can read the current time and register timers (connection establishment, TIME-WAIT
//! and retransmission timers). Application bytes are buffered in chunked
//! [`ByteQueue`](byte_queue::ByteQueue)s on both the send and receive sides.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::{Duration, Instant};
//!
//! #[derive(Debug)]
//! struct Deps {
//!     now: Instant,
//!     // a real host would queue the timer callbacks as events; here we only count them
//!     timers: Rc<RefCell<u32>>,
//! }
//!
//! impl tcp::Dependencies for Deps {
//!     type Instant = Instant;
//!     type Duration = Duration;
//!
//!     fn register_timer(
//!         &self,
//!         _time: Instant,
//!         _f: impl FnOnce(&mut tcp::TcpState<Self>, tcp::TimerRegisteredBy) + Send + Sync + 'static,
//!     ) {
//!         *self.timers.borrow_mut() += 1;
//!     }
//!
//!     fn current_time(&self) -> Instant {
//!         self.now
//!     }
//!
//!     fn fork(&self) -> Self {
//!         Deps {
//!             now: self.now,
//!             timers: Rc::clone(&self.timers),
//!         }
//!     }
//! }
//!
//! let timers = Rc::new(RefCell::new(0));
//! let deps = Deps {
//!     now: Instant::now(),
//!     timers: Rc::clone(&timers),
//! };
//!
//! let mut state = tcp::TcpState::new(deps, tcp::TcpConfig::default());
//! assert_eq!(state.state(), tcp::TcpStateKind::Closed);
//!
//! // connect to port 80; the closure is where a host would pick an ephemeral port
//! let dst_addr = "10.0.0.2:80".parse().unwrap();
//! state
//!     .connect(dst_addr, || Ok::<_, ()>(("10.0.0.1:2532".parse().unwrap(), ())))
//!     .unwrap();
//! assert_eq!(state.state(), tcp::TcpStateKind::SynSent);
//!
//! let (header, _payload) = state.pop_packet().unwrap();
//! assert!(header.flags.contains(tcp::TcpFlags::SYN));
//! assert_eq!(header.dst(), dst_addr);
//!
//! // the establishment timeout, and the retransmission timer for the SYN
//! assert_eq!(*timers.borrow(), 2);
//! ```

// There are three related state types in this crate:
//
// - `TcpState`: the public-facing type. Its methods take shared or mutable references and it wraps
//   a private `TcpStateEnum`.
// - `TcpStateEnum`: an enum of the individual state types (ex: `ListenState`, `EstablishedState`).
// - `TcpStateTrait`: implemented by each individual state type and, through `enum_dispatch`, by
//   `TcpStateEnum`. Its methods take owned states and return owned `TcpStateEnum` objects, so a
//   state transition is just returning a different variant.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::{Bytes, BytesMut};

pub mod util;

mod buffer;
mod connection;
mod seq;
mod states;

#[cfg(test)]
mod tests;

use crate::states::{
    CloseWaitState, ClosedState, ClosingState, Common, EstablishedState, FinWaitOneState,
    FinWaitTwoState, LastAckState, ListenState, SynReceivedState, SynSentState, TimeWaitState,
};

/// A collection of methods that allow the TCP state to interact with the host.
pub trait Dependencies: Debug + Sized {
    type Instant: crate::util::time::Instant<Duration = Self::Duration>;
    type Duration: crate::util::time::Duration;

    /// Register a timer. The callback will be run on the parent [state](TcpState). The callback can
    /// use the [`TimerRegisteredBy`] argument to know whether the timer was registered by the
    /// parent state or one of its child states.
    ///
    /// A child state that hasn't been accept()ed yet is owned by its listening parent. Timers it
    /// registers run on the parent with `TimerRegisteredBy::Child`, and the parent forwards them.
    fn register_timer(
        &self,
        time: Self::Instant,
        f: impl FnOnce(&mut TcpState<Self>, TimerRegisteredBy) + Send + Sync + 'static,
    );

    /// Get the current time.
    fn current_time(&self) -> Self::Instant;

    /// Create a new `Dependencies` for a child state. Timers registered through the new object
    /// should run on the parent's state with the `TimerRegisteredBy::Child` argument.
    ///
    /// Once the child is accept()ed the parent can no longer reach it, so the child's
    /// `Dependencies` must be updated in [`finalize`](AcceptedTcpState::finalize) to run callbacks
    /// on the child directly with `TimerRegisteredBy::Parent`. This includes timers that were
    /// registered before the accept.
    fn fork(&self) -> Self;
}

/// Whether a timer callback is meant for the state it runs on, or for one of its children.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimerRegisteredBy {
    Parent,
    Child,
}

#[enum_dispatch::enum_dispatch]
trait TcpStateTrait<X>: Debug + Sized
where
    X: Dependencies,
    TcpStateEnum<X>: From<Self>,
{
    /// Start closing this socket. It may or may not close immediately depending on what state the
    /// socket is currently in.
    fn close(self) -> (TcpStateEnum<X>, Result<(), CloseError>) {
        (self.into(), Err(CloseError::InvalidState))
    }

    /// Close this socket by sending an RST packet if connected.
    fn rst_close(self) -> (TcpStateEnum<X>, Result<(), RstCloseError>) {
        (self.into(), Err(RstCloseError::InvalidState))
    }

    fn shutdown(self, _how: Shutdown) -> (TcpStateEnum<X>, Result<(), ShutdownError>) {
        (self.into(), Err(ShutdownError::InvalidState))
    }

    fn listen<T, E>(
        self,
        _backlog: u32,
        _associate_fn: impl FnOnce() -> Result<T, E>,
    ) -> (TcpStateEnum<X>, Result<T, ListenError<E>>) {
        (self.into(), Err(ListenError::InvalidState))
    }

    fn connect<T, E>(
        self,
        _addr: SocketAddrV4,
        _associate_fn: impl FnOnce() -> Result<(SocketAddrV4, T), E>,
    ) -> (TcpStateEnum<X>, Result<T, ConnectError<E>>) {
        (self.into(), Err(ConnectError::InvalidState))
    }

    /// Accept a new child state from the accept queue. The [`AcceptedTcpState::finalize`] method
    /// must be called on the returned child before any code calls into the parent state again,
    /// otherwise the child may miss some timer events.
    fn accept(self) -> (TcpStateEnum<X>, Result<AcceptedTcpState<X>, AcceptError>) {
        (self.into(), Err(AcceptError::InvalidState))
    }

    fn send(self, _reader: impl Read, _len: usize) -> (TcpStateEnum<X>, Result<usize, SendError>) {
        (self.into(), Err(SendError::InvalidState))
    }

    fn recv(self, _writer: impl Write, _len: usize) -> (TcpStateEnum<X>, Result<usize, RecvError>) {
        (self.into(), Err(RecvError::InvalidState))
    }

    /// Returns the number of bytes added to the receive buffer. This may be smaller (ex: duplicate
    /// packet) or larger (ex: the packet filled a gap in the reassembly queue) than the packet's
    /// payload length.
    fn push_packet(
        self,
        _header: &TcpHeader,
        _payload: Payload,
    ) -> (TcpStateEnum<X>, Result<u32, PushPacketError>) {
        (self.into(), Err(PushPacketError::InvalidState))
    }

    fn pop_packet(
        self,
    ) -> (
        TcpStateEnum<X>,
        Result<(TcpHeader, Payload), PopPacketError>,
    ) {
        (self.into(), Err(PopPacketError::InvalidState))
    }

    /// The TIME-WAIT timer has expired (or the host has decided to end TIME-WAIT early). Only valid
    /// in the "time-wait" state.
    fn close_timer_expired(self) -> (TcpStateEnum<X>, Result<(), CloseTimerError>) {
        (self.into(), Err(CloseTimerError::InvalidState))
    }

    /// The retransmission timer has fired. States without a connection ignore it.
    fn on_retransmit_timer(self) -> TcpStateEnum<X> {
        self.into()
    }

    fn common(&self) -> &Common<X>;

    fn common_mut(&mut self) -> &mut Common<X>;

    fn clear_error(&mut self) -> Option<TcpError> {
        self.common_mut().error.take()
    }

    fn poll(&self) -> PollState;

    fn wants_to_send(&self) -> bool;

    fn local_remote_addrs(&self) -> Option<(SocketAddrV4, SocketAddrV4)>;
}

#[derive(Debug)]
pub struct TcpState<X: Dependencies>(Option<TcpStateEnum<X>>);

// this exposes most of the methods from `TcpStateTrait`, but not all of them (for example
// `rst_close()` and the timer callbacks)
impl<X: Dependencies> TcpState<X> {
    pub fn new(deps: X, config: TcpConfig) -> Self {
        let new_state = ClosedState::new_unused(deps, config);
        Self(Some(new_state.into()))
    }

    #[inline]
    fn with_state<T>(&mut self, f: impl FnOnce(TcpStateEnum<X>) -> (TcpStateEnum<X>, T)) -> T {
        // `f` may replace the state with an entirely different state object
        let state = self.0.take().unwrap();
        let old_kind = state.kind();

        let (state, rv) = f(state);

        if state.kind() != old_kind {
            log::trace!(
                "TCP state change {:?}: {old_kind} -> {}",
                state.local_remote_addrs(),
                state.kind(),
            );
        }

        self.0 = Some(state);

        rv
    }

    #[inline]
    fn inner(&self) -> &TcpStateEnum<X> {
        self.0.as_ref().unwrap()
    }

    #[inline]
    pub fn close(&mut self) -> Result<(), CloseError> {
        self.with_state(|state| state.close())
    }

    #[inline]
    pub fn shutdown(&mut self, how: Shutdown) -> Result<(), ShutdownError> {
        self.with_state(|state| state.shutdown(how))
    }

    /// Enter server mode. The backlog is the maximum number of connections that have completed the
    /// handshake but haven't been accept()ed. Calling this again while listening updates the
    /// backlog.
    #[inline]
    pub fn listen<T, E>(
        &mut self,
        backlog: u32,
        associate_fn: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, ListenError<E>> {
        self.with_state(|state| state.listen(backlog, associate_fn))
    }

    #[inline]
    pub fn connect<T, E>(
        &mut self,
        addr: SocketAddrV4,
        associate_fn: impl FnOnce() -> Result<(SocketAddrV4, T), E>,
    ) -> Result<T, ConnectError<E>> {
        self.with_state(|state| state.connect(addr, associate_fn))
    }

    #[inline]
    pub fn accept(&mut self) -> Result<AcceptedTcpState<X>, AcceptError> {
        self.with_state(|state| state.accept())
    }

    #[inline]
    pub fn send(&mut self, reader: impl Read, len: usize) -> Result<usize, SendError> {
        self.with_state(|state| state.send(reader, len))
    }

    #[inline]
    pub fn recv(&mut self, writer: impl Write, len: usize) -> Result<usize, RecvError> {
        self.with_state(|state| state.recv(writer, len))
    }

    #[inline]
    pub fn push_packet(
        &mut self,
        header: &TcpHeader,
        payload: Payload,
    ) -> Result<u32, PushPacketError> {
        self.with_state(|state| state.push_packet(header, payload))
    }

    #[inline]
    pub fn pop_packet(&mut self) -> Result<(TcpHeader, Payload), PopPacketError> {
        self.with_state(|state| state.pop_packet())
    }

    #[inline]
    pub fn close_timer_expired(&mut self) -> Result<(), CloseTimerError> {
        self.with_state(|state| state.close_timer_expired())
    }

    #[inline]
    pub fn clear_error(&mut self) -> Option<TcpError> {
        self.0.as_mut().unwrap().clear_error()
    }

    /// Why an active open failed, if it did. This isn't cleared by
    /// [`clear_error`](Self::clear_error).
    #[inline]
    pub fn connect_error(&self) -> Option<ConnectFailure> {
        self.inner().common().connect_failure
    }

    #[inline]
    pub fn poll(&self) -> PollState {
        self.inner().poll()
    }

    #[inline]
    pub fn wants_to_send(&self) -> bool {
        self.inner().wants_to_send()
    }

    #[inline]
    pub fn local_remote_addrs(&self) -> Option<(SocketAddrV4, SocketAddrV4)> {
        self.inner().local_remote_addrs()
    }

    #[inline]
    pub fn state(&self) -> TcpStateKind {
        self.inner().kind()
    }

    #[inline]
    pub fn stats(&self) -> SegmentStats {
        self.inner().common().stats
    }
}

/// A macro that forwards an argument-less method to the inner type.
///
/// ```ignore
/// // forward!(as_listen, Option<&ListenState<X>>);
/// #[inline]
/// pub fn as_listen(&self) -> Option<&ListenState<X>> {
///     self.0.as_ref().unwrap().as_listen()
/// }
/// ```
#[cfg(test)]
macro_rules! forward {
    ($fn_name:ident, $($return_type:tt)*) => {
        #[inline]
        pub fn $fn_name(&self) -> $($return_type)* {
            self.0.as_ref().unwrap().$fn_name()
        }
    };
}

#[cfg(test)]
impl<X: Dependencies> TcpState<X> {
    forward!(as_listen, Option<&ListenState<X>>);
    forward!(as_syn_sent, Option<&SynSentState<X>>);
    forward!(as_syn_received, Option<&SynReceivedState<X>>);
    forward!(as_established, Option<&EstablishedState<X>>);
    forward!(as_time_wait, Option<&TimeWaitState<X>>);
    forward!(as_closed, Option<&ClosedState<X>>);
}

#[enum_dispatch::enum_dispatch(TcpStateTrait<X>)]
#[derive(Debug)]
enum TcpStateEnum<X: Dependencies> {
    Closed(ClosedState<X>),
    Listen(ListenState<X>),
    SynSent(SynSentState<X>),
    SynReceived(SynReceivedState<X>),
    Established(EstablishedState<X>),
    FinWaitOne(FinWaitOneState<X>),
    FinWaitTwo(FinWaitTwoState<X>),
    Closing(ClosingState<X>),
    TimeWait(TimeWaitState<X>),
    CloseWait(CloseWaitState<X>),
    LastAck(LastAckState<X>),
}

impl<X: Dependencies> TcpStateEnum<X> {
    fn kind(&self) -> TcpStateKind {
        match self {
            Self::Closed(_) => TcpStateKind::Closed,
            Self::Listen(_) => TcpStateKind::Listen,
            Self::SynSent(_) => TcpStateKind::SynSent,
            Self::SynReceived(_) => TcpStateKind::SynReceived,
            Self::Established(_) => TcpStateKind::Established,
            Self::FinWaitOne(_) => TcpStateKind::FinWaitOne,
            Self::FinWaitTwo(_) => TcpStateKind::FinWaitTwo,
            Self::Closing(_) => TcpStateKind::Closing,
            Self::TimeWait(_) => TcpStateKind::TimeWait,
            Self::CloseWait(_) => TcpStateKind::CloseWait,
            Self::LastAck(_) => TcpStateKind::LastAck,
        }
    }
}

/// A macro that creates a method which casts to an inner variant.
#[cfg(test)]
macro_rules! as_impl {
    ($fn_name:ident, $variant:ident, $return_type:ident) => {
        #[inline]
        pub fn $fn_name(&self) -> Option<&$return_type<X>> {
            match self {
                Self::$variant(x) => Some(x),
                _ => None,
            }
        }
    };
}

/// Casts to concrete types. This should only be called from unit tests to verify state.
#[cfg(test)]
impl<X: Dependencies> TcpStateEnum<X> {
    as_impl!(as_listen, Listen, ListenState);
    as_impl!(as_syn_sent, SynSent, SynSentState);
    as_impl!(as_syn_received, SynReceived, SynReceivedState);
    as_impl!(as_established, Established, EstablishedState);
    as_impl!(as_time_wait, TimeWait, TimeWaitState);
    as_impl!(as_closed, Closed, ClosedState);
}

/// The name of a TCP state, as in RFC 9293.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TcpStateKind {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWaitOne,
    FinWaitTwo,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
}

impl std::fmt::Display for TcpStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::FinWaitOne => "FIN_WAIT_1",
            Self::FinWaitTwo => "FIN_WAIT_2",
            Self::Closing => "CLOSING",
            Self::TimeWait => "TIME_WAIT",
            Self::CloseWait => "CLOSE_WAIT",
            Self::LastAck => "LAST_ACK",
        };
        f.write_str(name)
    }
}

/// An accept()ed TCP state. The caller must [`finalize`](Self::finalize) it to update the state's
/// `Dependencies` since the state is no longer owned by the listening socket.
// a wrapper struct around an enum so that public code can't access the inner state object
pub struct AcceptedTcpState<X: Dependencies>(AcceptedTcpStateInner<X>);

/// Either an "established" or a "close-wait" state can be accept()ed.
enum AcceptedTcpStateInner<X: Dependencies> {
    Established(EstablishedState<X>),
    CloseWait(CloseWaitState<X>),
}

impl<X: Dependencies> AcceptedTcpState<X> {
    /// This allows the caller to update the state's `Dependencies`.
    ///
    /// This must be called immediately after [`TcpState::accept`], otherwise the accept()ed socket
    /// may miss some of its timer events.
    pub fn finalize(mut self, f: impl FnOnce(&mut X)) -> TcpState<X> {
        let common = match &mut self.0 {
            AcceptedTcpStateInner::Established(state) => &mut state.common,
            AcceptedTcpStateInner::CloseWait(state) => &mut state.common,
        };

        // no longer owned by a parent
        common.child_key = None;

        f(&mut common.deps);

        TcpState(Some(self.0.into()))
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        match &self.0 {
            AcceptedTcpStateInner::Established(state) => state.connection.local_addr,
            AcceptedTcpStateInner::CloseWait(state) => state.connection.local_addr,
        }
    }

    pub fn remote_addr(&self) -> SocketAddrV4 {
        match &self.0 {
            AcceptedTcpStateInner::Established(state) => state.connection.remote_addr,
            AcceptedTcpStateInner::CloseWait(state) => state.connection.remote_addr,
        }
    }
}

impl<X: Dependencies> TryFrom<TcpStateEnum<X>> for AcceptedTcpState<X> {
    type Error = TcpStateEnum<X>;

    fn try_from(state: TcpStateEnum<X>) -> Result<Self, Self::Error> {
        match state {
            TcpStateEnum::Established(state) => Ok(Self(AcceptedTcpStateInner::Established(state))),
            TcpStateEnum::CloseWait(state) => Ok(Self(AcceptedTcpStateInner::CloseWait(state))),
            // return the state back to the caller
            state => Err(state),
        }
    }
}

impl<X: Dependencies> From<AcceptedTcpStateInner<X>> for TcpStateEnum<X> {
    fn from(inner: AcceptedTcpStateInner<X>) -> Self {
        match inner {
            AcceptedTcpStateInner::Established(state) => state.into(),
            AcceptedTcpStateInner::CloseWait(state) => state.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

impl Shutdown {
    pub(crate) fn stops_reading(self) -> bool {
        matches!(self, Self::Read | Self::Both)
    }

    pub(crate) fn stops_writing(self) -> bool {
        matches!(self, Self::Write | Self::Both)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TcpError {
    ResetSent,
    ResetReceived,
    /// The connection was closed while it was connecting, and no RST was sent or received.
    ClosedWhileConnecting,
    TimedOut,
}

/// Why an active open (a `connect()`) failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The peer answered the SYN with an RST.
    Refused,
    /// The handshake didn't complete before the establishment timeout.
    TimedOut,
}

/// Counters for segments that were dropped or resent. Drops are normal protocol events and never
/// fatal to the connection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentStats {
    pub dropped_out_of_window: u64,
    pub dropped_duplicate: u64,
    pub dropped_malformed: u64,
    /// SYNs dropped by a listener whose queues were full.
    pub dropped_syn: u64,
    pub retransmitted: u64,
}

// errors for operations on `TcpStateTrait` objects

#[derive(Debug)]
pub enum CloseError {
    InvalidState,
}

#[derive(Debug)]
enum RstCloseError {
    InvalidState,
}

#[derive(Debug)]
pub enum CloseTimerError {
    InvalidState,
}

#[derive(Debug)]
pub enum ListenError<E> {
    InvalidState,
    FailedAssociation(E),
}

#[derive(Debug)]
pub enum ConnectError<E> {
    InvalidState,
    /// A previous connection attempt is in progress.
    InProgress,
    /// A connection has previously been attempted and was either successful or unsuccessful. This
    /// does not include connection attempts that are in progress ("syn-sent" or "syn-received"
    /// states).
    AlreadyConnected,
    /// Is already listening for new connections.
    IsListening,
    FailedAssociation(E),
}

#[derive(Debug)]
pub enum AcceptError {
    InvalidState,
    NothingToAccept,
}

#[derive(Debug)]
pub enum ShutdownError {
    NotConnected,
    InvalidState,
}

#[derive(Debug)]
pub enum SendError {
    InvalidState,
    Full,
    NotConnected,
    StreamClosed,
    Io(std::io::Error),
}

#[derive(Debug)]
pub enum RecvError {
    InvalidState,
    Empty,
    NotConnected,
    /// The peer has sent a FIN, so no more data will be received.
    StreamClosed,
    Io(std::io::Error),
}

#[derive(Debug)]
pub enum PushPacketError {
    InvalidState,
}

#[derive(Debug)]
pub enum PopPacketError {
    InvalidState,
    NoPacket,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PollState: u32 {
        /// Data can be read.
        const READABLE = 1 << 0;
        /// Data can be written.
        const WRITABLE = 1 << 1;
        /// There is a pending error that can be read using [`TcpState::clear_error`].
        const ERROR = 1 << 2;
        /// The connection has been closed for receiving. There may still be buffered data to read.
        const RECV_CLOSED = 1 << 3;
        /// The connection has been closed for sending.
        const SEND_CLOSED = 1 << 4;
        /// Is listening for new connections.
        const LISTENING = 1 << 5;
        /// A listening socket has a new incoming connection that can be accepted.
        const READY_TO_ACCEPT = 1 << 6;
        /// In either the "syn-sent" or "syn-received" states.
        const CONNECTING = 1 << 7;
        /// A connection has previously been attempted and has finished connecting, whether or not
        /// it succeeded.
        const CONNECTED = 1 << 8;
        /// Fully closed after having been used. A new, unused socket is not "closed".
        const CLOSED = 1 << 9;
    }
}

/// Per-connection parameters. Durations are in milliseconds so that the config doesn't depend on
/// the [`Dependencies`] time types.
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub struct TcpConfig {
    pub(crate) mss: u32,
    pub(crate) send_buffer_size: usize,
    pub(crate) recv_buffer_size: usize,
    pub(crate) chunk_capacity: usize,
    pub(crate) establish_timeout_ms: u64,
    pub(crate) time_wait_timeout_ms: u64,
    pub(crate) initial_rto_ms: u64,
    pub(crate) max_rto_ms: u64,
    pub(crate) max_retransmits: u32,
}

impl TcpConfig {
    pub fn mss(&mut self, mss: u32) {
        assert!(mss > 0);
        self.mss = mss;
    }

    pub fn send_buffer_size(&mut self, size: usize) {
        self.send_buffer_size = size;
    }

    pub fn recv_buffer_size(&mut self, size: usize) {
        self.recv_buffer_size = size;
    }

    pub fn chunk_capacity(&mut self, capacity: usize) {
        assert!(capacity > 0);
        self.chunk_capacity = capacity;
    }

    pub fn establish_timeout_ms(&mut self, ms: u64) {
        self.establish_timeout_ms = ms;
    }

    pub fn time_wait_timeout_ms(&mut self, ms: u64) {
        self.time_wait_timeout_ms = ms;
    }

    pub fn initial_rto_ms(&mut self, ms: u64) {
        self.initial_rto_ms = ms;
    }

    pub fn max_rto_ms(&mut self, ms: u64) {
        self.max_rto_ms = ms;
    }

    pub fn max_retransmits(&mut self, count: u32) {
        self.max_retransmits = count;
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            mss: 1460,
            send_buffer_size: 131_072,
            recv_buffer_size: 174_760,
            chunk_capacity: 4096,
            establish_timeout_ms: 60_000,
            time_wait_timeout_ms: 60_000,
            initial_rto_ms: 1_000,
            max_rto_ms: 60_000,
            max_retransmits: 15,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TcpFlags: u8 {
        const FIN = 1 << 0;
        const SYN = 1 << 1;
        const RST = 1 << 2;
        const PSH = 1 << 3;
        const ACK = 1 << 4;
        const URG = 1 << 5;
        const ECE = 1 << 6;
        const CWR = 1 << 7;
    }
}

#[derive(Copy, Clone, Debug)]
pub struct TcpHeader {
    pub ip: Ipv4Header,
    pub flags: TcpFlags,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub window_size: u16,
}

impl TcpHeader {
    pub fn src(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip.src, self.src_port)
    }

    pub fn dst(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip.dst, self.dst_port)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// A packet payload containing a list of [byte](Bytes) chunks.
///
/// The sum of the lengths of each chunk must be at most [`u32::MAX`], otherwise operations on the
/// payload may panic.
#[derive(Clone, Debug, Default)]
pub struct Payload(pub Vec<Bytes>);

// Equality is ambiguous: is `["hello", "world"]` the same payload as `["helloworld"]`?
static_assertions::assert_not_impl_any!(Payload: PartialEq, Eq);

impl Payload {
    /// Returns the number of bytes in the payload.
    pub fn len(&self) -> u32 {
        self.0
            .iter()
            // `fold` rather than `sum` so that we always panic on overflow
            .fold(0usize, |acc, x| acc.checked_add(x.len()).unwrap())
            .try_into()
            .unwrap()
    }

    /// Returns true if the payload has no data (no byte chunks or only empty byte chunks).
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|x| x.is_empty())
    }

    /// Concatenate the byte chunks into a single byte chunk. This only copies if there is more than
    /// one non-empty chunk.
    pub fn concat(&self) -> Bytes {
        let mut chunks = self.0.iter().filter(|x| !x.is_empty());

        let Some(first) = chunks.next() else {
            return Bytes::new();
        };

        let Some(second) = chunks.next() else {
            return first.clone();
        };

        let mut bytes = BytesMut::with_capacity(self.len() as usize);
        bytes.extend_from_slice(first);
        bytes.extend_from_slice(second);
        for chunk in chunks {
            bytes.extend_from_slice(chunk);
        }

        bytes.freeze()
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self(vec![bytes])
    }
}

impl From<BytesMut> for Payload {
    fn from(bytes: BytesMut) -> Self {
        bytes.freeze().into()
    }
}

#[cfg(test)]
mod payload_tests {
    use super::*;

    #[test]
    fn test_payload_concat() {
        assert!(Payload::default().concat().is_empty());
        assert!(Payload::default().is_empty());

        let single = Payload::from(Bytes::from_static(b"abc"));
        assert_eq!(&single.concat()[..], b"abc");

        let multi = Payload(vec![
            Bytes::from_static(b"ab"),
            Bytes::new(),
            Bytes::from_static(b"cd"),
            Bytes::from_static(b"e"),
        ]);
        assert_eq!(multi.len(), 5);
        assert_eq!(&multi.concat()[..], b"abcde");
    }
}
