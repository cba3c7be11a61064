use std::net::Ipv4Addr;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use crate::core::support::emulated_time::EmulatedTime;
use crate::core::support::simulation_time::SimulationTime;
use crate::core::work::task::TaskRef;
use crate::host::descriptor::SocketHandle;
use crate::host::host::{Host, HostShared};
use crate::host::network::namespace::AssociationHandle;

/// A TCP socket on a host: the TCP state machine plus the socket's network association.
#[derive(Debug)]
pub struct TcpSocket {
    pub(crate) tcp_state: tcp::TcpState<TcpDeps>,
    pub(crate) association: Option<AssociationHandle>,
    /// The application has closed the socket, so it should be removed from the host once the TCP
    /// state has fully closed.
    pub(crate) app_closed: bool,
    /// The application has given up its handle. The connection may still be closing.
    pub(crate) detached: bool,
    /// The close timer fired (or was expired by the application) and moved the state out of
    /// `TIME_WAIT`.
    pub(crate) released: bool,
}

impl TcpSocket {
    pub fn new(deps: TcpDeps, config: tcp::TcpConfig) -> Self {
        Self {
            tcp_state: tcp::TcpState::new(deps, config),
            association: None,
            app_closed: false,
            detached: false,
            released: false,
        }
    }

    /// A socket accepted from a listener.
    pub fn new_accepted(tcp_state: tcp::TcpState<TcpDeps>, association: AssociationHandle) -> Self {
        Self {
            tcp_state,
            association: Some(association),
            app_closed: false,
            detached: false,
            released: false,
        }
    }

    pub fn state(&self) -> tcp::TcpStateKind {
        self.tcp_state.state()
    }

    /// The local address packets from this socket are sent from. Sockets bound to all interfaces
    /// report the unspecified address.
    pub(crate) fn local_ip(&self) -> Ipv4Addr {
        match (&self.association, self.tcp_state.local_remote_addrs()) {
            (_, Some((local, _))) => *local.ip(),
            (Some(association), None) => *association.local_addr().ip(),
            (None, None) => Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Run `f` on the TCP state, noting whether it left `TIME_WAIT`.
    pub(crate) fn update<R>(&mut self, f: impl FnOnce(&mut tcp::TcpState<TcpDeps>) -> R) -> R {
        let before = self.tcp_state.state();
        let rv = f(&mut self.tcp_state);

        if before == tcp::TcpStateKind::TimeWait && self.tcp_state.state() == tcp::TcpStateKind::Closed
        {
            self.released = true;
        }

        rv
    }

    /// Whether the host can forget about this socket.
    pub(crate) fn is_finished(&self) -> bool {
        (self.app_closed || self.detached || self.released)
            && self.tcp_state.state() == tcp::TcpStateKind::Closed
            && !self.tcp_state.wants_to_send()
    }
}

/// The socket that a timer callback runs on, and whether the callback was registered by that
/// socket's own state or by one of its not-yet-accepted child states.
#[derive(Copy, Clone, Debug)]
struct TimerTarget {
    socket: SocketHandle,
    registered_by: tcp::TimerRegisteredBy,
}

/// Lets a TCP state read the host's clock and register timers on the host.
///
/// Timers are scheduled as host tasks that look up the target socket when they run. All timers
/// registered through one `TcpDeps` (and only those) share the same target, so when an accepted
/// child is [retargeted](Self::retarget) its pending timers follow it to its new socket.
#[derive(Debug)]
pub struct TcpDeps {
    host: Arc<HostShared>,
    timer_target: Arc<AtomicRefCell<TimerTarget>>,
}

impl TcpDeps {
    pub fn new(host: Arc<HostShared>, socket: SocketHandle) -> Self {
        Self {
            host,
            timer_target: Arc::new(AtomicRefCell::new(TimerTarget {
                socket,
                registered_by: tcp::TimerRegisteredBy::Parent,
            })),
        }
    }

    /// Run this state's timers (including ones that were already registered) on `socket`.
    pub fn retarget(&mut self, socket: SocketHandle) {
        *self.timer_target.borrow_mut() = TimerTarget {
            socket,
            registered_by: tcp::TimerRegisteredBy::Parent,
        };
    }
}

impl tcp::Dependencies for TcpDeps {
    type Instant = EmulatedTime;
    type Duration = SimulationTime;

    fn register_timer(
        &self,
        time: Self::Instant,
        f: impl FnOnce(&mut tcp::TcpState<Self>, tcp::TimerRegisteredBy) + Send + Sync + 'static,
    ) {
        let target = Arc::clone(&self.timer_target);

        let task = TaskRef::new_once(move |host: &mut Host| {
            let target = *target.borrow();
            host.with_tcp_state(target.socket, |state| f(state, target.registered_by));
        });

        self.host.schedule_task_at_time(task, time);
    }

    fn current_time(&self) -> Self::Instant {
        self.host.current_time()
    }

    fn fork(&self) -> Self {
        let socket = self.timer_target.borrow().socket;

        // timers registered by the child run on the parent's socket until the child is accepted
        Self {
            host: Arc::clone(&self.host),
            timer_target: Arc::new(AtomicRefCell::new(TimerTarget {
                socket,
                registered_by: tcp::TimerRegisteredBy::Child,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use tcp::Dependencies;

    use super::*;
    use crate::host::host::HostId;

    #[test]
    fn test_fork_and_retarget() {
        let host = Arc::new(HostShared::new(HostId::from(0), "host".into()));
        let parent = TcpDeps::new(Arc::clone(&host), SocketHandle::from(1));

        let mut child = parent.fork();
        {
            let target = *child.timer_target.borrow();
            assert_eq!(target.socket, SocketHandle::from(1));
            assert_eq!(target.registered_by, tcp::TimerRegisteredBy::Child);
        }

        // a timer registered before the child was accepted
        let before_accept = Arc::clone(&child.timer_target);

        child.retarget(SocketHandle::from(2));
        let target = *before_accept.borrow();
        assert_eq!(target.socket, SocketHandle::from(2));
        assert_eq!(target.registered_by, tcp::TimerRegisteredBy::Parent);

        // the parent is unaffected
        assert_eq!(parent.timer_target.borrow().socket, SocketHandle::from(1));
    }

    #[test]
    fn test_register_timer_queues_task() {
        let host = Arc::new(HostShared::new(HostId::from(0), "host".into()));
        let deps = TcpDeps::new(Arc::clone(&host), SocketHandle::from(1));

        assert_eq!(deps.current_time(), EmulatedTime::SIMULATION_START);

        let time = EmulatedTime::SIMULATION_START + SimulationTime::SECOND;
        deps.register_timer(time, |_state, _registered_by| {});

        assert_eq!(host.next_event_time(), Some(time));
    }
}
