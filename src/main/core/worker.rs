use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::core::support::emulated_time::EmulatedTime;

// thread-local global state
std::thread_local! {
    // No shared ownership or access from outside of the current thread.
    static WORKER: RefCell<Worker> = const { RefCell::new(Worker::new()) };
}

/// Information about the host that is currently executing on this thread.
#[derive(Clone, Debug)]
pub struct HostInfo {
    pub name: Arc<str>,
    pub default_ip: Ipv4Addr,
    /// Overrides the logger's maximum level while this host is active.
    pub log_level: Option<log::LevelFilter>,
}

/// Worker context, containing 'global' information for the current thread. This makes the active
/// host and the simulated time available to code that doesn't have access to the host itself, such
/// as the [`SimLogger`](crate::core::logger::SimLogger).
#[derive(Debug)]
pub struct Worker {
    active_host: Option<HostInfo>,
    now: Option<EmulatedTime>,
}

impl Worker {
    const fn new() -> Self {
        Self {
            active_host: None,
            now: None,
        }
    }

    /// Run `f` with `host` marked as the active host of this thread. Host contexts can't be nested.
    pub fn with_host_context<R>(host: HostInfo, f: impl FnOnce() -> R) -> R {
        WORKER.with(|w| {
            let old = w.borrow_mut().active_host.replace(host);
            debug_assert!(old.is_none(), "A host is already active: {old:?}");
        });

        // cleared even if `f` panics
        struct Reset;
        impl Drop for Reset {
            fn drop(&mut self) {
                WORKER.with(|w| {
                    let mut w = w.borrow_mut();
                    w.active_host = None;
                    w.now = None;
                });
            }
        }

        let _reset = Reset;
        f()
    }

    /// Run `f` with the active host's info, or return `None` if there is no active host.
    #[must_use]
    pub fn with_active_host_info<R>(f: impl FnOnce(&HostInfo) -> R) -> Option<R> {
        WORKER.with(|w| w.borrow().active_host.as_ref().map(f))
    }

    pub fn set_current_time(now: EmulatedTime) {
        WORKER.with(|w| w.borrow_mut().now = Some(now));
    }

    pub fn clear_current_time() {
        WORKER.with(|w| w.borrow_mut().now = None);
    }

    /// The simulated time of the event that's currently running on this thread.
    pub fn current_time() -> Option<EmulatedTime> {
        WORKER.with(|w| w.borrow().now)
    }
}
