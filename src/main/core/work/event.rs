use crate::core::support::emulated_time::EmulatedTime;
use crate::host::host::{Host, HostId, HostShared};

use super::task::TaskRef;

/// A task scheduled to run on a host at a specific time.
#[derive(Debug)]
pub struct Event {
    task: TaskRef,
    time: EmulatedTime,
    src_host_id: HostId,
    dst_host_id: HostId,
    src_host_event_id: u64,
}

impl Event {
    /// Create an event that was caused by `src_host` and will run on the host `dst_host_id`. The
    /// source host's event counter gives events with the same time and hosts a deterministic order.
    pub fn new(task: TaskRef, time: EmulatedTime, src_host: &HostShared, dst_host_id: HostId) -> Self {
        Self {
            task,
            time,
            src_host_id: src_host.id(),
            dst_host_id,
            src_host_event_id: src_host.get_new_event_id(),
        }
    }

    pub fn execute(self, host: &mut Host) {
        // make sure we're executing on the correct host
        assert_eq!(self.host_id(), host.id());

        self.task.execute(host);
    }

    pub fn time(&self) -> EmulatedTime {
        self.time
    }

    pub fn host_id(&self) -> HostId {
        self.dst_host_id
    }

    pub fn set_time(&mut self, time: EmulatedTime) {
        self.time = time;
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.task == other.task
            && self.time == other.time
            && self.src_host_id == other.src_host_id
            && self.dst_host_id == other.dst_host_id
            && self.src_host_event_id == other.src_host_event_id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        // sort by event time first, then use other fields we're able to compare
        let cmp = self
            .time
            .cmp(&other.time)
            .then_with(|| self.dst_host_id.cmp(&other.dst_host_id))
            .then_with(|| self.src_host_id.cmp(&other.src_host_id))
            .then_with(|| self.src_host_event_id.cmp(&other.src_host_event_id));

        // all of the above fields were equal, which leads to non-determinism
        if cmp == std::cmp::Ordering::Equal {
            if self.task != other.task {
                // different tasks with nothing left to order them by
                return None;
            }

            assert_eq!(self, other);
        }

        Some(cmp)
    }
}
