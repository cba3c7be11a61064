/*!
Deals with instances of time in a simulation.
*/

use std::sync::atomic::{AtomicU64, Ordering};

use super::simulation_time::SimulationTime;

/// An instant in time (analogous to [`std::time::Instant`]) in the simulation. Simulations start at
/// 2000-01-01 so that applications see a plausible wall-clock time.
#[derive(Copy, Clone, Eq, PartialEq, Debug, PartialOrd, Ord, Hash)]
pub struct EmulatedTime(u64);

pub const SIMULATION_START_SEC: u64 = 946684800u64;

pub(super) const EMUTIME_MAX: u64 = u64::MAX - 1;
pub(super) const EMUTIME_SIMULATION_START: u64 = SIMULATION_START_SEC * 1_000_000_000u64;

impl EmulatedTime {
    /// The start time of the simulation: 00:00:00 UTC on 1 January 2000.
    pub const SIMULATION_START: Self = Self(EMUTIME_SIMULATION_START);
    pub const UNIX_EPOCH: Self = Self(0);

    pub const MAX: Self = Self(EMUTIME_MAX);
    pub const MIN: Self = Self(0);

    /// Get the instant corresponding to `val` time units since the simulation start.
    pub fn from_abs_simtime(val: SimulationTime) -> Self {
        Self::SIMULATION_START + val
    }

    /// Convert to the duration since the simulation start.
    pub fn to_abs_simtime(self) -> SimulationTime {
        self.duration_since(&Self::SIMULATION_START)
    }

    /// Returns the duration since `earlier`, or panics if `earlier` is after `self`.
    pub fn duration_since(&self, earlier: &EmulatedTime) -> SimulationTime {
        self.checked_duration_since(earlier).unwrap()
    }

    /// Returns the duration since `earlier`, or `None` if `earlier` is after `self`.
    pub fn checked_duration_since(&self, earlier: &EmulatedTime) -> Option<SimulationTime> {
        SimulationTime::try_from_nanos(self.0.checked_sub(earlier.0)?)
    }

    /// Returns the duration since `earlier`, or 0 if `earlier` is after `self`.
    pub fn saturating_duration_since(&self, earlier: &EmulatedTime) -> SimulationTime {
        self.checked_duration_since(earlier)
            .unwrap_or(SimulationTime::ZERO)
    }

    pub fn checked_add(&self, duration: SimulationTime) -> Option<EmulatedTime> {
        let sum = self.0.checked_add(u64::try_from(duration.as_nanos()).ok()?)?;
        (sum <= EMUTIME_MAX).then_some(Self(sum))
    }

    pub fn checked_sub(&self, duration: SimulationTime) -> Option<EmulatedTime> {
        Some(Self(self.0.checked_sub(u64::try_from(duration.as_nanos()).ok()?)?))
    }

    pub fn saturating_add(&self, duration: SimulationTime) -> EmulatedTime {
        self.checked_add(duration).unwrap_or(EmulatedTime::MAX)
    }

    pub fn saturating_sub(&self, duration: SimulationTime) -> EmulatedTime {
        self.checked_sub(duration)
            .unwrap_or(EmulatedTime::SIMULATION_START)
    }
}

impl std::ops::Add<SimulationTime> for EmulatedTime {
    type Output = EmulatedTime;

    fn add(self, other: SimulationTime) -> Self {
        self.checked_add(other).unwrap()
    }
}

impl std::ops::AddAssign<SimulationTime> for EmulatedTime {
    fn add_assign(&mut self, rhs: SimulationTime) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub<SimulationTime> for EmulatedTime {
    type Output = EmulatedTime;

    fn sub(self, other: SimulationTime) -> Self {
        self.checked_sub(other).unwrap()
    }
}

impl std::ops::Sub<EmulatedTime> for EmulatedTime {
    type Output = SimulationTime;

    fn sub(self, other: EmulatedTime) -> Self::Output {
        self.duration_since(&other)
    }
}

impl tcp::util::time::Instant for EmulatedTime {
    type Duration = SimulationTime;

    #[inline]
    fn saturating_duration_since(&self, earlier: Self) -> Self::Duration {
        self.saturating_duration_since(&earlier)
    }

    #[inline]
    fn checked_add(&self, duration: Self::Duration) -> Option<Self> {
        self.checked_add(duration)
    }
}

/// An [`EmulatedTime`] that can be shared between threads.
#[derive(Debug)]
pub struct AtomicEmulatedTime(AtomicU64);

impl AtomicEmulatedTime {
    pub fn new(t: EmulatedTime) -> Self {
        Self(AtomicU64::new(t.0))
    }

    pub fn load(&self, order: Ordering) -> EmulatedTime {
        EmulatedTime(self.0.load(order))
    }

    pub fn store(&self, val: EmulatedTime, order: Ordering) {
        self.0.store(val.0, order)
    }
}
