//! A clock for the unit tests. Nothing reads the system time, so a test decides exactly when timers
//! fire.

pub use std::time::Duration;

/// Time since the start of a test.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(Duration);

impl Instant {
    pub const EPOCH: Self = Self(Duration::ZERO);
}

impl std::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::Sub for Instant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        // panic instead of saturating so that a timer running backwards fails the test
        self.0.checked_sub(rhs.0).unwrap()
    }
}

impl crate::util::time::Instant for Instant {
    type Duration = Duration;

    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    fn checked_add(&self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration).map(Self)
    }
}
