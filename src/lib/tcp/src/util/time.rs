//! Abstract time types used by the state machine. The state machine never reads a clock itself; it
//! asks its [`Dependencies`](crate::Dependencies) for the current [`Instant`] and schedules timers
//! at future instants. This lets the same code run against the host's simulated clock and, in
//! tests, against a plain counter.
//!
//! ```
//! fn deadline<T: tcp::util::time::Instant>(now: T, timeout: T::Duration) -> T {
//!     now + timeout
//! }
//!
//! use std::time::{Duration, Instant};
//! let now = Instant::now();
//! assert_eq!(deadline(now, Duration::from_secs(1)) - now, Duration::from_secs(1));
//! ```

use std::fmt::Debug;

/// A point in time. Implemented for [`std::time::Instant`].
pub trait Instant:
    'static
    + Sized
    + Copy
    + Debug
    + Send
    + Sync
    + std::ops::Add<Self::Duration, Output = Self>
    + std::ops::Sub<Self, Output = Self::Duration>
    + std::cmp::Ord
    + std::hash::Hash
{
    type Duration: Duration;

    /// See [`std::time::Instant::saturating_duration_since`].
    fn saturating_duration_since(&self, earlier: Self) -> Self::Duration;
    /// See [`std::time::Instant::checked_add`].
    fn checked_add(&self, duration: Self::Duration) -> Option<Self>;
}

/// A span of time. Implemented for [`std::time::Duration`].
pub trait Duration:
    'static
    + Sized
    + Copy
    + Debug
    + Send
    + Sync
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::cmp::Ord
    + std::hash::Hash
{
    const MAX: Self;
    const ZERO: Self;

    fn from_secs(secs: u64) -> Self;
    fn from_millis(millis: u64) -> Self;
    fn as_millis(&self) -> u128;
    /// See [`std::time::Duration::checked_mul`].
    fn checked_mul(self, rhs: u32) -> Option<Self>;

    /// Multiply, clamping at [`Self::MAX`] instead of overflowing.
    fn saturating_mul(self, rhs: u32) -> Self {
        self.checked_mul(rhs).unwrap_or(Self::MAX)
    }
}

impl Instant for std::time::Instant {
    type Duration = std::time::Duration;

    #[inline]
    fn saturating_duration_since(&self, earlier: Self) -> Self::Duration {
        self.saturating_duration_since(earlier)
    }

    #[inline]
    fn checked_add(&self, duration: Self::Duration) -> Option<Self> {
        self.checked_add(duration)
    }
}

impl Duration for std::time::Duration {
    const MAX: Self = Self::MAX;
    const ZERO: Self = Self::ZERO;

    #[inline]
    fn from_secs(secs: u64) -> Self {
        Self::from_secs(secs)
    }

    #[inline]
    fn from_millis(millis: u64) -> Self {
        Self::from_millis(millis)
    }

    #[inline]
    fn as_millis(&self) -> u128 {
        self.as_millis()
    }

    #[inline]
    fn checked_mul(self, rhs: u32) -> Option<Self> {
        self.checked_mul(rhs)
    }
}
