/*!
Values for working with a simulated duration. Use [`EmulatedTime`](super::emulated_time::EmulatedTime)
to represent an instant in time, and `SimulationTime` to represent a time interval.
*/

use std::time::Duration;

use super::emulated_time;

/// A duration in the simulation, with nanosecond granularity.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, PartialOrd, Ord, Hash)]
pub struct SimulationTime(u64);

/// The largest duration that can be added to [`EmulatedTime::SIMULATION_START`] without overflow.
///
/// [`EmulatedTime::SIMULATION_START`]: emulated_time::EmulatedTime::SIMULATION_START
const SIMTIME_MAX: u64 = emulated_time::EMUTIME_MAX - emulated_time::EMUTIME_SIMULATION_START;

const ONE_NANOSECOND: u64 = 1;
const ONE_MICROSECOND: u64 = 1_000;
const ONE_MILLISECOND: u64 = 1_000_000;
const ONE_SECOND: u64 = 1_000_000_000;

impl SimulationTime {
    pub const MAX: SimulationTime = SimulationTime(SIMTIME_MAX);
    pub const ZERO: SimulationTime = SimulationTime(0);
    pub const SECOND: SimulationTime = SimulationTime(ONE_SECOND);
    pub const MILLISECOND: SimulationTime = SimulationTime(ONE_MILLISECOND);
    pub const MICROSECOND: SimulationTime = SimulationTime(ONE_MICROSECOND);
    pub const NANOSECOND: SimulationTime = SimulationTime(ONE_NANOSECOND);

    const fn from_raw(val: u64) -> Option<Self> {
        if val > SIMTIME_MAX {
            return None;
        }
        Some(Self(val))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / ONE_SECOND
    }

    pub fn as_millis(&self) -> u64 {
        self.0 / ONE_MILLISECOND
    }

    pub fn as_micros(&self) -> u64 {
        self.0 / ONE_MICROSECOND
    }

    pub fn as_nanos(&self) -> u128 {
        self.0.into()
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        Self::from_raw(self.0.checked_add(other.0)?)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        Self::from_raw(self.0.checked_sub(other.0)?)
    }

    pub fn checked_mul(self, other: u64) -> Option<Self> {
        Self::from_raw(self.0.checked_mul(other)?)
    }

    pub fn checked_div(self, other: u64) -> Option<Self> {
        Self::from_raw(self.0.checked_div(other)?)
    }

    pub fn checked_rem(self, other: Self) -> Option<Self> {
        Self::from_raw(self.0.checked_rem(other.0)?)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        self.checked_add(other).unwrap_or(Self::MAX)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        self.checked_sub(other).unwrap_or(Self::ZERO)
    }

    pub fn saturating_mul(self, other: u64) -> Self {
        self.checked_mul(other).unwrap_or(Self::MAX)
    }

    pub fn try_from_secs(s: u64) -> Option<Self> {
        Self::SECOND.checked_mul(s)
    }

    pub fn from_secs(s: u64) -> Self {
        Self::try_from_secs(s).unwrap()
    }

    pub fn try_from_millis(s: u64) -> Option<Self> {
        Self::MILLISECOND.checked_mul(s)
    }

    pub fn from_millis(s: u64) -> Self {
        Self::try_from_millis(s).unwrap()
    }

    pub fn try_from_micros(s: u64) -> Option<Self> {
        Self::MICROSECOND.checked_mul(s)
    }

    pub fn from_micros(s: u64) -> Self {
        Self::try_from_micros(s).unwrap()
    }

    pub fn try_from_nanos(s: u64) -> Option<Self> {
        Self::from_raw(s)
    }

    pub fn from_nanos(s: u64) -> Self {
        Self::try_from_nanos(s).unwrap()
    }

    pub fn subsec_millis(&self) -> u32 {
        (self.as_millis() % 1_000) as u32
    }

    pub fn subsec_micros(&self) -> u32 {
        (self.as_micros() % 1_000_000) as u32
    }

    pub fn subsec_nanos(&self) -> u32 {
        (self.0 % ONE_SECOND) as u32
    }
}

impl std::ops::Add<SimulationTime> for SimulationTime {
    type Output = SimulationTime;

    fn add(self, other: Self) -> Self::Output {
        self.checked_add(other).unwrap()
    }
}

impl std::ops::AddAssign<SimulationTime> for SimulationTime {
    fn add_assign(&mut self, rhs: SimulationTime) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub<SimulationTime> for SimulationTime {
    type Output = SimulationTime;

    fn sub(self, other: Self) -> Self::Output {
        self.checked_sub(other).unwrap()
    }
}

impl std::ops::SubAssign<SimulationTime> for SimulationTime {
    fn sub_assign(&mut self, rhs: SimulationTime) {
        *self = *self - rhs;
    }
}

impl std::ops::Mul<u32> for SimulationTime {
    type Output = SimulationTime;

    fn mul(self, other: u32) -> Self::Output {
        self.checked_mul(other.into()).unwrap()
    }
}

impl std::ops::Div<u32> for SimulationTime {
    type Output = SimulationTime;

    fn div(self, other: u32) -> Self::Output {
        self.checked_div(other.into()).unwrap()
    }
}

impl std::ops::Rem<SimulationTime> for SimulationTime {
    type Output = SimulationTime;

    fn rem(self, other: SimulationTime) -> Self::Output {
        self.checked_rem(other).unwrap()
    }
}

impl std::convert::TryFrom<std::time::Duration> for SimulationTime {
    type Error = ();

    fn try_from(val: std::time::Duration) -> Result<Self, Self::Error> {
        let nanos = u64::try_from(val.as_nanos()).map_err(|_| ())?;
        Self::from_raw(nanos).ok_or(())
    }
}

impl std::convert::From<SimulationTime> for std::time::Duration {
    fn from(val: SimulationTime) -> std::time::Duration {
        Duration::from_nanos(val.0)
    }
}

impl std::fmt::Display for SimulationTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09} s", self.as_secs(), self.subsec_nanos())
    }
}

impl tcp::util::time::Duration for SimulationTime {
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
        self.as_millis().into()
    }

    #[inline]
    fn checked_mul(self, rhs: u32) -> Option<Self> {
        self.checked_mul(rhs.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(SimulationTime::from_secs(2), SimulationTime::from_millis(2_000));
        assert_eq!(SimulationTime::from_millis(3), SimulationTime::from_micros(3_000));
        assert_eq!(SimulationTime::from_micros(4), SimulationTime::from_nanos(4_000));

        let t = SimulationTime::from_nanos(5_123_456_789);
        assert_eq!(t.as_secs(), 5);
        assert_eq!(t.as_millis(), 5_123);
        assert_eq!(t.subsec_millis(), 123);
        assert_eq!(t.subsec_micros(), 123_456);
        assert_eq!(t.subsec_nanos(), 123_456_789);
        assert_eq!(t.to_string(), "5.123456789 s");
    }

    #[test]
    fn test_bounds() {
        assert_eq!(SimulationTime::MAX.checked_add(SimulationTime::NANOSECOND), None);
        assert_eq!(SimulationTime::ZERO.checked_sub(SimulationTime::NANOSECOND), None);
        assert_eq!(
            SimulationTime::MAX.saturating_add(SimulationTime::SECOND),
            SimulationTime::MAX
        );
        assert_eq!(
            SimulationTime::SECOND.saturating_sub(SimulationTime::from_secs(2)),
            SimulationTime::ZERO
        );
        assert_eq!(SimulationTime::try_from_secs(u64::MAX), None);
    }

    #[test]
    fn test_duration_conversion() {
        let d = Duration::new(1, 500);
        let t = SimulationTime::try_from(d).unwrap();
        assert_eq!(t, SimulationTime::SECOND + SimulationTime::from_nanos(500));
        assert_eq!(Duration::from(t), d);

        assert!(SimulationTime::try_from(Duration::MAX).is_err());
    }
}
