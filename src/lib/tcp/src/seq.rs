/// A sequence number. The wrapper keeps sequence arithmetic modulo 2<sup>32</sup> and stops it from
/// being mixed up with ordinary `u32` arithmetic.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Seq(u32);

// There's no total order on sequence numbers modulo 2^32, so comparisons go through the explicit
// `is_before`/`is_after` helpers which assume the two values are less than 2^31 apart.
static_assertions::assert_not_impl_any!(Seq: PartialOrd, Ord, From<u32>, std::ops::Deref);

impl Seq {
    #[inline]
    pub fn new(x: u32) -> Self {
        Self(x)
    }

    /// Returns `true` if `self` comes strictly before `other`.
    #[inline]
    pub fn is_before(self, other: Self) -> bool {
        (other.0.wrapping_sub(self.0) as i32) > 0
    }

    /// Returns `true` if `self` comes strictly after `other`.
    #[inline]
    pub fn is_after(self, other: Self) -> bool {
        other.is_before(self)
    }

    /// The later of two sequence numbers.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        if self.is_before(other) {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Debug for Seq {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Seq> for u32 {
    #[inline]
    fn from(x: Seq) -> Self {
        x.0
    }
}

impl std::ops::Add<u32> for Seq {
    type Output = Self;

    fn add(self, offset: u32) -> Self::Output {
        Self::new(self.0.wrapping_add(offset))
    }
}

impl std::ops::Sub<u32> for Seq {
    type Output = Self;

    fn sub(self, offset: u32) -> Self::Output {
        Self::new(self.0.wrapping_sub(offset))
    }
}

/// The forward distance from `other` to `self`.
impl std::ops::Sub for Seq {
    type Output = u32;

    fn sub(self, other: Self) -> Self::Output {
        self.0.wrapping_sub(other.0)
    }
}

impl std::ops::AddAssign<u32> for Seq {
    fn add_assign(&mut self, offset: u32) {
        self.0 = self.0.wrapping_add(offset);
    }
}

/// A half-open range `[start, end)` of sequence numbers. The range may wrap past `u32::MAX`.
#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) struct SeqRange {
    pub start: Seq,
    pub end: Seq,
}

impl std::fmt::Debug for SeqRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}..{:?}", self.start, self.end)
    }
}

impl SeqRange {
    #[inline]
    pub fn new(start: Seq, end: Seq) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn with_len(start: Seq, len: u32) -> Self {
        Self::new(start, start + len)
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn contains(&self, seq: Seq) -> bool {
        seq - self.start < self.len()
    }

    /// Clip `self` so that it lies within `bounds`. Returns `None` if no part of `self` lies within
    /// `bounds`. Both ranges are assumed to be less than 2<sup>31</sup> long and close to each
    /// other, which holds for any segment compared against a receive window.
    pub fn clip_to(&self, bounds: &Self) -> Option<Self> {
        let start = if self.start.is_before(bounds.start) {
            bounds.start
        } else {
            self.start
        };
        let end = if self.end.is_after(bounds.end) {
            bounds.end
        } else {
            self.end
        };

        if start.is_before(end) {
            Some(Self::new(start, end))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(x: u32) -> Seq {
        Seq::new(x)
    }

    fn range(start: u32, end: u32) -> SeqRange {
        SeqRange::new(seq(start), seq(end))
    }

    #[test]
    fn test_ordering_across_wrap() {
        assert!(seq(1).is_before(seq(2)));
        assert!(!seq(2).is_before(seq(2)));
        assert!(seq(u32::MAX).is_before(seq(3)));
        assert!(seq(3).is_after(seq(u32::MAX)));
        assert_eq!(seq(u32::MAX - 1).max(seq(4)), seq(4));
        assert_eq!(seq(10).max(seq(9)), seq(10));
    }

    #[test]
    fn test_arithmetic_wraps() {
        assert_eq!(seq(u32::MAX) + 2, seq(1));
        assert_eq!(seq(1) - 2, seq(u32::MAX));
        assert_eq!(seq(1) - seq(u32::MAX), 2);

        let mut x = seq(u32::MAX);
        x += 1;
        assert_eq!(u32::from(x), 0);
    }

    #[test]
    fn test_range_contains() {
        for offset in [0, 1_000, u32::MAX - 2, u32::MAX] {
            let r = SeqRange::with_len(seq(offset), 3);
            assert_eq!(r.len(), 3);
            assert!(r.contains(seq(offset)));
            assert!(r.contains(seq(offset) + 2));
            assert!(!r.contains(seq(offset) + 3));
            assert!(!r.contains(seq(offset) - 1));
        }

        assert!(range(5, 5).is_empty());
        assert!(!range(5, 5).contains(seq(5)));
    }

    #[test]
    fn test_clip_to() {
        let window = range(100, 200);

        // fully inside
        assert_eq!(range(120, 130).clip_to(&window), Some(range(120, 130)));
        // overlaps the left edge
        assert_eq!(range(90, 110).clip_to(&window), Some(range(100, 110)));
        // overlaps the right edge
        assert_eq!(range(190, 250).clip_to(&window), Some(range(190, 200)));
        // entirely before or after
        assert_eq!(range(10, 100).clip_to(&window), None);
        assert_eq!(range(200, 210).clip_to(&window), None);

        // a window straddling the wrap point
        let window = SeqRange::with_len(seq(u32::MAX - 4), 10);
        assert_eq!(
            range(u32::MAX - 10, 2).clip_to(&window),
            Some(range(u32::MAX - 4, 2))
        );
    }
}
