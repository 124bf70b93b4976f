//! # Two-Word Timestamps
//!
//! **NO NATIVE 64-BIT ARITHMETIC ON TIMES**
//!
//! Deferred-free expiry times are 64-bit values kept as two 32-bit words so the
//! same arena layout works on targets without native 64-bit math.
//!
//! ## Why Not Truncate?
//!
//! A 32-bit microsecond clock wraps after ~71 minutes. Past that point a
//! truncated expiry compares as "already elapsed" and slots get reclaimed early.
//! Every operation here carries between words explicitly instead.

use std::cmp::Ordering;
use std::fmt;

use bytemuck::{Pod, Zeroable};

/// A 64-bit logical time split into high and low 32-bit words.
///
/// The unit is whatever the caller's clock counts (typically microseconds).
///
/// # Example
///
/// ```
/// use slotarena_core::Timestamp;
///
/// let now = Timestamp::new(0, u32::MAX);
/// let later = now.saturating_add(Timestamp::from_low(1));
/// assert_eq!(later, Timestamp::new(1, 0));
/// assert!(later > now);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Timestamp {
    /// Upper 32 bits.
    pub high: u32,
    /// Lower 32 bits.
    pub low: u32,
}

impl Timestamp {
    /// Time zero.
    pub const ZERO: Self = Self::new(0, 0);

    /// Largest representable time. Expiries saturate here.
    pub const MAX: Self = Self::new(u32::MAX, u32::MAX);

    /// Creates a timestamp from its two words.
    #[inline]
    #[must_use]
    pub const fn new(high: u32, low: u32) -> Self {
        Self { high, low }
    }

    /// Creates a timestamp below 2^32.
    #[inline]
    #[must_use]
    pub const fn from_low(low: u32) -> Self {
        Self::new(0, low)
    }

    /// Splits a native `u64` into words. Conversion only, no arithmetic.
    #[inline]
    #[must_use]
    pub const fn from_u64(value: u64) -> Self {
        Self::new((value >> 32) as u32, value as u32)
    }

    /// Joins the words into a native `u64`. Conversion only, no arithmetic.
    #[inline]
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        ((self.high as u64) << 32) | self.low as u64
    }

    /// Adds with carry from the low word into the high word.
    ///
    /// Returns the wrapped sum and whether the high word overflowed.
    #[inline]
    #[must_use]
    pub const fn overflowing_add(self, rhs: Self) -> (Self, bool) {
        let (low, carry) = self.low.overflowing_add(rhs.low);
        let (high, overflow_a) = self.high.overflowing_add(rhs.high);
        let (high, overflow_b) = high.overflowing_add(carry as u32);
        (Self::new(high, low), overflow_a || overflow_b)
    }

    /// Subtracts with a borrow from the high word into the low word.
    ///
    /// Returns the wrapped difference and whether the result went below zero.
    #[inline]
    #[must_use]
    pub const fn overflowing_sub(self, rhs: Self) -> (Self, bool) {
        let (low, borrow) = self.low.overflowing_sub(rhs.low);
        let (high, underflow_a) = self.high.overflowing_sub(rhs.high);
        let (high, underflow_b) = high.overflowing_sub(borrow as u32);
        (Self::new(high, low), underflow_a || underflow_b)
    }

    /// Checked addition.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.overflowing_add(rhs) {
            (sum, false) => Some(sum),
            (_, true) => None,
        }
    }

    /// Checked subtraction.
    #[inline]
    #[must_use]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.overflowing_sub(rhs) {
            (diff, false) => Some(diff),
            (_, true) => None,
        }
    }

    /// Addition clamped at [`Timestamp::MAX`].
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        match self.checked_add(rhs) {
            Some(sum) => sum,
            None => Self::MAX,
        }
    }

    /// Subtraction clamped at [`Timestamp::ZERO`].
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        match self.checked_sub(rhs) {
            Some(diff) => diff,
            None => Self::ZERO,
        }
    }

    /// Two-word magnitude comparison: high words first, then low words.
    #[inline]
    #[must_use]
    pub const fn compare(self, rhs: Self) -> Ordering {
        if self.high < rhs.high {
            Ordering::Less
        } else if self.high > rhs.high {
            Ordering::Greater
        } else if self.low < rhs.low {
            Ordering::Less
        } else if self.low > rhs.low {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    /// Returns `true` once `now` has reached this expiry.
    #[inline]
    #[must_use]
    pub const fn has_elapsed(self, now: Self) -> bool {
        !matches!(self.compare(now), Ordering::Greater)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(*other)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.to_u64()
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({:#010x}:{:#010x})", self.high, self.low)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_carries_into_high_word() {
        let t = Timestamp::new(0, u32::MAX);
        assert_eq!(t.checked_add(Timestamp::from_low(1)), Some(Timestamp::new(1, 0)));
        assert_eq!(
            Timestamp::new(3, 0xFFFF_FFF0).checked_add(Timestamp::new(1, 0x20)),
            Some(Timestamp::new(5, 0x10))
        );
    }

    #[test]
    fn test_add_overflow() {
        assert_eq!(Timestamp::MAX.checked_add(Timestamp::from_low(1)), None);
        assert_eq!(Timestamp::MAX.saturating_add(Timestamp::from_low(1)), Timestamp::MAX);
        // Carry alone pushes the high word over.
        assert_eq!(
            Timestamp::new(u32::MAX, u32::MAX).overflowing_add(Timestamp::from_low(1)),
            (Timestamp::ZERO, true)
        );
    }

    #[test]
    fn test_sub_borrows_from_high_word() {
        let t = Timestamp::new(1, 0);
        assert_eq!(t.checked_sub(Timestamp::from_low(1)), Some(Timestamp::new(0, u32::MAX)));
        assert_eq!(Timestamp::from_low(1).checked_sub(Timestamp::from_low(2)), None);
        assert_eq!(Timestamp::new(0, 5).saturating_sub(Timestamp::new(1, 0)), Timestamp::ZERO);
    }

    #[test]
    fn test_compare_uses_both_words() {
        // Low word alone would order these the wrong way round.
        let early = Timestamp::new(0, 0xFFFF_FFFF);
        let late = Timestamp::new(1, 0);
        assert!(early < late);
        assert_eq!(late.compare(early), Ordering::Greater);
        assert_eq!(late.compare(late), Ordering::Equal);
    }

    #[test]
    fn test_has_elapsed() {
        let expiry = Timestamp::new(2, 100);
        assert!(!expiry.has_elapsed(Timestamp::new(2, 99)));
        assert!(expiry.has_elapsed(Timestamp::new(2, 100)));
        assert!(expiry.has_elapsed(Timestamp::new(3, 0)));
    }

    #[test]
    fn test_matches_native_arithmetic_past_32_bits() {
        // ~71 minutes of microseconds plus change.
        let now = Timestamp::from(4_294_967_000_u64);
        let ttl = Timestamp::from(5_000_u64);
        assert_eq!(u64::from(now.saturating_add(ttl)), 4_294_972_000);
        assert_eq!(u64::from(now.saturating_add(ttl).saturating_sub(now)), 5_000);
    }
}
