//! Flow-control credit.

use crate::frame::MAX_REQUEST_N;

/// Messages one side may still send (or receive) on a direction.
///
/// Grants accumulate and saturate at [`MAX_REQUEST_N`], which means
/// unbounded: once reached, consuming no longer decrements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Credit(u32);

impl Credit {
    /// Unbounded credit.
    pub const UNBOUNDED: Self = Self(MAX_REQUEST_N);

    /// Credit of `n` units (clamped to unbounded).
    #[must_use]
    pub const fn new(n: u32) -> Self {
        if n >= MAX_REQUEST_N {
            Self::UNBOUNDED
        } else {
            Self(n)
        }
    }

    /// Units currently available.
    #[must_use]
    pub const fn available(self) -> u32 {
        self.0
    }

    /// True once granted [`MAX_REQUEST_N`] in total.
    #[must_use]
    pub const fn is_unbounded(self) -> bool {
        self.0 == MAX_REQUEST_N
    }

    /// Add `n` units, saturating.
    pub const fn grant(&mut self, n: u32) {
        let sum = self.0.saturating_add(n);
        self.0 = if sum > MAX_REQUEST_N { MAX_REQUEST_N } else { sum };
    }

    /// Take one unit; false when none is available.
    pub const fn try_consume(&mut self) -> bool {
        if self.is_unbounded() {
            return true;
        }
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_until_empty() {
        let mut credit = Credit::new(2);
        assert!(credit.try_consume());
        assert!(credit.try_consume());
        assert!(!credit.try_consume());
        assert_eq!(credit.available(), 0);

        credit.grant(1);
        assert!(credit.try_consume());
    }

    #[test]
    fn test_unbounded_never_decrements() {
        let mut credit = Credit::new(10);
        credit.grant(MAX_REQUEST_N);
        assert!(credit.is_unbounded());

        for _ in 0..1000 {
            assert!(credit.try_consume());
        }
        assert_eq!(credit, Credit::UNBOUNDED);
    }

    #[test]
    fn test_new_clamps() {
        assert_eq!(Credit::new(u32::MAX), Credit::UNBOUNDED);
        assert_eq!(Credit::default().available(), 0);
    }
}
