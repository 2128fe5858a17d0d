//! Atomic bit-set for state shared between transfer tasks.

use std::sync::atomic::{AtomicU32, Ordering};

/// A lock-free set of bit flags.
///
/// Flags are plain `u32` masks; a caller defines its own named constants and
/// wraps the raw queries in predicate accessors.
#[derive(Debug, Default)]
pub struct BitFlag(AtomicU32);

impl BitFlag {
    /// Creates a bit-set with the given flags already set.
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self(AtomicU32::new(initial))
    }

    /// Returns true if any bit of `mask` is set.
    #[must_use]
    pub fn has(&self, mask: u32) -> bool {
        self.0.load(Ordering::SeqCst) & mask != 0
    }

    /// Sets the bits of `mask`, returning true if none of them were set before.
    pub fn set(&self, mask: u32) -> bool {
        self.0.fetch_or(mask, Ordering::SeqCst) & mask == 0
    }

    /// Clears the bits of `mask`.
    pub fn unset(&self, mask: u32) {
        self.0.fetch_and(!mask, Ordering::SeqCst);
    }

    /// Returns the raw bits.
    #[must_use]
    pub fn bits(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: u32 = 1;
    const B: u32 = 1 << 1;

    #[test]
    fn test_set_reports_first_transition_only() {
        let flag = BitFlag::default();
        assert!(flag.set(A));
        assert!(!flag.set(A), "second set of the same bit is not a transition");
        assert!(flag.has(A));
        assert!(!flag.has(B));
    }

    #[test]
    fn test_unset_clears_only_requested_bits() {
        let flag = BitFlag::new(A | B);
        flag.unset(A);
        assert!(!flag.has(A));
        assert!(flag.has(B));
        assert_eq!(flag.bits(), B);
    }
}
