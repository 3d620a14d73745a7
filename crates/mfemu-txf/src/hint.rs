use core::sync::atomic::{AtomicU64, Ordering};

const EMPTY_LO: u64 = u64::MAX;

/// Machine-wide bounds of every cache line some active transaction has touched.
///
/// Non-transactional accesses outside `[lo, hi]` cannot conflict with any transaction and skip
/// the per-line scan. The bounds only ever grow while transactions are running; they may be
/// wider than necessary, never narrower.
#[derive(Debug)]
pub struct RangeHint {
    lo: AtomicU64,
    hi: AtomicU64,
}

impl Default for RangeHint {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeHint {
    pub const fn new() -> Self {
        Self {
            lo: AtomicU64::new(EMPTY_LO),
            hi: AtomicU64::new(0),
        }
    }

    /// Include the line at `line` in the range.
    pub fn extend(&self, line: u64) {
        // `hi` first: a reader that sees the new `lo` also sees a `hi` covering it.
        self.hi.fetch_max(line, Ordering::SeqCst);
        self.lo.fetch_min(line, Ordering::SeqCst);
    }

    /// Current `(lo, hi)` line bounds, or `None` when no line is covered.
    pub fn range(&self) -> Option<(u64, u64)> {
        let lo = self.lo.load(Ordering::SeqCst);
        let hi = self.hi.load(Ordering::SeqCst);
        (lo != EMPTY_LO && lo <= hi).then_some((lo, hi))
    }

    /// Whether `[first_line, last_line]` intersects the range.
    pub fn overlaps(&self, first_line: u64, last_line: u64) -> bool {
        self.range()
            .is_some_and(|(lo, hi)| first_line <= hi && last_line >= lo)
    }

    pub fn reset(&self) {
        self.lo.store(EMPTY_LO, Ordering::SeqCst);
        self.hi.store(0, Ordering::SeqCst);
    }

    /// Cover every address.
    pub fn widen_all(&self) {
        self.hi.store(u64::MAX, Ordering::SeqCst);
        self.lo.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_until_extended_then_grows_monotonically() {
        let hint = RangeHint::new();
        assert_eq!(hint.range(), None);
        assert!(!hint.overlaps(0, u64::MAX));

        hint.extend(0x500);
        assert_eq!(hint.range(), Some((0x500, 0x500)));
        hint.extend(0x100);
        hint.extend(0x300);
        assert_eq!(hint.range(), Some((0x100, 0x500)));

        assert!(hint.overlaps(0x000, 0x100));
        assert!(hint.overlaps(0x400, 0x900));
        assert!(!hint.overlaps(0x600, 0x700));

        hint.reset();
        assert_eq!(hint.range(), None);

        hint.widen_all();
        assert!(hint.overlaps(0x1234_5600, 0x1234_5600));
    }
}
