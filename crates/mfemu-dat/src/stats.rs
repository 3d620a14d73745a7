/// Optional per-CPU TLB statistics.
///
/// When the `stats` feature is disabled, this type contains no fields and
/// [`crate::CpuContext::tlb_stats`] always returns `None`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TlbStats {
    /// Fast-path lookups.
    #[cfg(feature = "stats")]
    pub lookups: u64,
    /// Lookups satisfied by the TLB.
    #[cfg(feature = "stats")]
    pub hits: u64,
    /// Lookups that fell back to a full translation.
    #[cfg(feature = "stats")]
    pub misses: u64,
    /// Whole-TLB purges.
    #[cfg(feature = "stats")]
    pub purges: u64,
    /// Purges of the entries mapping one page frame.
    #[cfg(feature = "stats")]
    pub entry_purges: u64,
    /// ART-lookaside buffer purges.
    #[cfg(feature = "stats")]
    pub alb_purges: u64,
}

macro_rules! stat_getter {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[inline]
            pub fn $name(&self) -> u64 {
                #[cfg(feature = "stats")]
                {
                    self.$name
                }
                #[cfg(not(feature = "stats"))]
                {
                    0
                }
            }
        )*
    };
}

impl TlbStats {
    stat_getter!(
        /// Fast-path lookups.
        lookups,
        /// Lookups satisfied by the TLB.
        hits,
        /// Lookups that fell back to a full translation.
        misses,
        /// Whole-TLB purges.
        purges,
        /// Purges of the entries mapping one page frame.
        entry_purges,
        /// ART-lookaside buffer purges.
        alb_purges,
    );

    #[inline]
    pub(crate) fn record_lookup(&mut self, hit: bool) {
        #[cfg(feature = "stats")]
        {
            self.lookups = self.lookups.wrapping_add(1);
            if hit {
                self.hits = self.hits.wrapping_add(1);
            } else {
                self.misses = self.misses.wrapping_add(1);
            }
        }
        #[cfg(not(feature = "stats"))]
        let _ = hit;
    }

    #[inline]
    pub(crate) fn record_purge(&mut self) {
        #[cfg(feature = "stats")]
        {
            self.purges = self.purges.wrapping_add(1);
        }
    }

    #[inline]
    pub(crate) fn record_entry_purge(&mut self) {
        #[cfg(feature = "stats")]
        {
            self.entry_purges = self.entry_purges.wrapping_add(1);
        }
    }

    #[inline]
    pub(crate) fn record_alb_purge(&mut self) {
        #[cfg(feature = "stats")]
        {
            self.alb_purges = self.alb_purges.wrapping_add(1);
        }
    }
}

#[cfg(all(test, feature = "stats"))]
mod tests {
    use super::*;

    #[test]
    fn lookups_split_into_hits_and_misses() {
        let mut stats = TlbStats::default();
        stats.record_lookup(true);
        stats.record_lookup(false);
        stats.record_lookup(true);
        stats.record_purge();
        assert_eq!(stats.lookups(), 3);
        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.purges(), 1);
        assert_eq!(stats.entry_purges(), 0);
    }
}
