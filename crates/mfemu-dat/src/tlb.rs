use crate::access::AccessType;

/// Number of TLB entries per CPU.
pub const TLBN: usize = 1024;
/// Bits of a TLB tag that carry the epoch id instead of address bits.
pub const TLBID_BYTEMASK: u64 = (1 << 22) - 1;
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_BYTEMASK: u64 = (1 << PAGE_SHIFT) - 1;

/// TLB slot caching the translation of `vaddr`.
#[inline]
pub const fn tlb_index(vaddr: u64) -> usize {
    ((vaddr >> PAGE_SHIFT) & (TLBN as u64 - 1)) as usize
}

/// One cached translation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlbEntry {
    /// Address-space designator that was active when the entry was filled.
    pub asd: u64,
    /// `(vaddr & TLBID_PAGEMASK) | tlb_id` at fill time.
    pub vaddr: u64,
    /// Real page frame from the page-table entry, compared by entry purge.
    pub pte: u64,
    /// Absolute address of the page.
    pub main: u64,
    /// The page lies in a common segment.
    pub common: bool,
    /// Access kinds the translation was validated for.
    pub acc: AccessType,
    /// Access key used for the translation.
    pub skey: u8,
    /// Storage key of the page at fill time.
    pub storkey: u8,
}

/// Result of a full translation, to be cached by [`crate::CpuContext::install_tlb_entry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlbFill {
    pub asd: u64,
    pub pte: u64,
    pub main: u64,
    pub common: bool,
    pub acc: AccessType,
    pub skey: u8,
    pub storkey: u8,
}

/// Whether `entry` may satisfy a lookup.
///
/// All four conditions must hold: same address space (or a common segment the current space
/// shares), matching access key (or key 0), a live tag for this page, and access kinds the entry
/// was validated for.
#[inline]
pub fn entry_hits(
    entry: &TlbEntry,
    tag: u64,
    asd: u64,
    common_allowed: bool,
    akey: u8,
    acctype: AccessType,
) -> bool {
    let kinds = acctype.kinds();
    (asd == entry.asd || (common_allowed && entry.common))
        && (akey == 0 || akey == entry.skey)
        && tag == entry.vaddr
        && !kinds.is_empty()
        && entry.acc.contains(kinds)
}

/// Direct-mapped translation-lookaside buffer.
///
/// Entries are invalidated wholesale by bumping the epoch id that every live tag carries.
#[derive(Clone)]
pub struct Tlb {
    entries: Box<[TlbEntry]>,
    id: u64,
}

impl core::fmt::Debug for Tlb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tlb").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlb {
    pub fn new() -> Self {
        Self {
            entries: vec![TlbEntry::default(); TLBN].into_boxed_slice(),
            id: 1,
        }
    }

    /// Current epoch id. Never zero, so a cleared tag can never match.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn entry(&self, index: usize) -> &TlbEntry {
        &self.entries[index & (TLBN - 1)]
    }

    #[inline]
    pub fn tag(&self, vaddr: u64, pagemask: u64) -> u64 {
        (vaddr & pagemask) | self.id
    }

    pub(crate) fn install(&mut self, vaddr: u64, pagemask: u64, fill: TlbFill) {
        let tag = self.tag(vaddr, pagemask);
        self.entries[tlb_index(vaddr)] = TlbEntry {
            asd: fill.asd,
            vaddr: tag,
            pte: fill.pte,
            main: fill.main & !PAGE_BYTEMASK,
            common: fill.common,
            acc: fill.acc,
            skey: fill.skey,
            storkey: fill.storkey,
        };
    }

    /// Invalidate every entry.
    pub(crate) fn purge(&mut self) {
        self.id += 1;
        if self.id & TLBID_BYTEMASK == 0 {
            for entry in self.entries.iter_mut() {
                entry.vaddr = 0;
            }
            self.id = 1;
        }
    }

    /// Invalidate every entry whose page-table entry maps real frame `pfra`.
    pub(crate) fn purge_frame(&mut self, pfra: u64, frame_mask: u64, pagemask: u64) -> usize {
        let mut purged = 0;
        for entry in self.entries.iter_mut() {
            if entry.pte & frame_mask == pfra {
                entry.vaddr &= pagemask;
                purged += 1;
            }
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGEMASK: u64 = 0x7FC0_0000;

    fn fill(main: u64) -> TlbFill {
        TlbFill {
            asd: 0x1000,
            pte: main,
            main,
            acc: AccessType::READ,
            ..TlbFill::default()
        }
    }

    #[test]
    fn index_uses_the_ten_bits_above_the_page_offset() {
        assert_eq!(tlb_index(0x0000_0fff), 0);
        assert_eq!(tlb_index(0x0000_1000), 1);
        assert_eq!(tlb_index(0x003f_f000), 0x3ff);
        assert_eq!(tlb_index(0x0040_0000), 0);
    }

    #[test]
    fn purge_bumps_the_epoch_and_wraps_by_clearing_tags() {
        let mut tlb = Tlb::new();
        tlb.install(0x0040_2000, PAGEMASK, fill(0x5000));
        let tag = tlb.tag(0x0040_2000, PAGEMASK);
        assert_eq!(tlb.entry(2).vaddr, tag);

        tlb.purge();
        assert_eq!(tlb.id(), 2);
        assert_ne!(tlb.tag(0x0040_2000, PAGEMASK), tlb.entry(2).vaddr);

        tlb.id = TLBID_BYTEMASK;
        tlb.install(0x0040_2000, PAGEMASK, fill(0x5000));
        tlb.purge();
        assert_eq!(tlb.id(), 1);
        assert_eq!(tlb.entry(2).vaddr, 0);
    }

    #[test]
    fn frame_purge_only_touches_matching_entries() {
        let mut tlb = Tlb::new();
        tlb.install(0x1000, PAGEMASK, fill(0x5000));
        tlb.install(0x2000, PAGEMASK, fill(0x6000));

        assert_eq!(tlb.purge_frame(0x5000, 0x7FFF_F000, PAGEMASK), 1);
        assert_eq!(tlb.entry(1).vaddr, 0);
        assert_eq!(tlb.entry(2).vaddr, tlb.tag(0x2000, PAGEMASK));
    }

    #[test]
    fn install_drops_the_byte_offset_of_the_page() {
        let mut tlb = Tlb::new();
        tlb.install(0x3000, PAGEMASK, fill(0x7123));
        assert_eq!(tlb.entry(3).main, 0x7000);
    }
}
