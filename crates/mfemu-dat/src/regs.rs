use mfemu_core::logic_error;

use crate::access::{aea_layout, AccessType, AddressSpaceControl, ArSelector, AEA_SLOTS};
use crate::arch::Arch;
use crate::stats::TlbStats;
use crate::tlb::{entry_hits, tlb_index, Tlb, TlbFill, PAGE_BYTEMASK};

/// First control-register slot used for ART-lookaside buffer designators. Slot
/// `CR_ALB_OFFSET + n` holds the designator cached for access register `n`.
pub const CR_ALB_OFFSET: usize = 16;
/// Control registers 0-15 plus one ALB slot per access register.
pub const CR_SLOTS: usize = 32;

/// Translation state of one CPU that other CPUs may have to invalidate.
///
/// Lives behind the CPU's `Mutex`; the owner locks it for every lookup and fill, other CPUs
/// only from the whole-machine purge routines.
#[derive(Debug, Clone)]
pub struct DatRegs {
    cr: [u64; CR_SLOTS],
    /// Control register each selector resolves to; `0` forces a TLB miss.
    aea_ar: [u8; AEA_SLOTS],
    /// Whether the designator in each control register may share common segments.
    aea_common: [bool; CR_SLOTS],
    tlb: Tlb,
    stats: TlbStats,
}

/// What a TLB hit hands back to the fast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TlbHit {
    pub(crate) maddr: u64,
    pub(crate) storkey: u8,
}

impl Default for DatRegs {
    fn default() -> Self {
        Self::new()
    }
}

impl DatRegs {
    pub fn new() -> Self {
        Self {
            cr: [0; CR_SLOTS],
            aea_ar: [0; AEA_SLOTS],
            aea_common: [false; CR_SLOTS],
            tlb: Tlb::new(),
            stats: TlbStats::default(),
        }
    }

    #[inline]
    #[track_caller]
    pub fn cr(&self, n: usize) -> u64 {
        match self.cr.get(n) {
            Some(&value) => value,
            None => logic_error!("control register slot {n} out of range"),
        }
    }

    /// Control register `selector` resolves to; `0` when it cannot use the TLB.
    #[inline]
    pub fn aea_crn(&self, selector: ArSelector) -> u8 {
        match selector.aea_slot() {
            Some(slot) => self.aea_ar[slot],
            None => 0,
        }
    }

    #[inline]
    #[track_caller]
    pub fn aea_common(&self, crn: usize) -> bool {
        match self.aea_common.get(crn) {
            Some(&common) => common,
            None => logic_error!("control register slot {crn} out of range"),
        }
    }

    #[inline]
    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    #[inline]
    pub(crate) fn tlb_mut(&mut self) -> &mut Tlb {
        &mut self.tlb
    }

    #[inline]
    pub fn stats(&self) -> TlbStats {
        self.stats
    }

    pub(crate) fn reset_stats(&mut self) {
        self.stats = TlbStats::default();
    }

    #[track_caller]
    pub(crate) fn set_cr(&mut self, n: usize, value: u64, asd_private: u64) {
        if n >= CR_SLOTS {
            logic_error!("control register slot {n} out of range");
        }
        self.cr[n] = value;
        self.aea_common[n] = value & asd_private == 0;
    }

    pub(crate) fn set_aea_mode(&mut self, asc: AddressSpaceControl) {
        self.aea_ar = aea_layout(asc);
    }

    /// Cache `asd` as the designator of access register `ar` (1..=15).
    #[track_caller]
    pub(crate) fn install_alb(&mut self, ar: u8, asd: u64, asd_private: u64) {
        if !(1..16).contains(&ar) {
            logic_error!("ALB entries exist for access registers 1-15, not {ar}");
        }
        let crn = CR_ALB_OFFSET + usize::from(ar);
        self.set_cr(crn, asd, asd_private);
        self.aea_ar[usize::from(ar)] = crn as u8;
    }

    /// Forget every ALB-derived selector mapping.
    pub(crate) fn purge_alb(&mut self) {
        for crn in self.aea_ar.iter_mut() {
            if usize::from(*crn) >= CR_ALB_OFFSET {
                *crn = 0;
            }
        }
        self.stats.record_alb_purge();
    }

    pub(crate) fn record_purge(&mut self) {
        self.stats.record_purge();
    }

    pub(crate) fn record_entry_purge(&mut self) {
        self.stats.record_entry_purge();
    }

    /// TLB fast path.
    #[inline]
    pub(crate) fn lookup<A: Arch>(
        &mut self,
        vaddr: u64,
        selector: ArSelector,
        acctype: AccessType,
        akey: u8,
    ) -> Option<TlbHit> {
        let crn = match selector {
            ArSelector::ArMode(_) => 0,
            other => usize::from(self.aea_crn(other)),
        };
        let hit = crn != 0 && {
            let entry = self.tlb.entry(tlb_index(vaddr));
            entry_hits(
                entry,
                self.tlb.tag(vaddr, A::TLBID_PAGEMASK),
                self.cr[crn],
                self.aea_common[crn],
                akey,
                acctype,
            )
        };
        self.stats.record_lookup(hit);
        if !hit {
            return None;
        }
        let entry = self.tlb.entry(tlb_index(vaddr));
        Some(TlbHit {
            maddr: entry.main + (vaddr & PAGE_BYTEMASK),
            storkey: entry.storkey,
        })
    }

    pub(crate) fn install_tlb<A: Arch>(&mut self, vaddr: u64, fill: TlbFill) {
        self.tlb.install(vaddr & A::ADDR_MASK, A::TLBID_PAGEMASK, fill);
    }
}
