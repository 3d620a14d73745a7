use core::fmt;

use mfemu_core::logic_error;

use crate::regs::DatRegs;
use crate::tlb::TLBID_BYTEMASK;

/// Architecture a CPU is currently running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchMode {
    /// System/370, 24-bit addressing.
    S370,
    /// ESA/390, 31-bit addressing.
    S390,
    /// z/Architecture, 64-bit addressing.
    Z900,
}

impl ArchMode {
    pub const fn name(self) -> &'static str {
        match self {
            ArchMode::S370 => S370::NAME,
            ArchMode::S390 => S390::NAME,
            ArchMode::Z900 => Z900::NAME,
        }
    }

    pub const fn asd_private(self) -> u64 {
        match self {
            ArchMode::S370 => S370::ASD_PRIVATE,
            ArchMode::S390 => S390::ASD_PRIVATE,
            ArchMode::Z900 => Z900::ASD_PRIVATE,
        }
    }

    pub const fn has_alb(self) -> bool {
        match self {
            ArchMode::S370 => S370::HAS_ALB,
            ArchMode::S390 => S390::HAS_ALB,
            ArchMode::Z900 => Z900::HAS_ALB,
        }
    }

    pub const fn has_txf(self) -> bool {
        match self {
            ArchMode::S370 => S370::HAS_TXF,
            ArchMode::S390 => S390::HAS_TXF,
            ArchMode::Z900 => Z900::HAS_TXF,
        }
    }

    pub(crate) fn purge_tlb(self, regs: &mut DatRegs) {
        match self {
            ArchMode::S370 => S370::purge_tlb(regs),
            ArchMode::S390 => S390::purge_tlb(regs),
            ArchMode::Z900 => Z900::purge_tlb(regs),
        }
    }

    pub(crate) fn purge_tlbe(self, regs: &mut DatRegs, pfra: u64) {
        match self {
            ArchMode::S370 => S370::purge_tlbe(regs, pfra),
            ArchMode::S390 => S390::purge_tlbe(regs, pfra),
            ArchMode::Z900 => Z900::purge_tlbe(regs, pfra),
        }
    }

    #[track_caller]
    pub(crate) fn purge_alb(self, regs: &mut DatRegs) {
        match self {
            ArchMode::S370 => S370::purge_alb(regs),
            ArchMode::S390 => S390::purge_alb(regs),
            ArchMode::Z900 => Z900::purge_alb(regs),
        }
    }
}

impl fmt::Display for ArchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-architecture constants and the architecture-specific purge routines.
///
/// Code that differs between architectures only by address width or mask values is written
/// once, generic over `A: Arch`.
pub trait Arch: Copy + Send + Sync + 'static {
    const MODE: ArchMode;
    const NAME: &'static str;

    /// Logical address as the architecture defines it.
    type Vaddr: Copy + Into<u64> + fmt::Debug + fmt::LowerHex + Send + Sync + 'static;

    /// Valid bits of a logical address.
    const ADDR_MASK: u64;
    /// Address bits kept in a TLB tag: everything above the TLB index.
    const TLBID_PAGEMASK: u64 = Self::ADDR_MASK & !TLBID_BYTEMASK;
    /// Real page-frame bits of a cached page-table entry, as compared by entry purge.
    const PTE_FRAME_MASK: u64;
    /// Bits compared against the prefix register when prefixing an address.
    const PREFIX_MASK: u64;
    /// Private-space control bit of an address-space designator; a designator with it set
    /// never matches common segments.
    const ASD_PRIVATE: u64;
    /// Whether the architecture has access registers (and therefore an ALB).
    const HAS_ALB: bool;
    /// Whether the transactional-execution facility can be enabled.
    const HAS_TXF: bool;

    fn purge_tlb(regs: &mut DatRegs) {
        regs.tlb_mut().purge();
        regs.record_purge();
    }

    fn purge_tlbe(regs: &mut DatRegs, pfra: u64) {
        regs.tlb_mut()
            .purge_frame(pfra, Self::PTE_FRAME_MASK, Self::TLBID_PAGEMASK);
        regs.record_entry_purge();
    }

    #[track_caller]
    fn purge_alb(regs: &mut DatRegs) {
        if !Self::HAS_ALB {
            logic_error!("{} has no ART-lookaside buffer", Self::NAME);
        }
        regs.purge_alb();
    }

    /// Apply prefixing to a real address.
    #[inline]
    fn apply_prefixing(addr: u64, prefix: u64) -> u64 {
        let page = addr & Self::PREFIX_MASK;
        if page == 0 || page == prefix {
            addr ^ prefix
        } else {
            addr
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct S370;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct S390;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Z900;

impl Arch for S370 {
    const MODE: ArchMode = ArchMode::S370;
    const NAME: &'static str = "S/370";
    type Vaddr = u32;
    const ADDR_MASK: u64 = 0x00FF_FFFF;
    const PTE_FRAME_MASK: u64 = 0x00FF_F000;
    const PREFIX_MASK: u64 = 0x7FFF_F000;
    const ASD_PRIVATE: u64 = 0;
    const HAS_ALB: bool = false;
    const HAS_TXF: bool = false;
}

impl Arch for S390 {
    const MODE: ArchMode = ArchMode::S390;
    const NAME: &'static str = "ESA/390";
    type Vaddr = u32;
    const ADDR_MASK: u64 = 0x7FFF_FFFF;
    const PTE_FRAME_MASK: u64 = 0x7FFF_F000;
    const PREFIX_MASK: u64 = 0x7FFF_F000;
    const ASD_PRIVATE: u64 = 0x0000_0100;
    const HAS_ALB: bool = true;
    const HAS_TXF: bool = false;
}

impl Arch for Z900 {
    const MODE: ArchMode = ArchMode::Z900;
    const NAME: &'static str = "z/Arch";
    type Vaddr = u64;
    const ADDR_MASK: u64 = u64::MAX;
    const PTE_FRAME_MASK: u64 = 0xFFFF_FFFF_FFFF_F000;
    const PREFIX_MASK: u64 = 0xFFFF_FFFF_FFFF_E000;
    const ASD_PRIVATE: u64 = 0x0000_0100;
    const HAS_ALB: bool = true;
    const HAS_TXF: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_masks_keep_only_bits_above_the_tlb_index() {
        assert_eq!(S370::TLBID_PAGEMASK, 0x00C0_0000);
        assert_eq!(S390::TLBID_PAGEMASK, 0x7FC0_0000);
        assert_eq!(Z900::TLBID_PAGEMASK, 0xFFFF_FFFF_FFC0_0000);
    }

    #[test]
    fn prefixing_swaps_page_zero_and_the_prefix_area() {
        let prefix = 0x0003_0000;
        assert_eq!(S390::apply_prefixing(0x0000_0123, prefix), 0x0003_0123);
        assert_eq!(S390::apply_prefixing(0x0003_0123, prefix), 0x0000_0123);
        assert_eq!(S390::apply_prefixing(0x0004_0123, prefix), 0x0004_0123);

        // z/Architecture prefixes an 8K area.
        assert_eq!(Z900::apply_prefixing(0x1ff0, prefix), 0x0003_1ff0);
        assert_eq!(S390::apply_prefixing(0x1ff0, prefix), 0x1ff0);
    }

    #[test]
    fn mode_dispatch_matches_the_marker_types() {
        assert!(!ArchMode::S370.has_alb());
        assert!(ArchMode::S390.has_alb());
        assert!(ArchMode::Z900.has_txf());
        assert!(!ArchMode::S390.has_txf());
        assert_eq!(ArchMode::Z900.to_string(), "z/Arch");
        assert_eq!(ArchMode::S370.asd_private(), 0);
    }
}
