use crate::access::{AccessType, ArSelector};
use crate::arch::Arch;
use crate::cpu::CpuContext;
use crate::error::{InstructionFault, ProgramInterrupt};
use crate::tlb::PAGE_BYTEMASK;

/// Full dynamic-address translation for one architecture.
///
/// Called by [`maddr_l`] on a TLB miss. On success the implementation must cache its result with
/// [`CpuContext::install_tlb_entry`] and return the absolute address of `vaddr`.
pub trait Translator<A: Arch> {
    fn logical_to_main(
        &mut self,
        cpu: &mut CpuContext,
        vaddr: A::Vaddr,
        arn: ArSelector,
        acctype: AccessType,
        akey: u8,
        len: usize,
    ) -> Result<u64, ProgramInterrupt>;
}

/// Translate a logical address to an absolute main-storage address.
///
/// Tries the TLB first and falls back to `translator`. With transactional execution enabled the
/// access is then checked against every running transaction; a transactional access that
/// conflicts returns the backed-out transaction as [`InstructionFault::TransactionAbort`].
///
/// Operands that cross a page boundary must be split by the caller; conflict tracking only covers
/// the part of `len` that lies in the page of `vaddr`. A page that lies outside main storage is
/// reported as [`ProgramInterrupt::Addressing`].
#[track_caller]
#[inline]
pub fn maddr_l<A: Arch, T: Translator<A> + ?Sized>(
    cpu: &mut CpuContext,
    translator: &mut T,
    vaddr: A::Vaddr,
    len: usize,
    arn: ArSelector,
    acctype: AccessType,
    akey: u8,
) -> Result<u64, InstructionFault> {
    debug_assert_eq!(A::MODE, cpu.arch());

    let hit = {
        let mut dat = cpu.shared().lock_dat();
        dat.lookup::<A>(vaddr.into(), arn, acctype, akey)
    };

    let maddr = match hit {
        Some(hit) => {
            if acctype.contains(AccessType::CHECK) {
                cpu.set_storkey(hit.storkey);
            }
            hit.maddr
        }
        None => translator.logical_to_main(cpu, vaddr, arn, acctype, akey, len)?,
    };

    if A::HAS_TXF && cpu.txf_enabled() {
        let len = len.min((PAGE_BYTEMASK + 1 - (maddr & PAGE_BYTEMASK)) as usize);
        if !cpu.system().storage().contains(maddr, len) {
            return Err(ProgramInterrupt::Addressing.into());
        }
        cpu.txf_access(maddr, len, arn, acctype)?;
    }
    Ok(maddr)
}
