use mfemu_core::STORKEY_REF;

use crate::arch::Arch;
use crate::cpu::CpuContext;
use crate::error::ProgramInterrupt;

/// Authority-table origin in ASTE word 0.
pub const ASTE0_ATO: u32 = 0x7FFF_FFFC;
/// Authority-table length in ASTE word 1.
pub const ASTE1_ATL: u32 = 0x0000_FFF0;

/// Which authority bit of an authority-table entry to test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AteMask {
    Primary = 0x80,
    Secondary = 0x40,
}

/// Check authorization index `ax` against the authority table of the address space described
/// by `aste`.
///
/// `Ok(true)` when the selected authority bit is set, `Ok(false)` when it is clear or `ax` lies
/// beyond the table. The table byte's reference bit is set as a side effect.
pub fn authorize_asn<A: Arch>(
    ax: u16,
    aste: &[u32; 16],
    mask: AteMask,
    cpu: &CpuContext,
) -> Result<bool, ProgramInterrupt> {
    debug_assert_eq!(A::MODE, cpu.arch());

    if u32::from(ax & 0xFFF0) > aste[1] & ASTE1_ATL {
        return Ok(false);
    }

    // Four 2-bit entries per byte.
    let storage = cpu.system().storage();
    let ato = (u64::from(aste[0] & ASTE0_ATO) + u64::from(ax >> 2)) & 0x7FFF_FFFF;
    if ato > storage.limit() {
        return Err(ProgramInterrupt::Addressing);
    }

    let mut addr = A::apply_prefixing(ato, cpu.prefix());
    if let Some(zone) = cpu.sie() {
        addr = zone.relocate(addr)?;
    }

    let ate = storage
        .read_u8(addr)
        .map_err(|_| ProgramInterrupt::Addressing)?;
    storage
        .or_storage_key(addr, STORKEY_REF)
        .map_err(|_| ProgramInterrupt::Addressing)?;

    let ate = ate << ((ax & 3) * 2);
    Ok(ate & mask as u8 != 0)
}
