use bitflags::bitflags;
use mfemu_core::logic_error;

bitflags! {
    /// How storage is being accessed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessType: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        /// Capture the storage key of the page into the CPU's key snapshot on a TLB hit.
        const CHECK = 0x04;
    }
}

impl AccessType {
    /// Access kinds that a TLB entry must have been validated for.
    #[inline]
    pub fn kinds(self) -> AccessType {
        self & (AccessType::READ | AccessType::WRITE)
    }

    #[inline]
    pub fn is_write(self) -> bool {
        self.contains(AccessType::WRITE)
    }
}

/// Which address space a logical address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArSelector {
    /// Access register `n` (0..=15) under the current address-space control.
    Ar(u8),
    /// Access register `n`, forcing access-register translation regardless of the PSW.
    ArMode(u8),
    /// Instruction fetch.
    InstSpace,
    /// Real address (DAT- and ART-table fetches).
    RealAddr,
    Primary,
    Secondary,
    Home,
}

/// Slots of the AEA table; `RealAddr` and `ArMode` have none.
pub(crate) const AEA_SLOTS: usize = 20;
const AEA_PRIMARY: usize = 16;
const AEA_SECONDARY: usize = 17;
const AEA_HOME: usize = 18;
const AEA_INST: usize = 19;

impl ArSelector {
    #[inline]
    #[track_caller]
    pub(crate) fn aea_slot(self) -> Option<usize> {
        match self {
            ArSelector::Ar(n @ 0..=15) => Some(usize::from(n)),
            ArSelector::Ar(n) => logic_error!("access register {n} out of range"),
            ArSelector::Primary => Some(AEA_PRIMARY),
            ArSelector::Secondary => Some(AEA_SECONDARY),
            ArSelector::Home => Some(AEA_HOME),
            ArSelector::InstSpace => Some(AEA_INST),
            ArSelector::RealAddr | ArSelector::ArMode(_) => None,
        }
    }

    /// Whether accesses through this selector follow the non-transactional rules even inside a
    /// transaction.
    #[inline]
    pub fn is_nontransactional(self) -> bool {
        matches!(self, ArSelector::InstSpace | ArSelector::RealAddr)
    }
}

/// Address-space control of the current PSW, which decides how each selector resolves to a
/// control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpaceControl {
    /// DAT off: every selector misses the TLB.
    Real,
    Primary,
    Secondary,
    AccessRegister,
    Home,
}

/// Control register holding the primary address-space designator.
pub const CR_PRIMARY: u8 = 1;
/// Control register holding the secondary address-space designator.
pub const CR_SECONDARY: u8 = 7;
/// Control register holding the home address-space designator.
pub const CR_HOME: u8 = 13;

/// Control register numbers the AEA table assigns under `asc`.
pub(crate) fn aea_layout(asc: AddressSpaceControl) -> [u8; AEA_SLOTS] {
    let mut slots = [0u8; AEA_SLOTS];
    let (ars, inst) = match asc {
        AddressSpaceControl::Real => return slots,
        AddressSpaceControl::Primary => (CR_PRIMARY, CR_PRIMARY),
        AddressSpaceControl::Secondary => (CR_SECONDARY, CR_PRIMARY),
        AddressSpaceControl::Home => (CR_HOME, CR_HOME),
        // AR 0 always means primary; ARs 1-15 resolve once an ALB entry is installed.
        AddressSpaceControl::AccessRegister => (0, CR_PRIMARY),
    };
    slots[..16].fill(ars);
    if asc == AddressSpaceControl::AccessRegister {
        slots[0] = CR_PRIMARY;
    }
    slots[AEA_PRIMARY] = CR_PRIMARY;
    slots[AEA_SECONDARY] = CR_SECONDARY;
    slots[AEA_HOME] = CR_HOME;
    slots[AEA_INST] = inst;
    slots
}
