//! Storage-access core of a multi-CPU mainframe emulator.
//!
//! The workspace is split along the machine's layers:
//! - [`mfemu_core`]: main storage, storage keys and the fatal logic-error path
//! - [`mfemu_txf`]: transactional-execution conflict detection and backout
//! - [`mfemu_dat`]: TLB fast path, cross-CPU invalidation, ASN authorization and the system block
//!
//! The most commonly used items are re-exported at the crate root.

pub use mfemu_core;
pub use mfemu_dat;
pub use mfemu_txf;

pub use mfemu_core::{CpuId, MainStorage, StorageError};
pub use mfemu_dat::{
    authorize_asn, maddr_l, purge_alb_all, purge_tlb_all, purge_tlbe_all, AccessType,
    AddressSpaceControl, ArSelector, Arch, ArchMode, AteMask, ConfigError, CpuContext, CpuTarget,
    Facilities, InstructionFault, ProgramInterrupt, System, SystemConfig, TlbFill, Translator, S370,
    S390, Z900,
};
pub use mfemu_txf::{AbortCause, AbortWhy, TxAbort, TxfConfig};
