use mfemu_core::{CpuId, StorageError};
use mfemu_txf::{TxAbort, TxfConfigError};
use thiserror::Error;

use crate::arch::ArchMode;
use crate::cpu::Facilities;

/// Program interruption raised while translating or accessing guest storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ProgramInterrupt {
    #[error("operation exception")]
    Operation,
    #[error("protection exception")]
    Protection,
    #[error("addressing exception")]
    Addressing,
    #[error("segment-translation exception")]
    SegmentTranslation,
    #[error("page-translation exception")]
    PageTranslation,
    #[error("translation-specification exception")]
    TranslationSpecification,
}

impl ProgramInterrupt {
    /// Architected program-interruption code.
    pub const fn code(self) -> u16 {
        match self {
            ProgramInterrupt::Operation => 0x0001,
            ProgramInterrupt::Protection => 0x0004,
            ProgramInterrupt::Addressing => 0x0005,
            ProgramInterrupt::SegmentTranslation => 0x0010,
            ProgramInterrupt::PageTranslation => 0x0011,
            ProgramInterrupt::TranslationSpecification => 0x0012,
        }
    }
}

/// Everything that ends the current guest instruction early.
///
/// Returned through `?` up to the instruction-dispatch boundary; nothing after the failing
/// call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InstructionFault {
    #[error("program interruption 0x{:04x}: {0}", .0.code())]
    Program(#[from] ProgramInterrupt),
    /// The CPU's transaction was backed out; execution resumes after the outermost TBEGIN.
    #[error(transparent)]
    TransactionAbort(#[from] TxAbort),
}

/// Errors building or reconfiguring a [`crate::System`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Txf(#[from] TxfConfigError),

    #[error("max_cpus must be between 1 and {max}, got {got}")]
    CpuCount { got: usize, max: usize },

    #[error("cpu {cpu} is outside the configured range 0..{max_cpus}")]
    CpuOutOfRange { cpu: CpuId, max_cpus: usize },

    #[error("cpu {0} is already configured")]
    CpuAlreadyConfigured(CpuId),

    #[error("cpu {0} is not configured")]
    CpuNotConfigured(CpuId),

    #[error("{arch} cannot enable facilities {facilities:?}")]
    ArchLacksFacility {
        arch: ArchMode,
        facilities: Facilities,
    },
}
