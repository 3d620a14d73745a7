//! Shared building blocks for the mainframe translation and transactional-execution core.
//!
//! - [`MainStorage`]: guest absolute storage shared by every emulated CPU, together with the
//!   per-frame storage keys.
//! - [`CpuId`]: the CPU address used to tag ownership across the machine.
//! - [`fatal`]: the deliberate crash path for coordination bugs.

pub mod fatal;
mod storage;

pub use storage::{
    MainStorage, StorageError, StorageResult, STORKEY_CHANGE, STORKEY_FETCH, STORKEY_KEY,
    STORKEY_REF, STORAGE_KEY_FRAME_SIZE,
};

/// CPU address (`cpuad`) of an emulated processor.
pub type CpuId = u16;

/// Highest number of CPUs a machine can be configured with.
///
/// CPU membership is tracked in a `u64` bitmask (`cpubit = 1 << cpuad`).
pub const MAX_CPUS: usize = 64;

/// Membership bit of a CPU inside the started/online masks.
#[inline]
pub const fn cpu_bit(id: CpuId) -> u64 {
    1u64 << (id as u32 & 63)
}
