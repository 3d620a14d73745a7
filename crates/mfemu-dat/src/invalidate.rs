//! Whole-machine translation-buffer invalidation.
//!
//! Each routine walks the registry and purges every matching CPU synchronously, locking one
//! CPU's translation state at a time. The requester's own TLB is purged like any other, so the
//! caller must not hold its own `lock_dat()` guard.

use mfemu_core::{logic_error, CpuId};

use crate::cpu::CpuContext;

/// Which CPUs a broadcast reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuTarget {
    /// Every online, started CPU. Requires the interlock.
    All,
    Cpu(CpuId),
}

impl CpuTarget {
    /// CPU address that selects every CPU.
    pub const ALL_CPUS: u16 = 0xFFFF;

    pub const fn from_cpuad(cpuad: u16) -> Self {
        if cpuad == Self::ALL_CPUS {
            CpuTarget::All
        } else {
            CpuTarget::Cpu(cpuad)
        }
    }

    #[inline]
    pub fn selects(self, id: CpuId) -> bool {
        match self {
            CpuTarget::All => true,
            CpuTarget::Cpu(target) => target == id,
        }
    }
}

#[track_caller]
fn require_interlock(cpu: &CpuContext, what: &str) {
    if !cpu.system().interlock().is_held_by(cpu.id()) {
        logic_error!("cpu {}: {what} without holding the interlock", cpu.id());
    }
}

/// Purge the whole TLB of every CPU `target` selects.
#[track_caller]
pub fn purge_tlb_all(cpu: &CpuContext, target: CpuTarget) {
    if target == CpuTarget::All {
        require_interlock(cpu, "purge_tlb_all");
    }
    let purged = cpu.system().cpus().for_each_target(target, |other| {
        let mut dat = other.lock_dat();
        other.arch().purge_tlb(&mut dat);
    });
    tracing::debug!(cpu = cpu.id(), ?target, purged, "purged TLBs");
}

/// Purge, on every CPU `target` selects, the TLB entries built from a page-table entry for
/// real frame `pfra`.
#[track_caller]
pub fn purge_tlbe_all(cpu: &CpuContext, pfra: u64, target: CpuTarget) {
    if target == CpuTarget::All {
        require_interlock(cpu, "purge_tlbe_all");
    }
    let purged = cpu.system().cpus().for_each_target(target, |other| {
        let mut dat = other.lock_dat();
        other.arch().purge_tlbe(&mut dat, pfra);
    });
    tracing::debug!(cpu = cpu.id(), ?target, purged, "purged TLB entries for frame 0x{pfra:x}");
}

/// Purge the ART-lookaside buffer of every online, started CPU.
#[track_caller]
pub fn purge_alb_all(cpu: &CpuContext) {
    require_interlock(cpu, "purge_alb_all");
    let purged = cpu.system().cpus().for_each_target(CpuTarget::All, |other| {
        let mut dat = other.lock_dat();
        other.arch().purge_alb(&mut dat);
    });
    tracing::debug!(cpu = cpu.id(), purged, "purged ALBs");
}
