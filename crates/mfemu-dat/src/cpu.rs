use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bitflags::bitflags;
use mfemu_core::{cpu_bit, logic_error, CpuId};
use mfemu_txf::{AbortCause, TxAbort, TxfCpu};

use crate::access::{AccessType, AddressSpaceControl, ArSelector};
use crate::arch::{Arch, ArchMode};
use crate::error::{ConfigError, ProgramInterrupt};
use crate::regs::DatRegs;
use crate::stats::TlbStats;
use crate::system::System;
use crate::tlb::TlbFill;

bitflags! {
    /// Installed facilities that change how storage accesses are processed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Facilities: u32 {
        const TRANSACTIONAL_EXECUTION = 0x01;
        const CONSTRAINED_TRANSACTIONAL_EXECUTION = 0x02;
    }
}

/// Host storage assigned to a SIE guest: guest absolute `0..=limit` lives at
/// `origin..=origin + limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SieZone {
    pub origin: u64,
    pub limit: u64,
}

impl SieZone {
    /// Translate a guest absolute address into a host absolute address.
    #[inline]
    pub fn relocate(&self, addr: u64) -> Result<u64, ProgramInterrupt> {
        if addr > self.limit {
            return Err(ProgramInterrupt::Addressing);
        }
        self.origin
            .checked_add(addr)
            .ok_or(ProgramInterrupt::Addressing)
    }
}

/// The part of a CPU that other CPUs can reach through the registry.
#[derive(Debug)]
pub struct CpuShared {
    id: CpuId,
    arch: ArchMode,
    online: AtomicBool,
    dat: Mutex<DatRegs>,
}

impl CpuShared {
    pub(crate) fn new(id: CpuId, arch: ArchMode) -> Self {
        Self {
            id,
            arch,
            online: AtomicBool::new(false),
            dat: Mutex::new(DatRegs::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> CpuId {
        self.id
    }

    #[inline]
    pub fn arch(&self) -> ArchMode {
        self.arch
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Lock the translation state.
    ///
    /// A CPU thread that panicked while holding the lock leaves the TLB in a consistent (if
    /// stale) state, so poisoning is ignored.
    pub fn lock_dat(&self) -> MutexGuard<'_, DatRegs> {
        match self.dat.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Everything one emulated CPU needs to translate and access storage.
///
/// Owned by the CPU's thread. The fields other CPUs may touch (TLB, ALB, online flag) live in
/// the [`CpuShared`] half.
pub struct CpuContext {
    shared: Arc<CpuShared>,
    system: Arc<System>,
    prefix: u64,
    storkey: u8,
    facilities: Facilities,
    sie: Option<SieZone>,
    txf: TxfCpu,
}

impl core::fmt::Debug for CpuContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CpuContext")
            .field("id", &self.shared.id)
            .field("arch", &self.shared.arch)
            .field("prefix", &format_args!("0x{:x}", self.prefix))
            .field("facilities", &self.facilities)
            .field("sie", &self.sie)
            .field("txf", &self.txf)
            .finish_non_exhaustive()
    }
}

impl CpuContext {
    pub(crate) fn new(shared: Arc<CpuShared>, system: Arc<System>) -> Self {
        let txf = TxfCpu::new(shared.id);
        Self {
            shared,
            system,
            prefix: 0,
            storkey: 0,
            facilities: Facilities::empty(),
            sie: None,
            txf,
        }
    }

    #[inline]
    pub fn id(&self) -> CpuId {
        self.shared.id
    }

    #[inline]
    pub fn arch(&self) -> ArchMode {
        self.shared.arch
    }

    /// Membership bit of this CPU (`cpubit`).
    #[inline]
    pub fn cpu_bit(&self) -> u64 {
        cpu_bit(self.shared.id)
    }

    #[inline]
    pub fn system(&self) -> &Arc<System> {
        &self.system
    }

    #[inline]
    pub fn shared(&self) -> &Arc<CpuShared> {
        &self.shared
    }

    #[inline]
    pub fn prefix(&self) -> u64 {
        self.prefix
    }

    pub fn set_prefix(&mut self, prefix: u64) {
        self.prefix = prefix;
    }

    /// Storage key captured by the last `CHECK` access that hit the TLB, or stored by the
    /// translator.
    #[inline]
    pub fn storkey(&self) -> u8 {
        self.storkey
    }

    pub fn set_storkey(&mut self, storkey: u8) {
        self.storkey = storkey;
    }

    #[inline]
    pub fn facilities(&self) -> Facilities {
        self.facilities
    }

    /// Install facilities. Transactional execution needs z/Architecture.
    pub fn enable_facilities(&mut self, facilities: Facilities) -> Result<(), ConfigError> {
        if !facilities.is_empty() && !self.arch().has_txf() {
            return Err(ConfigError::ArchLacksFacility {
                arch: self.arch(),
                facilities,
            });
        }
        self.facilities |= facilities;
        Ok(())
    }

    #[inline]
    pub fn txf_enabled(&self) -> bool {
        self.arch().has_txf()
            && self
                .facilities
                .contains(Facilities::TRANSACTIONAL_EXECUTION)
    }

    #[inline]
    pub fn sie(&self) -> Option<SieZone> {
        self.sie
    }

    /// Run as a SIE guest in `zone` (`None` to leave SIE).
    pub fn set_sie(&mut self, zone: Option<SieZone>) {
        self.sie = zone;
    }

    #[track_caller]
    pub fn control_register(&self, n: usize) -> u64 {
        if n >= 16 {
            logic_error!("cpu {}: no control register {n}", self.id());
        }
        self.shared.lock_dat().cr(n)
    }

    /// Load control register `n` (0..=15).
    #[track_caller]
    pub fn set_control_register(&self, n: usize, value: u64) {
        if n >= 16 {
            logic_error!("cpu {}: no control register {n}", self.id());
        }
        self.shared
            .lock_dat()
            .set_cr(n, value, self.arch().asd_private());
    }

    /// Rebuild the selector table after the PSW's address-space control changed.
    pub fn set_aea_mode(&self, asc: AddressSpaceControl) {
        self.shared.lock_dat().set_aea_mode(asc);
    }

    /// Cache the result of a full translation. Called by [`crate::Translator`] implementations.
    #[track_caller]
    pub fn install_tlb_entry<A: Arch>(&self, vaddr: A::Vaddr, fill: TlbFill) {
        if A::MODE != self.arch() {
            logic_error!(
                "cpu {} runs {} but installed a {} TLB entry",
                self.id(),
                self.arch(),
                A::NAME
            );
        }
        self.shared.lock_dat().install_tlb::<A>(vaddr.into(), fill);
    }

    /// Cache the designator that access-register translation produced for `ar`.
    #[track_caller]
    pub fn install_alb_entry(&self, ar: u8, asd: u64) {
        if !self.arch().has_alb() {
            logic_error!("{} has no ART-lookaside buffer", self.arch());
        }
        self.shared
            .lock_dat()
            .install_alb(ar, asd, self.arch().asd_private());
    }

    /// TLB counters, or `None` when built without the `stats` feature.
    pub fn tlb_stats(&self) -> Option<TlbStats> {
        if cfg!(feature = "stats") {
            Some(self.shared.lock_dat().stats())
        } else {
            None
        }
    }

    pub fn reset_tlb_stats(&self) {
        self.shared.lock_dat().reset_stats();
    }

    #[inline]
    pub fn txf(&self) -> &TxfCpu {
        &self.txf
    }

    /// TBEGIN / TBEGINC.
    pub fn begin_transaction(&mut self, constrained: bool) -> Result<(), ProgramInterrupt> {
        let needed = if constrained {
            Facilities::CONSTRAINED_TRANSACTIONAL_EXECUTION
        } else {
            Facilities::TRANSACTIONAL_EXECUTION
        };
        if !self.txf_enabled() || !self.facilities.contains(needed) {
            return Err(ProgramInterrupt::Operation);
        }
        self.system.txf().begin_transaction(&mut self.txf, constrained);
        Ok(())
    }

    /// TEND.
    #[track_caller]
    pub fn commit_transaction(&mut self) -> Result<(), TxAbort> {
        self.system.txf().commit_transaction(&mut self.txf)
    }

    /// TABORT, or an interruption that ends the transaction.
    #[track_caller]
    pub fn abort_transaction(&mut self, cause: AbortCause) -> TxAbort {
        self.system.txf().abort_transaction(&mut self.txf, cause)
    }

    /// NTSTG brackets its store with this so it bypasses conflict tracking.
    pub fn set_ntstg(&mut self, ntstg: bool) {
        self.txf.set_ntstg(ntstg);
    }

    /// Route a translated access through the conflict engine.
    #[track_caller]
    pub(crate) fn txf_access(
        &mut self,
        maddr: u64,
        len: usize,
        arn: ArSelector,
        acctype: AccessType,
    ) -> Result<(), TxAbort> {
        let write = acctype.is_write();
        let engine = self.system.txf();
        if !arn.is_nontransactional() && self.txf.in_transaction() && !self.txf.ntstg() {
            engine.transactional_access(&mut self.txf, maddr, len, write)
        } else {
            engine.nontransactional_access(self.shared.id, maddr, len, write);
            Ok(())
        }
    }
}

impl Drop for CpuContext {
    fn drop(&mut self) {
        // Don't leave lines claimed by a CPU that no longer exists.
        if self.txf.in_transaction() && !std::thread::panicking() {
            let abort = self
                .system
                .txf()
                .abort_transaction(&mut self.txf, AbortCause::Miscellaneous);
            tracing::debug!(cpu = self.shared.id, "cpu dropped inside a transaction: {abort}");
        }
    }
}
