use core::panic::Location;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use mfemu_core::{logic_error, CpuId, MainStorage, STORKEY_CHANGE, STORKEY_REF};

use crate::abort::{AbortCause, AbortWhy, TxAbort};
use crate::config::{TxfConfig, TxfConfigError};
use crate::hint::RangeHint;
use crate::line::{line_base, lines_spanned, CacheLineTable, LineState, LINE_SHIFT, LINE_SIZE};
use crate::slot::{BackoutEntry, BackoutLog, LogGuard, SlotLock, TxfSlot};
use crate::sync::Backoff;

/// Transactional state private to one CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxfCpu {
    cpu: CpuId,
    /// Transaction nesting depth (`tnd`); `0` outside a transaction.
    depth: u32,
    constrained: bool,
    ntstg: bool,
}

impl TxfCpu {
    pub fn new(cpu: CpuId) -> Self {
        Self {
            cpu,
            depth: 0,
            constrained: false,
            ntstg: false,
        }
    }

    #[inline]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.depth != 0
    }

    #[inline]
    pub fn is_constrained(&self) -> bool {
        self.constrained
    }

    /// Whether the current access belongs to a NONTRANSACTIONAL STORE.
    #[inline]
    pub fn ntstg(&self) -> bool {
        self.ntstg
    }

    pub fn set_ntstg(&mut self, ntstg: bool) {
        self.ntstg = ntstg;
    }
}

/// Machine-wide transactional conflict detection and backout.
pub struct TxfEngine {
    storage: Arc<MainStorage>,
    lines: CacheLineTable,
    hint: RangeHint,
    slots: Box<[TxfSlot]>,
    /// CPUs currently inside a transaction.
    transcpus: AtomicU32,
    config: TxfConfig,
}

impl core::fmt::Debug for TxfEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TxfEngine")
            .field("cpus", &self.slots.len())
            .field("transcpus", &self.transactional_cpus())
            .field("hint", &self.hint.range())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TxfEngine {
    pub fn new(
        storage: Arc<MainStorage>,
        max_cpus: usize,
        config: TxfConfig,
    ) -> Result<Self, TxfConfigError> {
        config.validate()?;
        let lines = CacheLineTable::new(storage.size());
        let slots = (0..max_cpus)
            .map(|cpu| TxfSlot::new(cpu as CpuId, config.backout_capacity))
            .collect();
        Ok(Self {
            storage,
            lines,
            hint: RangeHint::new(),
            slots,
            transcpus: AtomicU32::new(0),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &TxfConfig {
        &self.config
    }

    #[inline]
    pub fn transactional_cpus(&self) -> u32 {
        self.transcpus.load(Ordering::Acquire)
    }

    #[inline]
    pub fn line_state(&self, addr: u64) -> LineState {
        self.lines.state(addr)
    }

    #[inline]
    pub fn hint(&self) -> &RangeHint {
        &self.hint
    }

    /// Lines currently in `cpu`'s backout log, or `None` while the log is locked (including a
    /// transaction that was backed out and awaits its delayed abort).
    pub fn backout_len(&self, cpu: CpuId) -> Option<usize> {
        self.slot(cpu).published_len()
    }

    /// Abort cause set on `cpu` by another CPU and not yet delivered.
    pub fn pending_abort(&self, cpu: CpuId) -> Option<AbortCause> {
        self.slot(cpu).pending()
    }

    /// Whether `cpu` is registered as running a transaction.
    pub fn is_transactional(&self, cpu: CpuId) -> bool {
        self.slot(cpu).is_active()
    }

    #[track_caller]
    pub(crate) fn slot(&self, cpu: CpuId) -> &TxfSlot {
        match self.slots.get(cpu as usize) {
            Some(slot) => slot,
            None => logic_error!(
                "cpu {cpu} has no transactional slot ({} configured)",
                self.slots.len()
            ),
        }
    }

    fn lock_own<'a>(&self, slot: &'a TxfSlot) -> Option<LogGuard<'a>> {
        let mut backoff = Backoff::new(self.config.spin_limit);
        loop {
            match slot.try_lock() {
                SlotLock::Locked(log) => return Some(log),
                SlotLock::BackedOut => return None,
                SlotLock::Busy => {
                    if !backoff.snooze() {
                        logic_error!("cpu {}: backout log stayed busy", slot.cpu());
                    }
                }
            }
        }
    }

    /// Enter a (possibly nested) transaction.
    pub fn begin_transaction(&self, txf: &mut TxfCpu, constrained: bool) {
        if txf.depth == 0 {
            let slot = self.slot(txf.cpu);
            if slot.pending().is_some() {
                logic_error!("cpu {}: undelivered abort at transaction begin", txf.cpu);
            }
            txf.constrained = constrained;
            slot.set_active(true);
            let transcpus = self.transcpus.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::trace!(cpu = txf.cpu, transcpus, constrained, "transaction begin");
        }
        txf.depth += 1;
    }

    /// Leave one nesting level. The outermost level keeps every transactional store and
    /// releases the claimed lines.
    ///
    /// A transaction that was backed out by another CPU reports that abort instead.
    #[track_caller]
    pub fn commit_transaction(&self, txf: &mut TxfCpu) -> Result<(), TxAbort> {
        match txf.depth {
            0 => logic_error!("cpu {}: commit outside a transaction", txf.cpu),
            1 => {}
            _ => {
                txf.depth -= 1;
                return Ok(());
            }
        }

        let slot = self.slot(txf.cpu);
        let Some(mut log) = self.lock_own(slot) else {
            return Err(self.finish_delayed_abort(txf));
        };
        let lines = log.entries.len();
        for entry in log.entries.drain(..) {
            if !self.lines.release(entry.line, txf.cpu) {
                logic_error!(
                    "cpu {}: committed line 0x{:x} was not owned",
                    txf.cpu,
                    entry.line
                );
            }
        }
        drop(log);
        self.end_transaction(txf);
        tracing::trace!(cpu = txf.cpu, lines, "transaction commit");
        Ok(())
    }

    /// Abort the current transaction for a reason outside the conflict engine (program
    /// interruption, TABORT, restricted instruction).
    #[track_caller]
    pub fn abort_transaction(&self, txf: &mut TxfCpu, cause: AbortCause) -> TxAbort {
        let location = Location::caller();
        if !txf.in_transaction() {
            logic_error!("cpu {}: abort outside a transaction", txf.cpu);
        }
        let slot = self.slot(txf.cpu);
        let Some(mut log) = self.lock_own(slot) else {
            return self.finish_delayed_abort(txf);
        };
        self.restore_lines(&mut log);
        drop(log);
        self.end_transaction(txf);
        let abort = TxAbort {
            cause,
            why: AbortWhy::empty(),
            who: txf.cpu,
            location,
        };
        tracing::debug!(cpu = txf.cpu, "transaction aborted: {abort}");
        abort
    }

    /// Claim the lines of a transactional access for `txf`'s transaction.
    ///
    /// On conflict or overflow the whole transaction has been backed out (storage restored,
    /// lines released, depth reset) by the time `Err` is returned.
    #[track_caller]
    pub fn transactional_access(
        &self,
        txf: &mut TxfCpu,
        maddr: u64,
        len: usize,
        write: bool,
    ) -> Result<(), TxAbort> {
        let location = Location::caller();
        if !txf.in_transaction() {
            logic_error!("cpu {}: transactional access outside a transaction", txf.cpu);
        }
        let me = txf.cpu;
        let slot = self.slot(me);

        if slot.pending().is_some() {
            return Err(self.finish_delayed_abort(txf));
        }
        if len == 0 {
            return Ok(());
        }

        let Some(mut log) = self.lock_own(slot) else {
            return Err(self.finish_delayed_abort(txf));
        };

        let desired = if write {
            LineState::Stored(me)
        } else {
            LineState::Fetched(me)
        };
        let first = line_base(maddr);
        let mut cause = None;
        for i in 0..lines_spanned(maddr, len) {
            let line = first + (i << LINE_SHIFT);
            match self.lines.claim(line, desired) {
                Ok(()) => {
                    if log.is_full() {
                        self.lines.release(line, me);
                        cause.get_or_insert(AbortCause::overflow(write));
                    } else {
                        self.save_line(&mut log, me, line);
                    }
                }
                Err(LineState::Fetched(owner)) if owner == me => {
                    if write && !self.lines.upgrade(line, me) {
                        logic_error!("cpu {me}: line 0x{line:x} changed under its owner");
                    }
                }
                Err(LineState::Stored(owner)) if owner == me => {}
                Err(_) => {
                    cause.get_or_insert(AbortCause::conflict(write));
                }
            }
        }

        match cause {
            None => Ok(()),
            Some(cause) => Err(self.backout_immediate(txf, log, cause, location)),
        }
    }

    fn save_line(&self, log: &mut BackoutLog, me: CpuId, line: u64) {
        let mut data = [0u8; LINE_SIZE as usize];
        if let Err(err) = self.storage.read_into(line, &mut data) {
            logic_error!("cpu {me}: cannot save line 0x{line:x}: {err}");
        }
        log.entries.push(BackoutEntry { line, data });

        match self.storage.or_storage_key(line, STORKEY_REF | STORKEY_CHANGE) {
            Ok(key) if key & (STORKEY_REF | STORKEY_CHANGE) != STORKEY_REF | STORKEY_CHANGE => {
                tracing::warn!(
                    cpu = me,
                    transcpus = self.transactional_cpus(),
                    "line 0x{line:x}: storage key 0x{key:02x} lacked reference/change bits at first transactional touch"
                );
            }
            Ok(_) => {}
            Err(err) => logic_error!("cpu {me}: storage key of line 0x{line:x}: {err}"),
        }

        self.hint.extend(line);
        tracing::trace!(cpu = me, "first transactional touch of line 0x{line:x}");
    }

    /// Write every logged line back and release it. Leaves the log empty.
    fn restore_lines(&self, log: &mut LogGuard<'_>) {
        let cpu = log.cpu();
        for entry in log.entries.drain(..) {
            if let Err(err) = self.storage.write_from(entry.line, &entry.data) {
                logic_error!("cpu {cpu}: cannot restore line 0x{:x}: {err}", entry.line);
            }
            if !self.lines.release(entry.line, cpu) {
                logic_error!(
                    "cpu {cpu}: backed-out line 0x{:x} was not owned",
                    entry.line
                );
            }
        }
    }

    fn backout_immediate(
        &self,
        txf: &mut TxfCpu,
        mut log: LogGuard<'_>,
        cause: AbortCause,
        location: &'static Location<'static>,
    ) -> TxAbort {
        let lines = log.entries.len();
        self.restore_lines(&mut log);
        log.delayed = None;
        drop(log);
        self.end_transaction(txf);

        let abort = TxAbort {
            cause,
            why: AbortWhy::CONFLICT,
            who: txf.cpu,
            location,
        };
        tracing::debug!(cpu = txf.cpu, lines, "transaction backed out: {abort}");
        abort
    }

    /// Check a non-transactional access against every running transaction.
    ///
    /// A line stored by another CPU's transaction, or fetched by one while this access writes,
    /// gets that transaction backed out on the spot; its owner receives the abort at its next
    /// transactional access. The access itself then proceeds.
    #[track_caller]
    pub fn nontransactional_access(&self, accessor: CpuId, maddr: u64, len: usize, write: bool) {
        if len == 0 {
            return;
        }
        let Some((lo, hi)) = self.hint.range() else {
            return;
        };
        let first = line_base(maddr);
        let last = line_base(maddr.saturating_add(len as u64 - 1));
        if first > hi || last < lo {
            return;
        }

        let location = Location::caller();
        let end = last.min(hi);
        let mut line = first.max(line_base(lo));
        while line <= end {
            let conflict = match self.lines.state(line) {
                LineState::Stored(owner) if owner != accessor => {
                    Some((owner, AbortCause::StoreConflict))
                }
                LineState::Fetched(owner) if owner != accessor && write => {
                    Some((owner, AbortCause::FetchConflict))
                }
                _ => None,
            };
            if let Some((owner, cause)) = conflict {
                self.backout_delayed(owner, cause, accessor, line, location);
            }
            match line.checked_add(LINE_SIZE) {
                Some(next) => line = next,
                None => break,
            }
        }
    }

    /// Back `owner`'s transaction out on its behalf and leave `cause` pending for it.
    ///
    /// The restore is not airtight against a store the owner already has in flight: the owner's
    /// `transactional_access` returns before the owner writes the operand, so a write that lands
    /// after this restore survives the abort. Closing the window would need the owner to hold its
    /// log across the store itself.
    fn backout_delayed(
        &self,
        owner: CpuId,
        cause: AbortCause,
        who: CpuId,
        line: u64,
        location: &'static Location<'static>,
    ) {
        let slot = self.slot(owner);
        let mut backoff = Backoff::new(self.config.spin_limit);
        let mut log = loop {
            match slot.try_lock() {
                SlotLock::Locked(log) => break log,
                // Someone else already backed it out.
                SlotLock::BackedOut => return,
                SlotLock::Busy => {
                    if !backoff.snooze() {
                        logic_error!("cpu {who}: backout log of cpu {owner} stayed busy");
                    }
                }
            }
        };

        // The owner may have committed or aborted while we waited.
        if self.lines.state(line).owner() != Some(owner) {
            return;
        }

        let lines = log.entries.len();
        self.restore_lines(&mut log);
        let abort = TxAbort {
            cause,
            why: AbortWhy::CONFLICT | AbortWhy::DELAYED_ABORT,
            who,
            location,
        };
        log.delayed = Some(abort);
        slot.set_pending(cause);
        log.mark_backed_out();
        tracing::debug!(cpu = owner, lines, "transaction backed out by cpu {who}: {abort}");
    }

    /// Deliver an abort raised by another CPU to the transaction it backed out.
    fn finish_delayed_abort(&self, txf: &mut TxfCpu) -> TxAbort {
        let slot = self.slot(txf.cpu);
        let mut backoff = Backoff::new(self.config.spin_limit);
        let mut log = loop {
            if let Some(log) = slot.take_backed_out() {
                break log;
            }
            if !backoff.snooze() {
                logic_error!("cpu {}: delayed abort was never published", txf.cpu);
            }
        };
        let Some(abort) = log.delayed.take() else {
            logic_error!("cpu {}: backed out without an abort record", txf.cpu);
        };
        if !log.entries.is_empty() {
            logic_error!("cpu {}: backed-out log still holds lines", txf.cpu);
        }
        slot.clear_pending();
        drop(log);
        self.end_transaction(txf);
        tracing::debug!(cpu = txf.cpu, "delayed abort delivered: {abort}");
        abort
    }

    fn end_transaction(&self, txf: &mut TxfCpu) {
        txf.depth = 0;
        txf.constrained = false;
        txf.ntstg = false;
        self.slot(txf.cpu).set_active(false);

        if self.transcpus.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.hint.reset();
            // A transaction that began meanwhile may already have touched lines.
            if self.transcpus.load(Ordering::Acquire) != 0 {
                self.hint.widen_all();
            }
        }
    }
}
