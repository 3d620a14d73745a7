use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use mfemu_core::CpuId;

use crate::abort::{AbortCause, TxAbort};
use crate::line::LINE_SIZE;
use crate::lock::{Held, LockCounter, TryLock};

/// Original content of one cache line, captured before its first transactional touch.
pub(crate) struct BackoutEntry {
    pub(crate) line: u64,
    pub(crate) data: [u8; LINE_SIZE as usize],
}

pub(crate) struct BackoutLog {
    pub(crate) entries: Vec<BackoutEntry>,
    capacity: usize,
    /// Abort recorded by the CPU that backed this transaction out.
    pub(crate) delayed: Option<TxAbort>,
}

impl BackoutLog {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            delayed: None,
        }
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}

/// Per-CPU transactional bookkeeping reachable from every CPU.
pub(crate) struct TxfSlot {
    cpu: CpuId,
    counter: LockCounter,
    log: UnsafeCell<BackoutLog>,
    /// Code of an abort cause set by another CPU, `0` when none.
    pending: AtomicU16,
    active: AtomicBool,
}

// SAFETY: `log` is only reached through a `LogGuard`, and a `LogGuard` only exists while its
// creator owns `counter` (a held word, or the backed-out marker claimed by the slot's own CPU).
// The lock-counter's acquire/release exchanges order every access to `log`.
unsafe impl Sync for TxfSlot {}

pub(crate) enum SlotLock<'a> {
    Locked(LogGuard<'a>),
    BackedOut,
    Busy,
}

impl TxfSlot {
    pub(crate) fn new(cpu: CpuId, capacity: usize) -> Self {
        Self {
            cpu,
            counter: LockCounter::new(),
            log: UnsafeCell::new(BackoutLog::with_capacity(capacity)),
            pending: AtomicU16::new(0),
            active: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub(crate) fn try_lock(&self) -> SlotLock<'_> {
        match self.counter.try_lock() {
            TryLock::Locked(held) => {
                let guard = LogGuard {
                    slot: self,
                    held,
                    finished: false,
                };
                debug_assert_eq!(guard.entries.len(), held.count() as usize);
                SlotLock::Locked(guard)
            }
            TryLock::BackedOut => SlotLock::BackedOut,
            TryLock::Busy => SlotLock::Busy,
        }
    }

    /// Take over the log of a transaction that another CPU backed out.
    ///
    /// Must only be called by the slot's own CPU.
    pub(crate) fn take_backed_out(&self) -> Option<LogGuard<'_>> {
        self.counter.is_backed_out().then(|| LogGuard {
            slot: self,
            held: Held::MARKER,
            finished: false,
        })
    }

    pub(crate) fn pending(&self) -> Option<AbortCause> {
        AbortCause::from_code(self.pending.load(Ordering::Acquire))
    }

    pub(crate) fn set_pending(&self, cause: AbortCause) {
        self.pending.store(cause.code(), Ordering::Release);
    }

    pub(crate) fn clear_pending(&self) {
        self.pending.store(0, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Number of logged lines, or `None` while some CPU is inside the critical section.
    pub(crate) fn published_len(&self) -> Option<usize> {
        self.counter.count().map(|count| count as usize)
    }
}

/// Exclusive access to a CPU's backout log.
///
/// Dropping the guard publishes the current entry count and unlocks.
pub(crate) struct LogGuard<'a> {
    slot: &'a TxfSlot,
    held: Held,
    finished: bool,
}

impl LogGuard<'_> {
    #[inline]
    pub(crate) fn cpu(&self) -> CpuId {
        self.slot.cpu
    }

    /// Unlock, leaving the backed-out marker for the slot's own CPU to find.
    #[track_caller]
    pub(crate) fn mark_backed_out(mut self) {
        self.finished = true;
        self.slot.counter.mark_backed_out(self.held);
    }
}

impl Deref for LogGuard<'_> {
    type Target = BackoutLog;

    fn deref(&self) -> &BackoutLog {
        // SAFETY: see `unsafe impl Sync for TxfSlot`.
        unsafe { &*self.slot.log.get() }
    }
}

impl DerefMut for LogGuard<'_> {
    fn deref_mut(&mut self) -> &mut BackoutLog {
        // SAFETY: see `unsafe impl Sync for TxfSlot`.
        unsafe { &mut *self.slot.log.get() }
    }
}

impl Drop for LogGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let len = self.entries.len() as u32;
        self.slot.counter.release(self.held, len);
    }
}
