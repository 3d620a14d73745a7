use core::sync::atomic::{AtomicU16, Ordering};

use mfemu_core::{logic_error, CpuId};

/// Conflict-detection granule.
pub const LINE_SIZE: u64 = 256;
pub const LINE_SHIFT: u32 = 8;

const STATUS_NOT_USED: u16 = 0;
const STATUS_FETCHED: u16 = 0x4000;
const STATUS_STORED: u16 = 0x8000;
const STATUS_CPU_MASK: u16 = 0x3FFF;

/// Address of the first byte of the line containing `addr`.
#[inline]
pub const fn line_base(addr: u64) -> u64 {
    addr & !(LINE_SIZE - 1)
}

/// Number of cache lines covered by `[addr, addr + len)`.
#[inline]
pub fn lines_spanned(addr: u64, len: usize) -> u64 {
    if len == 0 {
        return 0;
    }
    let last = addr.saturating_add(len as u64 - 1);
    (last >> LINE_SHIFT) - (addr >> LINE_SHIFT) + 1
}

/// Decoded status word of one cache line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    NotUsed,
    Fetched(CpuId),
    Stored(CpuId),
}

impl LineState {
    #[inline]
    pub fn owner(self) -> Option<CpuId> {
        match self {
            LineState::NotUsed => None,
            LineState::Fetched(cpu) | LineState::Stored(cpu) => Some(cpu),
        }
    }

    #[inline]
    fn encode(self) -> u16 {
        match self {
            LineState::NotUsed => STATUS_NOT_USED,
            LineState::Fetched(cpu) => STATUS_FETCHED | (cpu & STATUS_CPU_MASK),
            LineState::Stored(cpu) => STATUS_STORED | (cpu & STATUS_CPU_MASK),
        }
    }

    #[inline]
    fn decode(raw: u16) -> Self {
        let cpu = raw & STATUS_CPU_MASK;
        if raw & STATUS_STORED != 0 {
            LineState::Stored(cpu)
        } else if raw & STATUS_FETCHED != 0 {
            LineState::Fetched(cpu)
        } else {
            LineState::NotUsed
        }
    }
}

/// One status word per cache line of main storage.
///
/// Every transition goes through compare-and-exchange; a successful exchange is the only thing
/// that establishes (or gives up) ownership of a line.
pub struct CacheLineTable {
    slots: Box<[AtomicU16]>,
}

impl core::fmt::Debug for CacheLineTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheLineTable")
            .field("lines", &self.slots.len())
            .finish()
    }
}

impl CacheLineTable {
    pub fn new(storage_size: u64) -> Self {
        let lines = storage_size.div_ceil(LINE_SIZE) as usize;
        Self {
            slots: (0..lines).map(|_| AtomicU16::new(STATUS_NOT_USED)).collect(),
        }
    }

    #[inline]
    #[track_caller]
    fn slot(&self, addr: u64) -> &AtomicU16 {
        match self.slots.get((addr >> LINE_SHIFT) as usize) {
            Some(slot) => slot,
            None => logic_error!("cache line 0x{addr:x} lies outside main storage"),
        }
    }

    #[inline]
    pub fn state(&self, addr: u64) -> LineState {
        LineState::decode(self.slot(addr).load(Ordering::Acquire))
    }

    /// Try to take an unused line. On failure the state that was found is returned.
    #[inline]
    pub fn claim(&self, addr: u64, desired: LineState) -> Result<(), LineState> {
        self.slot(addr)
            .compare_exchange(
                STATUS_NOT_USED,
                desired.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(LineState::decode)
    }

    /// Promote a line fetched by `cpu` to stored by `cpu`.
    ///
    /// Returns `false` when the line is no longer fetched by `cpu`.
    #[inline]
    pub fn upgrade(&self, addr: u64, cpu: CpuId) -> bool {
        self.slot(addr)
            .compare_exchange(
                LineState::Fetched(cpu).encode(),
                LineState::Stored(cpu).encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Give up `cpu`'s ownership of a line.
    ///
    /// Returns `false` when the line was not owned by `cpu`.
    pub fn release(&self, addr: u64, cpu: CpuId) -> bool {
        let slot = self.slot(addr);
        let current = slot.load(Ordering::Acquire);
        if LineState::decode(current).owner() != Some(cpu) {
            return false;
        }
        // Only the holder of `cpu`'s backout lock changes `cpu`'s lines, so the word cannot move
        // underneath us; a failed exchange means that invariant was broken.
        if slot
            .compare_exchange(current, STATUS_NOT_USED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            logic_error!("cpu {cpu}: cache line 0x{addr:x} changed while being released");
        }
        true
    }
}
