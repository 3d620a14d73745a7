use core::fmt;
use core::panic::Location;

use bitflags::bitflags;
use mfemu_core::CpuId;
use thiserror::Error;

/// Transaction abort code (TAC) recorded for an aborted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortCause {
    /// Too many distinct cache lines fetched.
    FetchOverflow,
    /// Too many distinct cache lines stored.
    StoreOverflow,
    /// Another CPU touched a line this transaction fetched, or this transaction fetched a line
    /// owned by another transaction.
    FetchConflict,
    /// Same as [`AbortCause::FetchConflict`] for stored lines.
    StoreConflict,
    /// Abort requested by the surrounding execution (interruption, restricted instruction, ...).
    Miscellaneous,
}

impl AbortCause {
    /// Architected transaction abort code.
    pub const fn code(self) -> u16 {
        match self {
            AbortCause::FetchOverflow => 7,
            AbortCause::StoreOverflow => 8,
            AbortCause::FetchConflict => 9,
            AbortCause::StoreConflict => 10,
            AbortCause::Miscellaneous => 255,
        }
    }

    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            7 => Some(AbortCause::FetchOverflow),
            8 => Some(AbortCause::StoreOverflow),
            9 => Some(AbortCause::FetchConflict),
            10 => Some(AbortCause::StoreConflict),
            255 => Some(AbortCause::Miscellaneous),
            _ => None,
        }
    }

    /// Condition code presented when the transaction resumes after its TBEGIN.
    ///
    /// Conflicts are transient (2, retrying may succeed); overflows are persistent (3).
    pub const fn condition_code(self) -> u8 {
        match self {
            AbortCause::FetchOverflow | AbortCause::StoreOverflow => 3,
            AbortCause::FetchConflict
            | AbortCause::StoreConflict
            | AbortCause::Miscellaneous => 2,
        }
    }

    #[inline]
    pub const fn overflow(write: bool) -> Self {
        if write {
            AbortCause::StoreOverflow
        } else {
            AbortCause::FetchOverflow
        }
    }

    #[inline]
    pub const fn conflict(write: bool) -> Self {
        if write {
            AbortCause::StoreConflict
        } else {
            AbortCause::FetchConflict
        }
    }
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AbortCause::FetchOverflow => "fetch overflow",
            AbortCause::StoreOverflow => "store overflow",
            AbortCause::FetchConflict => "fetch conflict",
            AbortCause::StoreConflict => "store conflict",
            AbortCause::Miscellaneous => "miscellaneous",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Why a transaction was aborted, for diagnostics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AbortWhy: u8 {
        /// A cache-line conflict was detected.
        const CONFLICT = 0x01;
        /// The abort was raised by another CPU and delivered later.
        const DELAYED_ABORT = 0x02;
    }
}

/// Outcome of a transaction that was backed out.
///
/// By the time this value exists, every line the transaction touched has been restored and
/// released; the caller only has to resume at the outermost TBEGIN with
/// [`AbortCause::condition_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transaction aborted: {cause} (tac {}, cc {}) detected by cpu {who} at {location}", .cause.code(), .cause.condition_code())]
pub struct TxAbort {
    pub cause: AbortCause,
    pub why: AbortWhy,
    /// CPU that detected the condition.
    pub who: CpuId,
    /// Where in the emulator the condition was detected.
    pub location: &'static Location<'static>,
}
