//! Transactional-execution (TXF) conflict detection and backout.
//!
//! Conflicts are tracked per 256-byte cache line of main storage. Each line has a status word
//! that records whether some CPU's transaction has fetched or stored it; ownership only ever
//! changes through compare-and-exchange on that word, so at most one transaction can own a line
//! at a time.
//!
//! Before a transaction first touches a line, the line's original content is saved in that CPU's
//! backout log. Aborting a transaction writes every saved line back, which restores storage to
//! its pre-transaction state no matter in which order the lines were touched.
//!
//! Two abort paths exist:
//! - *immediate*: the transactional CPU itself finds a line owned by another transaction. The
//!   later toucher loses, backs itself out and returns a [`TxAbort`].
//! - *delayed*: a non-transactional access hits a line owned by some transaction. The accessor
//!   backs that transaction out on its owner's behalf and leaves the abort cause pending; the
//!   owner picks it up at its next transactional access (or at commit).

mod abort;
mod config;
mod engine;
mod hint;
mod line;
mod lock;
mod slot;
mod sync;

pub use abort::{AbortCause, AbortWhy, TxAbort};
pub use config::{TxfConfig, TxfConfigError};
pub use engine::{TxfCpu, TxfEngine};
pub use hint::RangeHint;
pub use line::{line_base, lines_spanned, CacheLineTable, LineState, LINE_SHIFT, LINE_SIZE};
pub use sync::Backoff;
