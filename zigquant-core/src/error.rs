//! Shared error taxonomy (spec §7), composed into component-specific
//! error enums (`zigquant-bus::BusError`, `zigquant-execution::ExecutionError`,
//! ...) via `#[from]`, mirroring `barter::error::BarterError`'s composition
//! of `barter-data::error::DataError` and `barter-execution::error::ExecutionError`.

use serde::{Deserialize, Serialize};

/// The five-way classification from spec §7, attached to errors that cross
/// a port boundary so callers can apply the documented handling policy
/// without re-deriving it from the concrete error variant.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Network timeout, rate limit, exchange 5xx — retry with back-off.
    Transient,
    /// Submission/cancellation outcome unknown — halt the symbol, poll.
    Uncertain,
    /// Exchange refused the request — terminal, surface to strategy.
    Rejected,
    /// Internal inconsistency — log, drop, count, never crash.
    InvariantViolation,
    /// Corrupted snapshot / unreadable stream / reentrancy cap — shut down.
    Fatal,
}
