//! The four ports the core depends on but does not implement (spec §6, §9).
//!
//! Spec §9 replaces the source's pointer+vtable idiom with the target
//! language's native polymorphism: here, a small trait per port. Concrete
//! adapters (CSV reader, WebSocket client, Hyperliquid REST client, SQLite
//! `StateStore`) live outside this core crate family entirely; only mock/
//! in-memory implementations used for tests and backtesting ship alongside
//! the components that need them (`zigquant-execution::mock`,
//! `zigquant-engine::matching`).

use crate::{
    decimal::{Price, Quantity},
    event::Event,
    instrument::Symbol,
    order::{ClientOrderId, ExchangeOrderId, OrderStatus, RejectReason, Side},
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum PortError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("rejected: {0}")]
    Rejected(RejectReason),
    #[error("timeout")]
    Timeout,
    #[error("not found")]
    NotFound,
}

pub type PortResult<T> = Result<T, PortError>;

/// Supported market data kinds a [`DataSource`] can be asked to cover.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DataType {
    Trades,
    Quotes,
    OrderBook,
    Candles,
}

/// Adapter port yielding normalised [`Event`]s with monotonic timestamps
/// per source (spec §4.C, §6). Concrete CSV/WebSocket/REST adapters are
/// outside this core.
pub trait DataSource: Send {
    fn subscribe(&mut self, symbol: &Symbol, data_types: &[DataType]) -> PortResult<()>;

    /// Pulls the next event, or `None` when the source is exhausted /
    /// idle for now (the engine polls again on the next tick).
    fn next(&mut self) -> Option<Event>;

    fn close(&mut self);
}

/// Outcome of an exchange submission/cancellation acknowledgement.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Ack {
    pub exchange_id: ExchangeOrderId,
    pub status: OrderStatus,
}

/// Abstract exchange port (spec §6). `zigquant-engine::matching` provides a
/// `MatchingEngine` implementation for backtests; a live Hyperliquid/CEX
/// client would implement this outside the core.
pub trait ExchangeClient: Send + Sync {
    fn submit(
        &self,
        client_id: ClientOrderId,
        symbol: &Symbol,
        side: Side,
        qty: Quantity,
        price: Option<Price>,
    ) -> PortResult<Ack>;

    fn cancel(&self, exchange_id: &ExchangeOrderId) -> PortResult<()>;

    /// Current exchange-side status, along with the exchange id if one was
    /// ever assigned — lets a caller that only has a `client_id` (because
    /// its own `submit` call timed out before seeing an `Ack`) recover the
    /// exchange id without a second round trip.
    fn query(&self, client_id: ClientOrderId) -> PortResult<Ack>;

    /// Drains any exchange-pushed events (fills, cancels, connection
    /// state) accumulated since the last call.
    fn drain_events(&self) -> Vec<Event>;
}

/// Persistence port for checkpoints and the pre-submission event log
/// (spec §4.D, §6). Best-effort only — the core's Non-goals exclude
/// cross-process durability guarantees.
pub trait StateStore: Send + Sync {
    fn save_snapshot(&self, bytes: &[u8], checksum: u32) -> PortResult<()>;

    fn load_latest(&self) -> PortResult<Option<(Vec<u8>, u32)>>;

    fn append_event(&self, bytes: &[u8]) -> PortResult<()>;

    fn replay_since(&self, version: u64) -> PortResult<Vec<Vec<u8>>>;
}

/// Injectable clock, so backtests can substitute a virtual clock instead
/// of a process-wide global (spec §9 "Global mutable singletons").
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> i64;

    fn sleep(&self, duration: Duration);

    /// Schedules `callback` to run once, `duration` from now (spec §6
    /// "timer(duration, callback)"). The default spawns a real thread,
    /// suitable for [`SystemClock`] and other wall-clock-backed
    /// implementations; [`VirtualClock`] overrides this to fire against
    /// simulated time instead.
    fn timer(&self, duration: Duration, callback: Box<dyn FnOnce() + Send>) {
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            callback();
        });
    }
}

/// A [`Clock`] backed by the OS wall clock, used by `LiveRunner`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A manually-advanced [`Clock`] used by `BacktestRunner` so replay is
/// deterministic and never touches the wall clock.
pub struct VirtualClock {
    now_ns: std::sync::atomic::AtomicI64,
    pending_timers: std::sync::Mutex<Vec<(i64, Box<dyn FnOnce() + Send>)>>,
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualClock")
            .field("now_ns", &self.now_ns.load(std::sync::atomic::Ordering::SeqCst))
            .finish()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl VirtualClock {
    pub fn new(start_ns: i64) -> Self {
        Self {
            now_ns: std::sync::atomic::AtomicI64::new(start_ns),
            pending_timers: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn advance_to(&self, ns: i64) {
        self.now_ns.fetch_max(ns, std::sync::atomic::Ordering::SeqCst);
        self.fire_due_timers();
    }

    /// Fires (and removes) every pending timer whose deadline has passed,
    /// keeping the rest queued for a later `advance_to`.
    fn fire_due_timers(&self) {
        let now = self.now_ns();
        let all = std::mem::take(&mut *self.pending_timers.lock().unwrap());
        let (fire, keep): (Vec<_>, Vec<_>) = all.into_iter().partition(|(deadline, _)| *deadline <= now);
        *self.pending_timers.lock().unwrap() = keep;
        for (_, callback) in fire {
            callback();
        }
    }
}

impl Clock for VirtualClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn sleep(&self, _duration: Duration) {
        // Backtests never block wall-clock time; time advances only via
        // `advance_to` as events are replayed.
    }

    fn timer(&self, duration: Duration, callback: Box<dyn FnOnce() + Send>) {
        let deadline = self.now_ns().saturating_add(duration.as_nanos() as i64);
        if deadline <= self.now_ns() {
            callback();
            return;
        }
        self.pending_timers.lock().unwrap().push((deadline, callback));
    }
}
