//! # zigquant-engine
//!
//! The `Strategy` contract and the two runners that drive it: `LiveRunner`
//! (reactive event loop over a real `ExchangeClient`) and `BacktestRunner`
//! (deterministic replay over the built-in `MatchingEngine`), per spec
//! §4.E. Strategy code is identical under both — the runner is the only
//! thing that changes (spec §8 property "code parity").
//!
//! Grounded on `barter/src/engine/run.rs` (`sync_run`/`async_run`, a
//! processor loop pulling from a feed until a terminal shutdown event) and
//! `barter/src/system/mod.rs` (a `System` type owning join handles, a feed
//! sender, and graceful shutdown).

pub mod backtest;
pub mod live;
pub mod matching;

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use zigquant_bus::MessageBus;
use zigquant_cache::Cache;
use zigquant_core::order::ClientOrderId;
use zigquant_execution::{ExecutionEngine, ExecutionError, ExecutionResult, OrderIntent};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("runner is already running")]
    AlreadyRunning,
    #[error("runner has not been started")]
    NotRunning,
    #[error(transparent)]
    Data(#[from] zigquant_data::DataError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Lifecycle state shared by both runners (spec §4.E "common contract").
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RunnerStatus {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Running counters a host can poll via `stats()`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunnerStats {
    pub events_processed: u64,
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub ticks: u64,
}

/// What a `Strategy` gets instead of holding its own bus/cache/execution
/// references — keeps a strategy portable between runners (spec §4.E
/// "allow the strategy to call submit/cancel through the ExecutionEngine").
#[derive(Clone)]
pub struct EngineHandle {
    execution: Arc<ExecutionEngine>,
    cache: Cache,
}

impl EngineHandle {
    pub fn new(execution: Arc<ExecutionEngine>, cache: Cache) -> Self {
        Self { execution, cache }
    }

    pub fn submit(&self, intent: OrderIntent) -> ExecutionResult<ClientOrderId> {
        self.execution.submit(intent)
    }

    pub fn cancel(&self, client_id: ClientOrderId) -> ExecutionResult<()> {
        self.execution.cancel(client_id)
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn halt(&self) {
        self.execution.halt();
    }

    pub fn resume(&self) {
        self.execution.resume();
    }
}

/// A strategy's hooks into the three event streams the runners wire it to
/// (spec §4.E: "wire a Strategy to the bus via on_market_data,
/// on_order_event, on_tick"). Default bodies for the lifecycle hooks so a
/// minimal strategy only has to implement the three callbacks that matter.
pub trait Strategy: Send {
    fn on_start(&mut self, _ctx: &EngineHandle) {}

    fn on_market_data(&mut self, ctx: &EngineHandle, event: &zigquant_core::event::Event);

    fn on_order_event(&mut self, ctx: &EngineHandle, event: &zigquant_core::event::Event);

    fn on_tick(&mut self, ctx: &EngineHandle, timestamp_ns: i64);

    fn on_stop(&mut self, _ctx: &EngineHandle) {}
}

/// Subscribes `strategy`'s three callbacks to the bus topics the common
/// runner contract promises (spec §4.E), shared by `LiveRunner` and
/// `BacktestRunner` so the wiring itself cannot drift between the two.
pub(crate) fn wire_strategy(
    bus: &MessageBus,
    handle: EngineHandle,
    strategy: Arc<Mutex<dyn Strategy>>,
) {
    let h = handle.clone();
    let s = strategy.clone();
    bus.subscribe(zigquant_core::topics::MARKET_DATA_WILDCARD, move |event| {
        s.lock().on_market_data(&h, event);
        Ok(())
    });

    let h = handle.clone();
    let s = strategy.clone();
    bus.subscribe(zigquant_core::topics::ORDER_WILDCARD, move |event| {
        s.lock().on_order_event(&h, event);
        Ok(())
    });

    let h = handle;
    let s = strategy;
    bus.subscribe(zigquant_core::topics::SYSTEM_TICK, move |event| {
        if let zigquant_core::event::Event::Tick { timestamp_ns } = event {
            s.lock().on_tick(&h, *timestamp_ns);
        }
        Ok(())
    });
}
