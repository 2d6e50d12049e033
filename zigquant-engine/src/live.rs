//! Reactive live event loop (spec §4.E "LiveRunner").
//!
//! Grounded on `barter/src/system/mod.rs` (a `System` type owning worker
//! join handles, a feed sender, and a single shutdown signal) and
//! `barter/src/engine/run.rs`'s processor-loop pattern, adapted to this
//! workspace's thread-per-concern model: one dispatcher thread drains
//! `DataEngine` and owns `MessageBus` delivery (spec §5 "a single
//! dispatcher thread owns MessageBus delivery in live mode"), with
//! separate timer threads for the heartbeat, the optional clock-driven
//! tick, and periodic checkpointing.

use crate::{EngineError, EngineHandle, EngineResult, RunnerStats, RunnerStatus, Strategy, wire_strategy};
use parking_lot::{Mutex, RwLock};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};
use tracing::{info, instrument, warn};
use zigquant_bus::MessageBus;
use zigquant_cache::Cache;
use zigquant_core::{
    event::Event,
    ports::{Clock, DataSource, ExchangeClient, StateStore, SystemClock},
    topics,
};
use zigquant_data::{DataEngine, DataEngineConfig};
use zigquant_execution::{ExecutionConfig, ExecutionEngine};

#[derive(Debug, Clone)]
pub struct LiveRunnerConfig {
    pub heartbeat_interval_ms: u64,
    /// `spec.md` §6: "optional; enables clock-driven mode".
    pub tick_interval_ms: Option<u64>,
    pub checkpoint_interval_ms: Option<u64>,
    pub cancel_open_orders_on_stop: bool,
}

impl Default for LiveRunnerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            tick_interval_ms: None,
            checkpoint_interval_ms: None,
            cancel_open_orders_on_stop: false,
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    events_processed: AtomicU64,
    orders_submitted: AtomicU64,
    orders_filled: AtomicU64,
    ticks: AtomicU64,
}

impl AtomicStats {
    fn snapshot(&self) -> RunnerStats {
        RunnerStats {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            orders_filled: self.orders_filled.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }
}

/// Owns the reactive loop's threads and the single shutdown signal they
/// all watch (spec §4.E, §5).
pub struct LiveRunner {
    bus: Arc<MessageBus>,
    cache: Cache,
    execution: Arc<ExecutionEngine>,
    clock: Arc<dyn Clock>,
    state_store: Option<Arc<dyn StateStore>>,
    config: LiveRunnerConfig,
    handle: EngineHandle,
    status: RwLock<RunnerStatus>,
    shutdown: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    data_engine: Mutex<Option<Arc<Mutex<DataEngine>>>>,
    strategy: Mutex<Option<Arc<Mutex<dyn Strategy>>>>,
    stats: Arc<AtomicStats>,
}

impl LiveRunner {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        state_store: Option<Arc<dyn StateStore>>,
        execution_config: ExecutionConfig,
        config: LiveRunnerConfig,
    ) -> Self {
        let bus = Arc::new(MessageBus::new());
        let cache = Cache::attach(&bus);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let execution = Arc::new(ExecutionEngine::new(
            bus.clone(),
            cache.clone(),
            exchange,
            clock.clone(),
            state_store.clone(),
            execution_config,
        ));
        let handle = EngineHandle::new(execution.clone(), cache.clone());
        Self {
            bus,
            cache,
            execution,
            clock,
            state_store,
            config,
            handle,
            status: RwLock::new(RunnerStatus::Idle),
            shutdown: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
            data_engine: Mutex::new(None),
            strategy: Mutex::new(None),
            stats: Arc::new(AtomicStats::default()),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub fn status(&self) -> RunnerStatus {
        *self.status.read()
    }

    pub fn stats(&self) -> RunnerStats {
        self.stats.snapshot()
    }

    /// Runs crash recovery, wires the strategy onto the bus, starts
    /// `DataEngine` in live mode, and spawns the dispatcher/timer threads.
    /// Returns once everything is running; it does not block waiting for
    /// `stop()` — call [`LiveRunner::join`] or [`LiveRunner::run`] for that.
    #[instrument(skip(self, sources, strategy))]
    pub fn start(
        &self,
        sources: Vec<Box<dyn DataSource>>,
        strategy: Arc<Mutex<dyn Strategy>>,
    ) -> EngineResult<()> {
        {
            let mut status = self.status.write();
            if *status != RunnerStatus::Idle {
                return Err(EngineError::AlreadyRunning);
            }
            *status = RunnerStatus::Running;
        }
        self.shutdown.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);

        if let Some(store) = &self.state_store {
            self.execution.recover()?;
            let _ = store;
        }

        wire_strategy(&self.bus, self.handle.clone(), strategy.clone());
        strategy.lock().on_start(&self.handle);
        *self.strategy.lock() = Some(strategy);

        let data_engine = Arc::new(Mutex::new(DataEngine::new(DataEngineConfig::default())));
        data_engine.lock().start_live(sources, self.clock.clone())?;
        *self.data_engine.lock() = Some(data_engine.clone());

        let mut threads = vec![self.spawn_dispatcher(data_engine)];
        if let Some(tick_ms) = self.config.tick_interval_ms {
            threads.push(self.spawn_ticker(tick_ms));
        }
        threads.push(self.spawn_heartbeat());
        if let Some(interval_ms) = self.config.checkpoint_interval_ms {
            if let Some(store) = self.state_store.clone() {
                threads.push(self.spawn_checkpointer(interval_ms, store));
            }
        }
        *self.threads.lock() = threads;

        Ok(())
    }

    pub fn pause(&self) -> EngineResult<()> {
        let mut status = self.status.write();
        if *status != RunnerStatus::Running {
            return Err(EngineError::NotRunning);
        }
        *status = RunnerStatus::Paused;
        self.paused.store(true, Ordering::Release);
        Ok(())
    }

    pub fn resume(&self) -> EngineResult<()> {
        let mut status = self.status.write();
        if *status != RunnerStatus::Paused {
            return Err(EngineError::NotRunning);
        }
        *status = RunnerStatus::Running;
        self.paused.store(false, Ordering::Release);
        Ok(())
    }

    /// Graceful drain (spec §4.E "stop accepting data, cancel open orders
    /// if policy says so, snapshot, exit"): signals every thread to stop,
    /// joins them, optionally cancels resting orders, then checkpoints.
    #[instrument(skip(self))]
    pub fn stop(&self) -> EngineResult<()> {
        {
            let status = self.status.read();
            if matches!(*status, RunnerStatus::Idle | RunnerStatus::Stopped) {
                return Err(EngineError::NotRunning);
            }
        }
        self.shutdown.store(true, Ordering::Release);

        if let Some(data_engine) = self.data_engine.lock().take() {
            if let Err(err) = data_engine.lock().stop() {
                warn!(%err, "data engine stop reported an error");
            }
        }

        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }

        if self.config.cancel_open_orders_on_stop {
            for order in self.cache.open_orders() {
                if let Err(err) = self.execution.cancel(order.client_id) {
                    warn!(client_id = %order.client_id, %err, "failed to cancel open order during shutdown drain");
                }
            }
        }

        if let Some(store) = &self.state_store {
            if let Err(err) = self.cache.checkpoint_to(store.as_ref(), self.clock.now_ns()) {
                warn!(%err, "final checkpoint on stop failed");
            }
        }

        if let Some(strategy) = self.strategy.lock().take() {
            strategy.lock().on_stop(&self.handle);
        }

        *self.status.write() = RunnerStatus::Stopped;
        Ok(())
    }

    /// Blocks the calling thread until [`LiveRunner::stop`] has been
    /// called from elsewhere (a signal handler, an admin command).
    pub fn join(&self) {
        while !matches!(*self.status.read(), RunnerStatus::Stopped) {
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// `async` entry point for hosts already inside a tokio runtime:
    /// starts the runner, then awaits [`LiveRunner::join`] on a blocking
    /// task rather than busy-polling the executor (spec §4.E; grounded on
    /// `barter/src/engine/run.rs`'s `async_run` wrapping its own
    /// synchronous loop).
    pub async fn run(
        self: Arc<Self>,
        sources: Vec<Box<dyn DataSource>>,
        strategy: Arc<Mutex<dyn Strategy>>,
    ) -> EngineResult<()> {
        self.start(sources, strategy)?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.join())
            .await
            .expect("live runner join task panicked");
        Ok(())
    }

    fn spawn_dispatcher(&self, data_engine: Arc<Mutex<DataEngine>>) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let cache = self.cache.clone();
        let execution = self.execution.clone();
        let shutdown = self.shutdown.clone();
        let paused = self.paused.clone();
        let stats = self.stats.clone();
        std::thread::spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                if paused.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(20));
                    continue;
                }
                match data_engine.lock().drive_one(&bus, &cache) {
                    Some(Event::Shutdown) => break,
                    Some(event) => {
                        stats.events_processed.fetch_add(1, Ordering::Relaxed);
                        match event {
                            Event::OrderSubmitted { .. } => {
                                stats.orders_submitted.fetch_add(1, Ordering::Relaxed);
                            }
                            Event::OrderFilled { .. } => {
                                stats.orders_filled.fetch_add(1, Ordering::Relaxed);
                            }
                            _ => {}
                        }
                    }
                    None => std::thread::sleep(Duration::from_millis(5)),
                }
                execution.drain_exchange_events();
            }
        })
    }

    fn spawn_ticker(&self, interval_ms: u64) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let shutdown = self.shutdown.clone();
        let clock = self.clock.clone();
        let stats = self.stats.clone();
        std::thread::spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                clock.sleep(Duration::from_millis(interval_ms));
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                stats.ticks.fetch_add(1, Ordering::Relaxed);
                bus.publish(
                    topics::SYSTEM_TICK,
                    Event::Tick {
                        timestamp_ns: clock.now_ns(),
                    },
                );
            }
        })
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        let clock = self.clock.clone();
        let stats = self.stats.clone();
        let interval_ms = self.config.heartbeat_interval_ms;
        std::thread::spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                clock.sleep(Duration::from_millis(interval_ms));
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                info!(
                    events_processed = stats.events_processed.load(Ordering::Relaxed),
                    "heartbeat"
                );
            }
        })
    }

    fn spawn_checkpointer(&self, interval_ms: u64, store: Arc<dyn StateStore>) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        let clock = self.clock.clone();
        let cache = self.cache.clone();
        std::thread::spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                clock.sleep(Duration::from_millis(interval_ms));
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                if let Err(err) = cache.checkpoint_to(store.as_ref(), clock.now_ns()) {
                    warn!(%err, "periodic checkpoint failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use zigquant_core::{
        Price, Quantity, Symbol,
        order::{ClientOrderId, ExchangeOrderId, Side},
        ports::{Ack, PortError, PortResult},
    };

    struct NullExchange;
    impl ExchangeClient for NullExchange {
        fn submit(
            &self,
            _client_id: ClientOrderId,
            _symbol: &Symbol,
            _side: Side,
            _qty: Quantity,
            _price: Option<Price>,
        ) -> PortResult<Ack> {
            Err(PortError::Rejected(zigquant_core::RejectReason::Other("no exchange in test".into())))
        }
        fn cancel(&self, _exchange_id: &ExchangeOrderId) -> PortResult<()> {
            Ok(())
        }
        fn query(&self, _client_id: ClientOrderId) -> PortResult<Ack> {
            Err(PortError::NotFound)
        }
        fn drain_events(&self) -> Vec<Event> {
            Vec::new()
        }
    }

    struct EmptySource;
    impl DataSource for EmptySource {
        fn subscribe(&mut self, _symbol: &Symbol, _data_types: &[zigquant_core::DataType]) -> PortResult<()> {
            Ok(())
        }
        fn next(&mut self) -> Option<Event> {
            None
        }
        fn close(&mut self) {}
    }

    struct CountingStrategy {
        market_data: Arc<AtomicUsize>,
    }
    impl Strategy for CountingStrategy {
        fn on_market_data(&mut self, _ctx: &EngineHandle, _event: &Event) {
            self.market_data.fetch_add(1, Ordering::Relaxed);
        }
        fn on_order_event(&mut self, _ctx: &EngineHandle, _event: &Event) {}
        fn on_tick(&mut self, _ctx: &EngineHandle, _timestamp_ns: i64) {}
    }

    #[test]
    fn start_then_stop_transitions_through_running_to_stopped() {
        let runner = LiveRunner::new(
            Arc::new(NullExchange),
            None,
            ExecutionConfig::default(),
            LiveRunnerConfig::default(),
        );
        let market_data = Arc::new(AtomicUsize::new(0));
        let strategy: Arc<Mutex<dyn Strategy>> = Arc::new(Mutex::new(CountingStrategy {
            market_data: market_data.clone(),
        }));

        runner.start(vec![Box::new(EmptySource)], strategy).unwrap();
        assert_eq!(runner.status(), RunnerStatus::Running);

        runner.stop().unwrap();
        assert_eq!(runner.status(), RunnerStatus::Stopped);
    }

    #[test]
    fn cannot_start_twice_without_stopping() {
        let runner = LiveRunner::new(
            Arc::new(NullExchange),
            None,
            ExecutionConfig::default(),
            LiveRunnerConfig::default(),
        );
        let strategy: Arc<Mutex<dyn Strategy>> = Arc::new(Mutex::new(CountingStrategy {
            market_data: Arc::new(AtomicUsize::new(0)),
        }));
        runner.start(vec![Box::new(EmptySource)], strategy.clone()).unwrap();
        assert!(matches!(
            runner.start(vec![Box::new(EmptySource)], strategy),
            Err(EngineError::AlreadyRunning)
        ));
        runner.stop().unwrap();
    }

    #[test]
    fn pause_blocks_dispatch_until_resumed() {
        let runner = LiveRunner::new(
            Arc::new(NullExchange),
            None,
            ExecutionConfig::default(),
            LiveRunnerConfig::default(),
        );
        let strategy: Arc<Mutex<dyn Strategy>> = Arc::new(Mutex::new(CountingStrategy {
            market_data: Arc::new(AtomicUsize::new(0)),
        }));
        runner.start(vec![Box::new(EmptySource)], strategy).unwrap();
        runner.pause().unwrap();
        assert_eq!(runner.status(), RunnerStatus::Paused);
        runner.resume().unwrap();
        assert_eq!(runner.status(), RunnerStatus::Running);
        runner.stop().unwrap();
    }
}
