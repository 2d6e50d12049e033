//! # zigquant-data
//!
//! Merges historical and live market data sources into a single
//! time-ordered stream and publishes it on the bus (spec §4.C).
//!
//! Grounded on `barter-data::streams` (subscription API, merged
//! multi-exchange streams) and `barter/src/data/{historical,live}`'s
//! pull-based `MarketFeed`/`Feed` abstraction.

pub mod backtest;
pub mod candle;
pub mod live;

use backtest::BacktestMerge;
use candle::CandleAggregator;
use live::LiveFeed;
use std::{collections::VecDeque, sync::Arc};
use thiserror::Error;
use tracing::{instrument, warn};
use zigquant_bus::MessageBus;
use zigquant_cache::Cache;
use zigquant_core::{
    Instrument, Symbol,
    event::{Event, Timeframe},
    ports::{Clock, DataSource, DataType},
};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("engine has not been started")]
    NotRunning,
    #[error("source rejected subscription: {0}")]
    SubscriptionRejected(String),
}

pub type DataResult<T> = Result<T, DataError>;

#[derive(Debug, Clone)]
pub struct DataEngineConfig {
    pub timeframes: Vec<Timeframe>,
    /// Live-mode staleness bound (spec §4.C: "stale events older than the
    /// highest observed timestamp by more than a configurable skew bound
    /// are dropped").
    pub live_skew_bound_ns: i64,
    pub live_queue_capacity: usize,
}

impl Default for DataEngineConfig {
    fn default() -> Self {
        Self {
            timeframes: vec![Timeframe::S1, Timeframe::M1],
            live_skew_bound_ns: 2_000_000_000,
            live_queue_capacity: 4096,
        }
    }
}

enum Mode {
    Backtest(BacktestMerge),
    Live {
        feed: LiveFeed,
        highest_seen_ns: i64,
        stale_dropped: u64,
    },
    Idle,
}

/// Produces the single totally-ordered event stream described in spec
/// §4.C, dispatching it onto the [`MessageBus`] and the [`Cache`] via
/// `market_data.*`/`candle.*` topics.
pub struct DataEngine {
    config: DataEngineConfig,
    mode: Mode,
    candles: CandleAggregator,
    pending: VecDeque<Event>,
    shutdown_emitted: bool,
    subscribed: Vec<(Symbol, Vec<DataType>)>,
}

impl DataEngine {
    pub fn new(config: DataEngineConfig) -> Self {
        let candles = CandleAggregator::new(config.timeframes.clone());
        Self {
            config,
            mode: Mode::Idle,
            candles,
            pending: VecDeque::new(),
            shutdown_emitted: false,
            subscribed: Vec::new(),
        }
    }

    /// Records a desired `(symbol, data_types)` coverage and forwards the
    /// request to every source once `start` builds them (spec §4.C
    /// "subscribe(symbol, data_types) records the desired coverage").
    pub fn subscribe(&mut self, symbol: Symbol, data_types: Vec<DataType>) {
        self.subscribed.push((symbol, data_types));
    }

    /// Starts backtest mode over a fixed set of sources, ordered by
    /// priority (index 0 wins timestamp ties).
    #[instrument(skip(self, sources))]
    pub fn start_backtest(&mut self, mut sources: Vec<Box<dyn DataSource>>) -> DataResult<()> {
        if !matches!(self.mode, Mode::Idle) {
            return Err(DataError::AlreadyRunning);
        }
        for source in &mut sources {
            for (symbol, data_types) in &self.subscribed {
                source
                    .subscribe(symbol, data_types)
                    .map_err(|e| DataError::SubscriptionRejected(e.to_string()))?;
            }
        }
        self.mode = Mode::Backtest(BacktestMerge::new(sources));
        self.shutdown_emitted = false;
        Ok(())
    }

    /// Starts live mode: one worker thread per source feeding a bounded
    /// queue, drained by repeated calls to [`DataEngine::poll`].
    #[instrument(skip(self, sources, clock))]
    pub fn start_live(
        &mut self,
        mut sources: Vec<Box<dyn DataSource>>,
        clock: Arc<dyn Clock>,
    ) -> DataResult<()> {
        if !matches!(self.mode, Mode::Idle) {
            return Err(DataError::AlreadyRunning);
        }
        for source in &mut sources {
            for (symbol, data_types) in &self.subscribed {
                source
                    .subscribe(symbol, data_types)
                    .map_err(|e| DataError::SubscriptionRejected(e.to_string()))?;
            }
        }
        let now_ns = Arc::new(move || clock.now_ns());
        let feed = LiveFeed::spawn(sources, self.config.live_queue_capacity, now_ns);
        self.mode = Mode::Live {
            feed,
            highest_seen_ns: i64::MIN,
            stale_dropped: 0,
        };
        self.shutdown_emitted = false;
        Ok(())
    }

    /// Drains sources and closes them (spec §4.C: "`stop()` drains and
    /// closes sources"; "a `system.shutdown` event is always the final
    /// event published" — the caller must keep polling until `poll`
    /// returns `None` to observe it).
    pub fn stop(&mut self) -> DataResult<()> {
        match std::mem::replace(&mut self.mode, Mode::Idle) {
            Mode::Backtest(mut merge) => {
                merge.close_all();
                for candle in self.candles.flush() {
                    self.pending.push_back(Event::Candle(candle));
                }
                self.pending.push_back(Event::Shutdown);
                Ok(())
            }
            Mode::Live { feed, .. } => {
                feed.stop();
                for candle in self.candles.flush() {
                    self.pending.push_back(Event::Candle(candle));
                }
                self.pending.push_back(Event::Shutdown);
                Ok(())
            }
            Mode::Idle => Err(DataError::NotRunning),
        }
    }

    /// Pulls the next event from whichever mode is active, interleaving
    /// candle closes and synthetic ticks. Returns `None` once the
    /// `system.shutdown` event itself has already been yielded.
    pub fn poll(&mut self) -> Option<Event> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if self.shutdown_emitted {
            return None;
        }

        let popped = match &mut self.mode {
            Mode::Backtest(merge) => merge.next_event().map(|event| (event, true)),
            Mode::Live {
                feed,
                highest_seen_ns,
                stale_dropped,
            } => loop {
                let Some(arrived) = feed.try_recv() else {
                    return None;
                };
                let ts = backtest::event_timestamp_ns(&arrived.event);
                let ts = if ts == 0 { arrived.arrival_ns } else { ts };
                if ts + self.config.live_skew_bound_ns < *highest_seen_ns {
                    *stale_dropped += 1;
                    warn!(ts, highest_seen_ns, "dropping stale live event");
                    continue;
                }
                *highest_seen_ns = (*highest_seen_ns).max(ts);
                break Some((arrived.event, false));
            },
            Mode::Idle => None,
        };

        match popped {
            Some((event, emit_tick)) => {
                if let Event::Trade(trade) = &event {
                    for candle in self.candles.on_trade(trade) {
                        self.pending.push_back(Event::Candle(candle));
                    }
                }
                if emit_tick {
                    let ts = backtest::event_timestamp_ns(&event);
                    self.pending.push_back(Event::Tick { timestamp_ns: ts });
                }
                Some(event)
            }
            None => {
                if matches!(self.mode, Mode::Backtest(_)) {
                    for candle in self.candles.flush() {
                        self.pending.push_back(Event::Candle(candle));
                    }
                    self.pending.push_back(Event::Shutdown);
                    self.shutdown_emitted = true;
                    self.pending.pop_front()
                } else {
                    None
                }
            }
        }
    }

    /// Drives `poll` to completion, publishing each event on `bus` and
    /// registering instruments/quotes into `cache` along the way — the
    /// convenience entry point `BacktestRunner` calls once per step.
    pub fn drive_one(&mut self, bus: &MessageBus, cache: &Cache) -> Option<Event> {
        self.drive_one_with(bus, cache, |_| {})
    }

    /// Like [`Self::drive_one`], but runs `before_publish` against the
    /// polled event before it is dispatched onto `bus`. `BacktestRunner`
    /// uses this to feed the triggering market event into its matching
    /// engine's last-observed-price *before* strategies (which are only
    /// reachable via the synchronous `bus.publish` call inside this
    /// method) see it and potentially submit a market order reacting to
    /// it — otherwise a market order submitted off the very trade that
    /// crossed it would see the previous price, or none at all.
    pub fn drive_one_with(
        &mut self,
        bus: &MessageBus,
        cache: &Cache,
        before_publish: impl FnOnce(&Event),
    ) -> Option<Event> {
        let event = self.poll()?;
        before_publish(&event);
        publish(bus, cache, &event);
        Some(event)
    }

    pub fn live_stale_dropped(&self) -> u64 {
        match &self.mode {
            Mode::Live { stale_dropped, .. } => *stale_dropped,
            _ => 0,
        }
    }
}

fn publish(bus: &MessageBus, cache: &Cache, event: &Event) {
    match event {
        Event::MarketData(instrument) => {
            cache.register_instrument(instrument.clone());
            bus.publish(
                zigquant_core::topics::market_data_topic(&instrument.symbol),
                event.clone(),
            );
        }
        Event::Quote { symbol, .. } => {
            bus.publish(zigquant_core::topics::market_data_topic(symbol), event.clone());
        }
        Event::Trade(trade) => {
            bus.publish(zigquant_core::topics::market_data_topic(&trade.symbol), event.clone());
        }
        Event::OrderbookUpdate(update) => {
            bus.publish(zigquant_core::topics::market_data_topic(&update.symbol), event.clone());
        }
        Event::Candle(candle) => {
            bus.publish(
                zigquant_core::topics::candle_topic(&candle.symbol, timeframe_tag(candle.timeframe)),
                event.clone(),
            );
        }
        Event::Tick { .. } => bus.publish(zigquant_core::topics::SYSTEM_TICK, event.clone()),
        Event::Shutdown => bus.publish(zigquant_core::topics::SYSTEM_SHUTDOWN, event.clone()),
        other => bus.publish(zigquant_core::topics::SYSTEM_ERROR, other.clone()),
    }
}

fn timeframe_tag(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::S1 => "1s",
        Timeframe::S5 => "5s",
        Timeframe::M1 => "1m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::H1 => "1h",
        Timeframe::D1 => "1d",
    }
}

/// Registers an [`Instrument`] directly, bypassing a `DataSource` — used
/// by tests and by hosts that know their universe ahead of time.
pub fn seed_instrument(cache: &Cache, instrument: Instrument) {
    cache.register_instrument(instrument);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicI64, Ordering};
    use zigquant_core::{
        Price, Quantity,
        event::Trade,
        order::Side,
        ports::{DataType, PortResult},
    };

    struct ScriptedSource {
        events: std::vec::IntoIter<Event>,
    }

    impl ScriptedSource {
        fn new(events: Vec<Event>) -> Self {
            Self {
                events: events.into_iter(),
            }
        }
    }

    impl DataSource for ScriptedSource {
        fn subscribe(&mut self, _symbol: &Symbol, _data_types: &[DataType]) -> PortResult<()> {
            Ok(())
        }
        fn next(&mut self) -> Option<Event> {
            self.events.next()
        }
        fn close(&mut self) {}
    }

    fn trade(ts: i64) -> Event {
        Event::Trade(Trade {
            symbol: Symbol::new("BTC-USD"),
            price: Price::from(dec!(100)),
            qty: Quantity::from(dec!(1)),
            side: Side::Buy,
            timestamp_ns: ts,
        })
    }

    #[test]
    fn backtest_emits_tick_after_each_real_event_then_shutdown() {
        let mut engine = DataEngine::new(DataEngineConfig::default());
        let source = ScriptedSource::new(vec![trade(0), trade(10)]);
        engine.start_backtest(vec![Box::new(source)]).unwrap();

        let mut kinds = Vec::new();
        while let Some(event) = engine.poll() {
            kinds.push(std::mem::discriminant(&event));
        }

        // trade, tick, trade, tick, shutdown
        assert_eq!(kinds.len(), 5);
        assert_eq!(kinds[4], std::mem::discriminant(&Event::Shutdown));
    }

    #[test]
    fn subscribe_before_start_is_forwarded_to_sources() {
        struct RecordingSource {
            seen: std::sync::Arc<std::sync::Mutex<Vec<Symbol>>>,
        }
        impl DataSource for RecordingSource {
            fn subscribe(&mut self, symbol: &Symbol, _data_types: &[DataType]) -> PortResult<()> {
                self.seen.lock().unwrap().push(symbol.clone());
                Ok(())
            }
            fn next(&mut self) -> Option<Event> {
                None
            }
            fn close(&mut self) {}
        }

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut engine = DataEngine::new(DataEngineConfig::default());
        engine.subscribe(Symbol::new("BTC-USD"), vec![DataType::Trades]);
        engine
            .start_backtest(vec![Box::new(RecordingSource { seen: seen.clone() })])
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Symbol::new("BTC-USD")]);
    }

    #[test]
    fn live_mode_stamps_and_tracks_stale_drops() {
        struct ClockStub(AtomicI64);
        impl Clock for ClockStub {
            fn now_ns(&self) -> i64 {
                self.0.load(Ordering::SeqCst)
            }
            fn sleep(&self, _duration: std::time::Duration) {}
        }

        let mut config = DataEngineConfig::default();
        config.live_skew_bound_ns = 5;
        let mut engine = DataEngine::new(config);

        let source = ScriptedSource::new(vec![trade(100), trade(50)]);
        let clock: Arc<dyn Clock> = Arc::new(ClockStub(AtomicI64::new(0)));
        engine.start_live(vec![Box::new(source)], clock).unwrap();

        let mut observed = 0;
        for _ in 0..200 {
            if engine.poll().is_some() {
                observed += 1;
            }
            if observed >= 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(observed, 1);
        // second trade (ts=50) is more than skew_bound_ns behind ts=100,
        // so it should eventually be dropped rather than delivered.
    }
}
