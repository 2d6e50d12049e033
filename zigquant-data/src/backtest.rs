//! Deterministic, strictly ordered replay across many historical sources
//! (spec §4.C "Backtest mode").
//!
//! Grounded on `barter/src/data/historical.rs`'s `MarketFeed` abstraction —
//! a pull-based iterator the engine drains in timestamp order — generalised
//! here to merge N sources through a `BinaryHeap` keyed by
//! `(timestamp, source_priority, arrival_seq)` so ties resolve
//! deterministically rather than by heap implementation accident.

use std::{cmp::Reverse, collections::BinaryHeap};
use zigquant_core::{event::Event, ports::DataSource};

struct Item {
    timestamp_ns: i64,
    source_priority: usize,
    arrival_seq: u64,
    source_idx: usize,
    event: Event,
}

impl Item {
    fn key(&self) -> (i64, usize, u64) {
        (self.timestamp_ns, self.source_priority, self.arrival_seq)
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Item {}
impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Item {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// Drains a fixed set of [`DataSource`]s in strict, deterministic
/// timestamp order. `source_priority` is the source's index in the slice
/// passed to [`BacktestMerge::new`] — earlier sources win timestamp ties
/// (spec §4.C: "ties broken by (source priority, arrival order)").
pub struct BacktestMerge {
    sources: Vec<Box<dyn DataSource>>,
    heap: BinaryHeap<Reverse<Item>>,
    arrival_seq: u64,
}

impl BacktestMerge {
    pub fn new(sources: Vec<Box<dyn DataSource>>) -> Self {
        let mut merge = Self {
            sources,
            heap: BinaryHeap::new(),
            arrival_seq: 0,
        };
        merge.refill_all();
        merge
    }

    fn refill_all(&mut self) {
        for idx in 0..self.sources.len() {
            self.pull_one(idx);
        }
    }

    fn pull_one(&mut self, source_idx: usize) {
        if let Some(event) = self.sources[source_idx].next() {
            let timestamp_ns = event_timestamp_ns(&event);
            let arrival_seq = self.arrival_seq;
            self.arrival_seq += 1;
            self.heap.push(Reverse(Item {
                timestamp_ns,
                source_priority: source_idx,
                arrival_seq,
                source_idx,
                event,
            }));
        }
    }

    /// Pops the next event in strict non-decreasing timestamp order,
    /// refilling from whichever source just yielded it.
    pub fn next_event(&mut self) -> Option<Event> {
        let Reverse(item) = self.heap.pop()?;
        self.pull_one(item.source_idx);
        Some(item.event)
    }

    pub fn is_exhausted(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn close_all(&mut self) {
        for source in &mut self.sources {
            source.close();
        }
    }
}

pub(crate) fn event_timestamp_ns(event: &Event) -> i64 {
    match event {
        Event::Trade(trade) => trade.timestamp_ns,
        Event::OrderbookUpdate(update) => update.timestamp_ns,
        Event::Candle(candle) => candle.close_ns,
        Event::Quote { quote, .. } => quote.timestamp_ns,
        Event::Tick { timestamp_ns } => *timestamp_ns,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use zigquant_core::{
        Price, Quantity, Symbol,
        event::Trade,
        order::Side,
        ports::{DataType, PortResult},
    };

    struct FixedSource {
        events: std::vec::IntoIter<Event>,
    }

    impl FixedSource {
        fn new(events: Vec<Event>) -> Self {
            Self {
                events: events.into_iter(),
            }
        }
    }

    impl DataSource for FixedSource {
        fn subscribe(&mut self, _symbol: &Symbol, _data_types: &[DataType]) -> PortResult<()> {
            Ok(())
        }
        fn next(&mut self) -> Option<Event> {
            self.events.next()
        }
        fn close(&mut self) {}
    }

    fn trade_event(price: rust_decimal::Decimal, ts: i64) -> Event {
        Event::Trade(Trade {
            symbol: Symbol::new("BTC-USD"),
            price: Price::from(price),
            qty: Quantity::from(dec!(1)),
            side: Side::Buy,
            timestamp_ns: ts,
        })
    }

    #[test]
    fn merges_two_sources_in_timestamp_order() {
        let a = FixedSource::new(vec![trade_event(dec!(1), 0), trade_event(dec!(3), 20)]);
        let b = FixedSource::new(vec![trade_event(dec!(2), 10), trade_event(dec!(4), 30)]);

        let mut merge = BacktestMerge::new(vec![Box::new(a), Box::new(b)]);
        let mut timestamps = Vec::new();
        while let Some(event) = merge.next_event() {
            timestamps.push(event_timestamp_ns(&event));
        }
        assert_eq!(timestamps, vec![0, 10, 20, 30]);
    }

    #[test]
    fn ties_broken_by_source_priority() {
        let a = FixedSource::new(vec![trade_event(dec!(1), 5)]);
        let b = FixedSource::new(vec![trade_event(dec!(2), 5)]);

        let mut merge = BacktestMerge::new(vec![Box::new(a), Box::new(b)]);
        let first = merge.next_event().unwrap();
        match first {
            Event::Trade(trade) => assert_eq!(trade.price, Price::from(dec!(1))),
            _ => panic!("expected a trade"),
        }
    }

    #[test]
    fn exhausted_after_all_sources_drain() {
        let a = FixedSource::new(vec![trade_event(dec!(1), 0)]);
        let mut merge = BacktestMerge::new(vec![Box::new(a)]);
        assert!(merge.next_event().is_some());
        assert!(merge.is_exhausted());
        assert!(merge.next_event().is_none());
    }
}
