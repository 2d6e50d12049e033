//! Per-symbol, per-timeframe OHLCV aggregation from raw trades.
//!
//! Grounded on `barter-data::streams::indicator`/bar-building logic (no
//! direct file in the teacher builds candles from trades at this layer —
//! barter leaves that to strategies — but the incremental OHLCV update
//! pattern mirrors the indicator module's rolling-window maintenance).

use std::collections::HashMap;
use zigquant_core::{
    Price, Quantity, Symbol,
    event::{Candle, Timeframe, Trade},
};

#[derive(Debug, Clone)]
struct Bar {
    open: Price,
    high: Price,
    low: Price,
    close: Price,
    volume: Quantity,
    bucket_start_ns: i64,
}

impl Bar {
    fn open_with(trade: &Trade, bucket_start_ns: i64) -> Self {
        Self {
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: trade.qty,
            bucket_start_ns,
        }
    }

    fn update(&mut self, trade: &Trade) {
        if trade.price.0 > self.high.0 {
            self.high = trade.price;
        }
        if trade.price.0 < self.low.0 {
            self.low = trade.price;
        }
        self.close = trade.price;
        self.volume = Quantity(self.volume.0.checked_add(trade.qty.0).unwrap_or(self.volume.0));
    }

    fn finish(&self, symbol: Symbol, timeframe: Timeframe, close_ns: i64) -> Candle {
        Candle {
            symbol,
            timeframe,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            close_ns,
        }
    }
}

/// Maintains one in-progress [`Bar`] per `(symbol, timeframe)` and emits a
/// [`Candle`] whenever a trade's timestamp crosses into the next bucket
/// (spec §4.C "candle construction").
#[derive(Debug, Default)]
pub struct CandleAggregator {
    timeframes: Vec<Timeframe>,
    open_bars: HashMap<(Symbol, Timeframe), Bar>,
}

impl CandleAggregator {
    pub fn new(timeframes: Vec<Timeframe>) -> Self {
        Self {
            timeframes,
            open_bars: HashMap::new(),
        }
    }

    /// Feeds one trade, returning any bars that closed as a result. A
    /// trade can close at most one bar per tracked timeframe, so the
    /// return value is bounded by `timeframes.len()`.
    pub fn on_trade(&mut self, trade: &Trade) -> Vec<Candle> {
        let mut closed = Vec::new();
        for timeframe in self.timeframes.clone() {
            let bucket_ns = timeframe.as_nanos();
            let bucket_start = (trade.timestamp_ns / bucket_ns) * bucket_ns;
            let key = (trade.symbol.clone(), timeframe);

            match self.open_bars.get_mut(&key) {
                Some(bar) if bar.bucket_start_ns == bucket_start => {
                    bar.update(trade);
                }
                Some(bar) => {
                    closed.push(bar.finish(trade.symbol.clone(), timeframe, bar.bucket_start_ns + bucket_ns));
                    self.open_bars
                        .insert(key, Bar::open_with(trade, bucket_start));
                }
                None => {
                    self.open_bars
                        .insert(key, Bar::open_with(trade, bucket_start));
                }
            }
        }
        closed
    }

    /// Flushes every still-open bar as a candle (spec §4.C `stop()`
    /// draining sources before shutdown).
    pub fn flush(&mut self) -> Vec<Candle> {
        self.open_bars
            .drain()
            .map(|((symbol, timeframe), bar)| {
                bar.finish(symbol, timeframe, bar.bucket_start_ns + timeframe.as_nanos())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use zigquant_core::order::Side;

    fn trade(symbol: &str, price: rust_decimal::Decimal, qty: rust_decimal::Decimal, ts: i64) -> Trade {
        Trade {
            symbol: Symbol::new(symbol),
            price: Price::from(price),
            qty: Quantity::from(qty),
            side: Side::Buy,
            timestamp_ns: ts,
        }
    }

    #[test]
    fn aggregates_within_one_bucket() {
        let mut agg = CandleAggregator::new(vec![Timeframe::S1]);
        let sec = Timeframe::S1.as_nanos();

        assert!(agg.on_trade(&trade("BTC-USD", dec!(100), dec!(1), 0)).is_empty());
        assert!(agg.on_trade(&trade("BTC-USD", dec!(105), dec!(1), sec / 2)).is_empty());
        let closed = agg.on_trade(&trade("BTC-USD", dec!(95), dec!(1), sec));

        assert_eq!(closed.len(), 1);
        let bar = &closed[0];
        assert_eq!(bar.open, Price::from(dec!(100)));
        assert_eq!(bar.high, Price::from(dec!(105)));
        assert_eq!(bar.low, Price::from(dec!(100)));
        assert_eq!(bar.close, Price::from(dec!(105)));
        assert_eq!(bar.volume, Quantity::from(dec!(2)));
    }

    #[test]
    fn flush_emits_the_open_bar() {
        let mut agg = CandleAggregator::new(vec![Timeframe::M1]);
        agg.on_trade(&trade("ETH-USD", dec!(10), dec!(1), 0));
        let flushed = agg.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].symbol, Symbol::new("ETH-USD"));
    }

    #[test]
    fn independent_symbols_track_separately() {
        let mut agg = CandleAggregator::new(vec![Timeframe::S1]);
        let sec = Timeframe::S1.as_nanos();
        agg.on_trade(&trade("BTC-USD", dec!(100), dec!(1), 0));
        agg.on_trade(&trade("ETH-USD", dec!(10), dec!(1), 0));
        let closed_btc = agg.on_trade(&trade("BTC-USD", dec!(101), dec!(1), sec));
        assert_eq!(closed_btc.len(), 1);
        assert_eq!(closed_btc[0].symbol, Symbol::new("BTC-USD"));
    }
}
