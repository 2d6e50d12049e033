//! In-process simulated exchange driving `BacktestRunner` (spec §4.E).
//!
//! Grounded on `barter-execution::simulated::exchange`: orders are matched
//! synchronously against the most recently observed trade/quote price
//! rather than a real order book. The `ExchangeClient` port carries no
//! order-type field (spec §6), so the only signal available at `submit`
//! time is whether a price was given: `None` is treated as a market order
//! that fills immediately against the last observed price, `Some(price)`
//! as a limit order that rests until the market crosses it.

use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
};
use zigquant_core::{
    Price, Quantity, Symbol,
    event::Event,
    order::{ClientOrderId, ExchangeOrderId, OrderStatus, RejectReason, Side},
    ports::{Ack, ExchangeClient, PortError, PortResult},
};

struct Resting {
    client_id: ClientOrderId,
    symbol: Symbol,
    side: Side,
    qty: Quantity,
    limit: Option<Price>,
    status: OrderStatus,
}

/// A deterministic, in-process matching engine: no randomness, no wall
/// clock, fills driven entirely by the replayed market data stream (spec
/// §8 property 6: "backtest determinism").
pub struct MatchingEngine {
    next_exchange_id: AtomicU64,
    orders: Mutex<HashMap<ExchangeOrderId, Resting>>,
    by_client: Mutex<HashMap<ClientOrderId, ExchangeOrderId>>,
    last_price: Mutex<HashMap<Symbol, Price>>,
    events: Mutex<VecDeque<Event>>,
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self {
            next_exchange_id: AtomicU64::new(1),
            orders: Mutex::new(HashMap::new()),
            by_client: Mutex::new(HashMap::new()),
            last_price: Mutex::new(HashMap::new()),
            events: Mutex::new(VecDeque::new()),
        }
    }

    fn allocate_exchange_id(&self) -> ExchangeOrderId {
        let id = self.next_exchange_id.fetch_add(1, Ordering::Relaxed);
        ExchangeOrderId(format!("sim-{id}"))
    }

    fn last_price(&self, symbol: &Symbol) -> Option<Price> {
        self.last_price.lock().get(symbol).copied()
    }

    /// The most recent trade/quote price observed for `symbol`, used by
    /// `BacktestRunner` to mark open positions for the equity curve.
    pub fn last_observed_price(&self, symbol: &Symbol) -> Option<Price> {
        self.last_price(symbol)
    }

    /// Feeds one polled market data event through the book, called once
    /// per event by `BacktestRunner` so resting limit orders can cross.
    pub fn on_market_event(&self, event: &Event) {
        let (symbol, price, ts) = match event {
            Event::Trade(trade) => (trade.symbol.clone(), trade.price, trade.timestamp_ns),
            Event::Quote { symbol, quote } => {
                (symbol.clone(), quote.mid_price(), quote.timestamp_ns)
            }
            _ => return,
        };
        self.last_price.lock().insert(symbol.clone(), price);
        self.try_fill_resting(&symbol, price, ts);
    }

    fn try_fill_resting(&self, symbol: &Symbol, price: Price, ts: i64) {
        let mut filled = Vec::new();
        {
            let mut orders = self.orders.lock();
            for resting in orders.values_mut() {
                if &resting.symbol != symbol || resting.status.is_terminal() {
                    continue;
                }
                let limit = resting.limit.unwrap_or(price);
                let crosses = match resting.side {
                    Side::Buy => price <= limit,
                    Side::Sell => price >= limit,
                };
                if crosses {
                    resting.status = OrderStatus::Filled;
                    filled.push((resting.client_id, resting.qty, limit));
                }
            }
        }
        let mut events = self.events.lock();
        for (client_id, qty, fill_price) in filled {
            events.push_back(Event::OrderFilled {
                client_id,
                fill_qty: qty,
                fill_price,
                timestamp_ns: ts,
            });
        }
    }
}

impl ExchangeClient for MatchingEngine {
    fn submit(
        &self,
        client_id: ClientOrderId,
        symbol: &Symbol,
        side: Side,
        qty: Quantity,
        price: Option<Price>,
    ) -> PortResult<Ack> {
        let exchange_id = self.allocate_exchange_id();

        match price {
            None => {
                let Some(fill_price) = self.last_price(symbol) else {
                    return Err(PortError::Rejected(RejectReason::Other(
                        "no reference price available for market order".into(),
                    )));
                };
                self.orders.lock().insert(
                    exchange_id.clone(),
                    Resting {
                        client_id,
                        symbol: symbol.clone(),
                        side,
                        qty,
                        limit: None,
                        status: OrderStatus::Filled,
                    },
                );
                self.by_client.lock().insert(client_id, exchange_id.clone());
                self.events.lock().push_back(Event::OrderFilled {
                    client_id,
                    fill_qty: qty,
                    fill_price,
                    timestamp_ns: 0,
                });
                Ok(Ack {
                    exchange_id,
                    status: OrderStatus::Submitted,
                })
            }
            Some(limit_price) => {
                self.orders.lock().insert(
                    exchange_id.clone(),
                    Resting {
                        client_id,
                        symbol: symbol.clone(),
                        side,
                        qty,
                        limit: Some(limit_price),
                        status: OrderStatus::Submitted,
                    },
                );
                self.by_client.lock().insert(client_id, exchange_id.clone());
                if let Some(last) = self.last_price(symbol) {
                    self.try_fill_resting(symbol, last, 0);
                }
                Ok(Ack {
                    exchange_id,
                    status: OrderStatus::Submitted,
                })
            }
        }
    }

    fn cancel(&self, exchange_id: &ExchangeOrderId) -> PortResult<()> {
        let mut orders = self.orders.lock();
        let resting = orders.get_mut(exchange_id).ok_or(PortError::NotFound)?;
        if resting.status.is_terminal() {
            return Err(PortError::Rejected(RejectReason::Other(
                "order already terminal".into(),
            )));
        }
        resting.status = OrderStatus::Canceled;
        Ok(())
    }

    fn query(&self, client_id: ClientOrderId) -> PortResult<Ack> {
        let by_client = self.by_client.lock();
        let exchange_id = by_client.get(&client_id).ok_or(PortError::NotFound)?;
        let orders = self.orders.lock();
        let resting = orders.get(exchange_id).ok_or(PortError::NotFound)?;
        Ok(Ack {
            exchange_id: exchange_id.clone(),
            status: resting.status.clone(),
        })
    }

    fn drain_events(&self) -> Vec<Event> {
        self.events.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use zigquant_core::event::Trade;

    fn sym() -> Symbol {
        Symbol::new("BTC-USD")
    }

    #[test]
    fn market_order_fills_immediately_at_last_price() {
        let matching = MatchingEngine::new();
        matching.on_market_event(&Event::Trade(Trade {
            symbol: sym(),
            price: Price::from(dec!(100)),
            qty: Quantity::from(dec!(1)),
            side: Side::Buy,
            timestamp_ns: 1,
        }));

        let ack = matching
            .submit(ClientOrderId(1), &sym(), Side::Buy, Quantity::from(dec!(1)), None)
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Submitted);

        let events = matching.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::OrderFilled { fill_price, .. } if fill_price == Price::from(dec!(100))));
    }

    #[test]
    fn market_order_without_any_observed_price_is_rejected() {
        let matching = MatchingEngine::new();
        let result = matching.submit(ClientOrderId(1), &sym(), Side::Buy, Quantity::from(dec!(1)), None);
        assert!(matches!(result, Err(PortError::Rejected(_))));
    }

    #[test]
    fn limit_order_rests_until_price_crosses() {
        let matching = MatchingEngine::new();
        let ack = matching
            .submit(
                ClientOrderId(1),
                &sym(),
                Side::Buy,
                Quantity::from(dec!(1)),
                Some(Price::from(dec!(90))),
            )
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Submitted);
        assert!(matching.drain_events().is_empty());

        matching.on_market_event(&Event::Trade(Trade {
            symbol: sym(),
            price: Price::from(dec!(95)),
            qty: Quantity::from(dec!(1)),
            side: Side::Sell,
            timestamp_ns: 1,
        }));
        assert!(matching.drain_events().is_empty());

        matching.on_market_event(&Event::Trade(Trade {
            symbol: sym(),
            price: Price::from(dec!(88)),
            qty: Quantity::from(dec!(1)),
            side: Side::Sell,
            timestamp_ns: 2,
        }));
        let events = matching.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::OrderFilled { fill_price, .. } if fill_price == Price::from(dec!(90))));
    }

    #[test]
    fn cancel_removes_a_resting_order_before_it_crosses() {
        let matching = MatchingEngine::new();
        let ack = matching
            .submit(
                ClientOrderId(1),
                &sym(),
                Side::Buy,
                Quantity::from(dec!(1)),
                Some(Price::from(dec!(90))),
            )
            .unwrap();
        matching.cancel(&ack.exchange_id).unwrap();

        matching.on_market_event(&Event::Trade(Trade {
            symbol: sym(),
            price: Price::from(dec!(80)),
            qty: Quantity::from(dec!(1)),
            side: Side::Sell,
            timestamp_ns: 1,
        }));
        assert!(matching.drain_events().is_empty());
        assert_eq!(matching.query(ClientOrderId(1)).unwrap().status, OrderStatus::Canceled);
    }
}
