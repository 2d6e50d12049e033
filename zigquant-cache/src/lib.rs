//! # zigquant-cache
//!
//! The authoritative in-memory state store (spec §4.B). `Cache` subscribes
//! itself to the order/position/account/market-data topics on the
//! [`MessageBus`] and is the single place every other component reads
//! current orders, positions, accounts and quotes from — nothing else is
//! permitted to hold a second copy of this state (spec §3).
//!
//! Grounded on `barter::engine::state::EngineState`, which plays the same
//! "subscribe to the event stream, maintain derived lookups" role against
//! barter's own `AccountStreamEvent`/`MarketStreamEvent` feed.

pub mod checkpoint;
pub mod state;

use parking_lot::RwLock;
use state::{CacheCounters, CacheSnapshot, CacheState};
use std::sync::Arc;
use tracing::{debug, instrument};
use zigquant_bus::MessageBus;
use zigquant_core::{
    Account, AccountId, ClientOrderId, Envelope, Event, Instrument, Order, Position, Price, Quote,
    Symbol,
    ports::PortResult,
};

/// Thread-safe, read-heavy state store (spec §4.B). Cloning a `Cache`
/// shares the same underlying state — it is designed to be held by every
/// component that needs read access, the same way `barter`'s
/// `EngineState` is shared behind an `Arc` across its strategy and risk
/// layers.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<RwLock<CacheState>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheState::default())),
        }
    }

    /// Subscribes this cache to every topic it needs to stay coherent
    /// (spec §4.B: "subscribes to `order.#`, `position.#`, `account.#`,
    /// `market_data.#`"). The returned `Cache` keeps the subscriptions
    /// alive for as long as it (or a clone) is held — the bus only drops
    /// a handler when explicitly unsubscribed, which this crate never
    /// does, since the cache's lifetime is tied to the whole engine's.
    pub fn attach(bus: &MessageBus) -> Self {
        let cache = Self::new();

        let on_order = cache.clone();
        bus.subscribe(zigquant_core::topics::ORDER_WILDCARD, move |event| {
            on_order.handle_order_event(event);
            Ok(())
        });

        let on_position = cache.clone();
        bus.subscribe(zigquant_core::topics::POSITION_WILDCARD, move |event| {
            on_position.handle_position_event(event);
            Ok(())
        });

        let on_account = cache.clone();
        bus.subscribe(zigquant_core::topics::ACCOUNT_WILDCARD, move |event| {
            on_account.handle_account_event(event);
            Ok(())
        });

        let on_market = cache.clone();
        bus.subscribe(zigquant_core::topics::MARKET_DATA_WILDCARD, move |event| {
            on_market.handle_market_event(event);
            Ok(())
        });

        cache
    }

    fn handle_order_event(&self, event: &Event) {
        let mut state = self.inner.write();
        match event {
            Event::OrderPending(order) => state.insert_pending_order(order.clone()),
            Event::OrderSubmitted { client_id, exchange_id } => {
                state.apply_lifecycle(*client_id, |order| {
                    order.exchange_id = Some(exchange_id.clone());
                    order.status = zigquant_core::OrderStatus::Submitted;
                });
            }
            Event::OrderFilled { client_id, fill_qty, fill_price, timestamp_ns } => {
                state.apply_fill(*client_id, *fill_qty, *fill_price, *timestamp_ns);
            }
            Event::OrderCancelRequested { client_id } => {
                state.apply_lifecycle(*client_id, |order| {
                    order.status = zigquant_core::OrderStatus::CancelPending;
                });
            }
            Event::OrderCanceled { client_id, timestamp_ns } => {
                state.cancel_order(*client_id, *timestamp_ns);
            }
            Event::OrderRejected { client_id, reason } => {
                state.apply_lifecycle(*client_id, |order| {
                    order.status = zigquant_core::OrderStatus::Rejected {
                        reason: reason.clone(),
                    };
                });
            }
            Event::OrderUncertain { client_id } => {
                state.apply_lifecycle(*client_id, |order| {
                    order.status = zigquant_core::OrderStatus::Unknown;
                });
            }
            other => debug!(?other, "order topic received a non-order event"),
        }
    }

    fn handle_position_event(&self, event: &Event) {
        if let Event::PositionUpdated(position) = event {
            self.inner
                .write()
                .positions
                .insert(position.symbol.clone(), position.clone());
        }
    }

    fn handle_account_event(&self, event: &Event) {
        if let Event::SystemRecovered(_) = event {
            return;
        }
        // Account updates are out of the spec's core Event set beyond
        // position/order derived fields; external callers that maintain
        // their own Account view call `upsert_account` directly.
        let _ = event;
    }

    fn handle_market_event(&self, event: &Event) {
        let mut state = self.inner.write();
        match event {
            Event::MarketData(instrument) => state.register_instrument(instrument.clone()),
            Event::Quote { symbol, quote } => state.update_quote(symbol.clone(), *quote),
            _ => {}
        }
    }

    // -- write API used directly by components that do not go through the
    // bus (execution engine account bookkeeping, test setup) --

    pub fn register_instrument(&self, instrument: Instrument) {
        self.inner.write().register_instrument(instrument);
    }

    pub fn upsert_account(&self, account: Account) {
        self.inner.write().accounts.insert(account.id.clone(), account);
    }

    #[instrument(skip(self))]
    pub fn insert_pending_order(&self, order: Order) {
        self.inner.write().insert_pending_order(order);
    }

    // -- read API (spec §4.B) --

    pub fn get_order(&self, client_id: ClientOrderId) -> Option<Order> {
        self.inner.read().orders.get(&client_id).cloned()
    }

    /// Open orders ordered by creation time (spec §4.B).
    pub fn open_orders(&self) -> Vec<Order> {
        let state = self.inner.read();
        state
            .open_order_ids()
            .filter_map(|id| state.orders.get(id).cloned())
            .collect()
    }

    pub fn orders_by_instrument(&self, symbol: &Symbol) -> Vec<Order> {
        let state = self.inner.read();
        state
            .orders_by_instrument
            .get(symbol)
            .into_iter()
            .flatten()
            .filter_map(|id| state.orders.get(id).cloned())
            .collect()
    }

    pub fn get_position(&self, symbol: &Symbol) -> Option<Position> {
        self.inner.read().positions.get(symbol).cloned()
    }

    pub fn all_positions(&self) -> Vec<Position> {
        self.inner.read().positions.values().cloned().collect()
    }

    pub fn get_account(&self, id: &AccountId) -> Option<Account> {
        self.inner.read().accounts.get(id).cloned()
    }

    pub fn get_quote(&self, symbol: &Symbol) -> Option<Quote> {
        self.inner.read().quotes.get(symbol).copied()
    }

    pub fn mid_price(&self, symbol: &Symbol) -> Option<Price> {
        self.get_quote(symbol).map(|q| q.mid_price())
    }

    pub fn spread(&self, symbol: &Symbol) -> Option<Price> {
        self.get_quote(symbol).map(|q| q.spread())
    }

    pub fn counters(&self) -> CacheCounters {
        self.inner.read().counters.clone()
    }

    // -- checkpointing (spec §4.B, §6) --

    pub fn snapshot(&self) -> CacheSnapshot {
        self.inner.read().snapshot()
    }

    pub fn restore(&self, snapshot: CacheSnapshot) {
        self.inner.write().restore(snapshot);
    }

    /// Encodes the current state into the checkpoint binary layout and
    /// hands it to `store` (spec §6: "Checkpoint file layout").
    pub fn checkpoint_to(
        &self,
        store: &dyn zigquant_core::ports::StateStore,
        now_ns: i64,
    ) -> PortResult<()> {
        let snapshot = self.snapshot();
        let (bytes, checksum) = checkpoint::encode(&snapshot, now_ns);
        store.save_snapshot(&bytes, checksum)
    }

    /// Loads and applies the latest checkpoint from `store`, if any
    /// (spec §4.D recovery sequence step 1).
    pub fn restore_from(&self, store: &dyn zigquant_core::ports::StateStore) -> PortResult<bool> {
        match store.load_latest()? {
            Some((bytes, checksum)) => {
                let snapshot = checkpoint::decode(&bytes, checksum).map_err(|e| {
                    zigquant_core::ports::PortError::Rejected(
                        zigquant_core::RejectReason::Other(e.to_string()),
                    )
                })?;
                self.restore(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Wraps an [`Envelope`] back into a bare [`Event`] for handlers that do
/// not need publish metadata. Bus handlers currently receive `&Event`
/// directly; this exists for call sites that construct envelopes when
/// replaying a persisted event log (spec §6 "append_event/replay_since").
pub fn event_of(envelope: &Envelope) -> &Event {
    &envelope.event
}
