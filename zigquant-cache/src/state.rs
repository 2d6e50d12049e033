//! Internal, lock-protected state owned exclusively by [`crate::Cache`].
//!
//! Grounded on `barter::engine::state::position::{Position, PositionManager}`
//! for the fill-application rules and `barter::engine::state::order::manager`
//! for the lifecycle-tracking contract, adapted from barter's
//! generically-indexed (`ExchangeKey`/`InstrumentKey`) state to the
//! symbol/client-id-keyed model of spec §3.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use zigquant_core::{
    Account, AccountId, ClientOrderId, Instrument, Order, OrderStatus, Position, Quote, Symbol,
    order::LifecycleKey,
};

/// Marks a [`LifecycleKey`] built from an `OrderFilled` wire event's own
/// incremental `fill_qty` rather than from an `OrderStatus` discriminant
/// (spec §4.D idempotence key). Outside the range `status_discriminant`
/// otherwise takes (0..=8), so it can never collide with a key derived
/// from a genuine status transition.
const FILL_WIRE_EVENT_DISCRIMINANT: u8 = 255;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheCounters {
    pub duplicate_events: u64,
    pub stale_dropped: u64,
    pub invariant_violations: u64,
}

/// A value-type copy of the full Cache state, used for checkpointing
/// (spec §4.B "Snapshot/restore").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub orders: Vec<Order>,
    pub positions: Vec<Position>,
    pub accounts: Vec<Account>,
    pub quotes: Vec<(Symbol, Quote)>,
    pub counters: CacheCounters,
}

#[derive(Debug, Default)]
pub struct CacheState {
    pub instruments: HashMap<Symbol, Instrument>,
    /// Insertion-ordered by `client_id` allocation, which is monotonic —
    /// satisfies "`open_orders()` ordered by creation time" without a
    /// separate index.
    pub orders: IndexMap<ClientOrderId, Order>,
    pub orders_by_instrument: HashMap<Symbol, Vec<ClientOrderId>>,
    pub positions: HashMap<Symbol, Position>,
    pub accounts: HashMap<AccountId, Account>,
    pub quotes: HashMap<Symbol, Quote>,
    pub seen_lifecycle: HashSet<LifecycleKey>,
    pub counters: CacheCounters,
}

impl CacheState {
    pub fn register_instrument(&mut self, instrument: Instrument) {
        self.instruments.insert(instrument.symbol.clone(), instrument);
    }

    pub fn update_quote(&mut self, symbol: Symbol, quote: Quote) {
        self.quotes.insert(symbol, quote);
    }

    /// Inserts a brand-new order (spec §4.D step 2: `order.pending`).
    pub fn insert_pending_order(&mut self, order: Order) {
        let client_id = order.client_id;
        let symbol = order.symbol.clone();
        self.orders.insert(client_id, order);
        self.orders_by_instrument
            .entry(symbol)
            .or_default()
            .push(client_id);
    }

    /// Applies a lifecycle transition to an existing order, enforcing the
    /// idempotence and out-of-order-safety rules of spec §4.D.
    ///
    /// Returns `true` if the transition was applied.
    pub fn apply_lifecycle(
        &mut self,
        client_id: ClientOrderId,
        mutate: impl FnOnce(&mut Order),
    ) -> bool {
        self.apply_lifecycle_keyed(client_id, None, mutate)
    }

    /// Like [`Self::apply_lifecycle`], but lets a caller whose wire event
    /// carries its own replay identity (a fill's *incremental* `fill_qty`,
    /// not the order's post-application cumulative total) supply the
    /// dedup key explicitly instead of having it derived from the order's
    /// state after `mutate` runs.
    ///
    /// The exact-key duplicate check runs *before* the terminal-order
    /// check (spec §4.D): a replay of an identical event against an order
    /// that has since reached a terminal status is still a duplicate, not
    /// a stale drop.
    fn apply_lifecycle_keyed(
        &mut self,
        client_id: ClientOrderId,
        explicit_key: Option<LifecycleKey>,
        mutate: impl FnOnce(&mut Order),
    ) -> bool {
        let Some(order) = self.orders.get_mut(&client_id) else {
            warn!(%client_id, "lifecycle event for unknown order dropped");
            self.counters.invariant_violations += 1;
            return false;
        };

        let mut prospective = order.clone();
        mutate(&mut prospective);
        let key = explicit_key.unwrap_or_else(|| LifecycleKey::new(&prospective));

        if self.seen_lifecycle.contains(&key) {
            debug!(%client_id, "duplicate lifecycle event dropped");
            self.counters.duplicate_events += 1;
            return false;
        }

        if order.is_terminal() {
            debug!(%client_id, "lifecycle event for terminal order dropped");
            self.counters.stale_dropped += 1;
            return false;
        }

        let previous = order.clone();
        *order = prospective;

        if !order.status.advances_from(&previous.status) && order.status != previous.status {
            debug!(%client_id, "out-of-order lifecycle event dropped");
            *order = previous;
            self.counters.stale_dropped += 1;
            return false;
        }

        if order.filled_qty.0 < previous.filled_qty.0 {
            warn!(%client_id, "filled_qty regression rejected");
            *order = previous;
            self.counters.invariant_violations += 1;
            return false;
        }

        self.seen_lifecycle.insert(key);
        true
    }

    /// Applies a fill: updates the order, then the position (spec §3
    /// invariants 3 & 4, §4.D "recomputing the Position").
    pub fn apply_fill(
        &mut self,
        client_id: ClientOrderId,
        fill_qty: zigquant_core::Quantity,
        fill_price: zigquant_core::Price,
        now_ns: i64,
    ) -> bool {
        let Some(order) = self.orders.get(&client_id) else {
            warn!(%client_id, "fill for unknown order dropped");
            self.counters.invariant_violations += 1;
            return false;
        };
        let symbol = order.symbol.clone();
        let side = order.side;

        // Keyed on the wire event's own (client_id, incremental fill_qty,
        // update_ns), not the post-application cumulative `filled_qty`:
        // two replays of the same partial fill would otherwise land on
        // different cumulative totals (e.g. 0->0.5 then 0.5->1.0) and
        // never compare equal, letting the duplicate double-apply.
        let key = LifecycleKey {
            client_id,
            status_discriminant: FILL_WIRE_EVENT_DISCRIMINANT,
            filled_qty: fill_qty,
            update_ns: now_ns,
        };

        let applied = self.apply_lifecycle_keyed(client_id, Some(key), |order| {
            let new_filled = order.filled_qty.0.checked_add(fill_qty.0).unwrap_or(order.filled_qty.0);
            order.filled_qty = zigquant_core::Quantity(new_filled);
            order.updated_ns = now_ns;
            order.status = if order.filled_qty.0 >= order.qty.0 {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
        });

        if !applied {
            return false;
        }

        self.positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::flat(symbol, now_ns))
            .apply_fill(side, fill_qty, fill_price, now_ns);

        true
    }

    pub fn cancel_order(&mut self, client_id: ClientOrderId, now_ns: i64) -> bool {
        self.apply_lifecycle(client_id, |order| {
            order.status = OrderStatus::Canceled;
            order.updated_ns = now_ns;
        })
    }

    pub fn open_order_ids(&self) -> impl Iterator<Item = &ClientOrderId> {
        self.orders
            .iter()
            .filter(|(_, order)| !order.is_terminal())
            .map(|(id, _)| id)
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            orders: self.orders.values().cloned().collect(),
            positions: self.positions.values().cloned().collect(),
            accounts: self.accounts.values().cloned().collect(),
            quotes: self.quotes.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            counters: self.counters.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        self.orders.clear();
        self.orders_by_instrument.clear();
        for order in snapshot.orders {
            let client_id = order.client_id;
            let symbol = order.symbol.clone();
            self.orders.insert(client_id, order);
            self.orders_by_instrument
                .entry(symbol)
                .or_default()
                .push(client_id);
        }
        self.positions = snapshot
            .positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        self.accounts = snapshot
            .accounts
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        self.quotes = snapshot.quotes.into_iter().collect();
        self.counters = snapshot.counters;
        self.seen_lifecycle.clear();
    }
}
