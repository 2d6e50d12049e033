//! # zigquant-execution
//!
//! Order lifecycle manager: pre-submission tracking, acknowledgement
//! handling, cancellation, the kill switch, and crash recovery
//! (spec §4.D) — "no lost orders" is the central guarantee.
//!
//! Grounded on `barter-execution::order::state` (the
//! `OpenInFlight -> Open -> CancelInFlight -> {Cancelled, FullyFilled,
//! Failed, Expired}` machine, which maps directly onto this crate's
//! `Pending -> Submitted -> (PartiallyFilled)* -> terminal` DAG) and
//! `barter/src/execution/manager.rs`'s submit-then-track pipeline.

pub mod mock;

use parking_lot::RwLock;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tracing::{instrument, warn};
use zigquant_bus::MessageBus;
use zigquant_cache::Cache;
use zigquant_core::{
    Price, Quantity, Symbol,
    event::Event,
    order::{ClientOrderId, Order, OrderStatus, OrderType, RejectReason, Side},
    ports::{Ack, Clock, ExchangeClient, PortError, StateStore},
    topics,
};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("kill switch is engaged")]
    Halted,
    #[error("symbol {0} is halted pending resolution of an earlier uncertain order")]
    SymbolHalted(Symbol),
    #[error("order {0} is unknown to the cache")]
    UnknownOrder(ClientOrderId),
    #[error("order {0} is already in a terminal state")]
    AlreadyTerminal(ClientOrderId),
    #[error(transparent)]
    Port(#[from] PortError),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub submission_timeout_ms: u64,
    pub query_retry_max: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub cancel_orphan_orders: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            submission_timeout_ms: 5_000,
            query_retry_max: 3,
            reconnect_base_ms: 200,
            reconnect_max_ms: 5_000,
            cancel_orphan_orders: true,
        }
    }
}

/// A strategy's request to open or close exposure; `submit` turns this
/// into a tracked [`Order`] (spec §4.D "pre-submission tracking").
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderType,
    pub qty: Quantity,
    pub price: Option<Price>,
}

/// The order lifecycle manager described in spec §4.D.
pub struct ExecutionEngine {
    bus: Arc<MessageBus>,
    cache: Cache,
    exchange: Arc<dyn ExchangeClient>,
    clock: Arc<dyn Clock>,
    state_store: Option<Arc<dyn StateStore>>,
    config: ExecutionConfig,
    next_client_id: AtomicU64,
    halted: AtomicBool,
    halted_symbols: RwLock<HashSet<Symbol>>,
}

impl ExecutionEngine {
    pub fn new(
        bus: Arc<MessageBus>,
        cache: Cache,
        exchange: Arc<dyn ExchangeClient>,
        clock: Arc<dyn Clock>,
        state_store: Option<Arc<dyn StateStore>>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            bus,
            cache,
            exchange,
            clock,
            state_store,
            config,
            next_client_id: AtomicU64::new(1),
            halted: AtomicBool::new(false),
            halted_symbols: RwLock::new(HashSet::new()),
        }
    }

    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.halted.store(false, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn halt_symbol(&self, symbol: Symbol) {
        self.halted_symbols.write().insert(symbol);
    }

    pub fn resume_symbol(&self, symbol: &Symbol) {
        self.halted_symbols.write().remove(symbol);
    }

    pub fn is_symbol_halted(&self, symbol: &Symbol) -> bool {
        self.halted_symbols.read().contains(symbol)
    }

    fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.config.submission_timeout_ms)
    }

    /// Runs `f` on a worker thread and waits at most `timeout`, converting
    /// an unmet deadline into [`PortError::Timeout`] (spec §5: "every
    /// outbound exchange call carries a timeout").
    fn call_with_timeout<T: Send + 'static>(
        timeout: Duration,
        f: impl FnOnce() -> Result<T, PortError> + Send + 'static,
    ) -> Result<T, PortError> {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(f());
        });
        rx.recv_timeout(timeout).unwrap_or(Err(PortError::Timeout))
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self.config.reconnect_base_ms.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(scaled.min(self.config.reconnect_max_ms))
    }

    /// Polls `ExchangeClient::query` up to `query_retry_max` times with
    /// exponential back-off, returning the first resolved acknowledgement
    /// (spec §4.D: "trigger query-by-client_id ... up to N times with
    /// exponential back-off").
    fn query_until_resolved(&self, client_id: ClientOrderId) -> Option<Ack> {
        for attempt in 0..self.config.query_retry_max {
            self.clock.sleep(self.backoff_for(attempt));
            if let Ok(ack) = self.exchange.query(client_id) {
                return Some(ack);
            }
        }
        None
    }

    /// Accepts a strategy's order intent and drives it through the
    /// pre-submission/acknowledgement pipeline (spec §4.D).
    #[instrument(skip(self, intent), fields(symbol = %intent.symbol))]
    pub fn submit(&self, intent: OrderIntent) -> ExecutionResult<ClientOrderId> {
        if self.is_halted() {
            return Err(ExecutionError::Halted);
        }
        if self.is_symbol_halted(&intent.symbol) {
            return Err(ExecutionError::SymbolHalted(intent.symbol));
        }

        let client_id = ClientOrderId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let now_ns = self.clock.now_ns();
        let order = Order::new_pending(
            client_id,
            intent.symbol.clone(),
            intent.side,
            intent.kind,
            intent.qty,
            intent.price,
            now_ns,
        );

        if let Some(store) = &self.state_store {
            if let Ok(bytes) = serde_json::to_vec(&order) {
                if let Err(err) = store.append_event(&bytes) {
                    warn!(%client_id, %err, "failed to persist pending order before submission");
                }
            }
        }
        self.bus
            .publish(topics::ORDER_PENDING, Event::OrderPending(order.clone()));

        let exchange = self.exchange.clone();
        let symbol = intent.symbol.clone();
        let side = intent.side;
        let qty = intent.qty;
        let price = intent.price;
        let result = Self::call_with_timeout(self.submission_timeout(), move || {
            exchange.submit(client_id, &symbol, side, qty, price)
        });

        match result {
            Ok(ack) => {
                self.bus.publish(
                    topics::ORDER_SUBMITTED,
                    Event::OrderSubmitted {
                        client_id,
                        exchange_id: ack.exchange_id,
                    },
                );
            }
            Err(PortError::Rejected(reason)) => {
                self.bus.publish(
                    topics::ORDER_REJECTED,
                    Event::OrderRejected { client_id, reason },
                );
            }
            Err(_) => self.resolve_uncertain_submission(client_id, &intent.symbol),
        }

        Ok(client_id)
    }

    fn resolve_uncertain_submission(&self, client_id: ClientOrderId, symbol: &Symbol) {
        match self.query_until_resolved(client_id) {
            Some(Ack { status: OrderStatus::Rejected { reason }, .. }) => {
                self.bus.publish(
                    topics::ORDER_REJECTED,
                    Event::OrderRejected { client_id, reason },
                );
            }
            Some(ack @ Ack { status: OrderStatus::Filled | OrderStatus::Canceled, .. }) => {
                self.apply_reconciled_status(client_id, ack.status);
            }
            Some(Ack { status: OrderStatus::PartiallyFilled, .. }) => {
                // A concrete fill event still arrives separately through
                // drain_exchange_events; nothing uncertain to surface.
            }
            Some(Ack { exchange_id, status }) if !status.is_terminal() => {
                // The exchange did process it after all; attach the
                // exchange id we only now learned about and clear the
                // uncertainty the caller's timeout introduced.
                self.bus.publish(
                    topics::ORDER_SUBMITTED,
                    Event::OrderSubmitted { client_id, exchange_id },
                );
            }
            Some(_) | None => {
                self.bus.publish(
                    topics::ORDER_UNCERTAIN,
                    Event::OrderUncertain { client_id },
                );
                self.halt_symbol(symbol.clone());
            }
        }
    }

    /// Requests cancellation of an open order (spec §4.D "Cancellation
    /// protocol").
    #[instrument(skip(self))]
    pub fn cancel(&self, client_id: ClientOrderId) -> ExecutionResult<()> {
        let order = self
            .cache
            .get_order(client_id)
            .ok_or(ExecutionError::UnknownOrder(client_id))?;
        if order.is_terminal() {
            return Err(ExecutionError::AlreadyTerminal(client_id));
        }

        let Some(exchange_id) = order.exchange_id.clone() else {
            // Never acknowledged by the exchange; safe to cancel locally.
            self.bus.publish(
                topics::ORDER_CANCELED,
                Event::OrderCanceled {
                    client_id,
                    timestamp_ns: self.clock.now_ns(),
                },
            );
            return Ok(());
        };

        self.bus.publish(
            topics::ORDER_CANCEL_REQUESTED,
            Event::OrderCancelRequested { client_id },
        );

        let exchange = self.exchange.clone();
        let exchange_id_for_call = exchange_id.clone();
        let result = Self::call_with_timeout(self.submission_timeout(), move || {
            exchange.cancel(&exchange_id_for_call)
        });

        match result {
            Ok(()) => {
                self.bus.publish(
                    topics::ORDER_CANCELED,
                    Event::OrderCanceled {
                        client_id,
                        timestamp_ns: self.clock.now_ns(),
                    },
                );
            }
            Err(PortError::Rejected(_)) => {
                // Exchange refused the cancel -- most likely the order
                // already filled. The fill itself arrives through
                // drain_events and resolves the order independently.
            }
            Err(_) => match self.query_until_resolved(client_id) {
                Some(Ack { status: OrderStatus::Canceled, .. }) => {
                    self.bus.publish(
                        topics::ORDER_CANCELED,
                        Event::OrderCanceled {
                            client_id,
                            timestamp_ns: self.clock.now_ns(),
                        },
                    );
                }
                Some(Ack { status, .. }) if status.is_terminal() => {}
                _ => {
                    self.bus.publish(
                        topics::ORDER_UNCERTAIN,
                        Event::OrderUncertain { client_id },
                    );
                }
            },
        }

        Ok(())
    }

    /// Drains whatever the exchange has pushed since the last call and
    /// applies it — fills, cancels, connection state (spec §4.D
    /// "Lifecycle events").
    pub fn drain_exchange_events(&self) {
        for event in self.exchange.drain_events() {
            self.ingest_exchange_event(event);
        }
    }

    fn ingest_exchange_event(&self, event: Event) {
        match &event {
            Event::OrderFilled { client_id, .. } => {
                let symbol = self.cache.get_order(*client_id).map(|o| o.symbol);
                self.bus.publish(topics::ORDER_FILLED, event.clone());
                if let Some(symbol) = symbol {
                    if let Some(position) = self.cache.get_position(&symbol) {
                        self.bus
                            .publish(topics::POSITION_UPDATED, Event::PositionUpdated(position));
                    }
                }
            }
            Event::OrderCanceled { .. } => self.bus.publish(topics::ORDER_CANCELED, event.clone()),
            Event::OrderRejected { .. } => self.bus.publish(topics::ORDER_REJECTED, event.clone()),
            Event::ConnectionState { state, .. } => {
                let topic = match state {
                    zigquant_core::event::ConnectionState::Connected => topics::SYSTEM_CONNECTED,
                    zigquant_core::event::ConnectionState::Disconnected
                    | zigquant_core::event::ConnectionState::Reconnecting => {
                        topics::SYSTEM_DISCONNECTED
                    }
                };
                self.bus.publish(topic, event.clone());
            }
            _ => {}
        }
    }

    /// Crash/boot recovery sequence (spec §4.D "Recovery").
    #[instrument(skip(self))]
    pub fn recover(&self) -> ExecutionResult<zigquant_core::event::RecoverySummary> {
        if let Some(store) = &self.state_store {
            self.cache.restore_from(store.as_ref())?;
        }

        let mut recovered = 0usize;
        let mut orphan_cancelled = 0usize;
        let mut reconciled = 0usize;

        for order in self.cache.open_orders() {
            recovered += 1;
            match self.exchange.query(order.client_id) {
                Ok(ack) if order.exchange_id.is_some() => {
                    reconciled += 1;
                    self.apply_reconciled_status(order.client_id, ack.status);
                }
                Ok(ack) if !matches!(ack.status, OrderStatus::Pending) => {
                    // exchange knows about an order we only recorded as
                    // Pending locally: it made it out the door after all.
                    reconciled += 1;
                    self.bus.publish(
                        topics::ORDER_SUBMITTED,
                        Event::OrderSubmitted {
                            client_id: order.client_id,
                            exchange_id: ack.exchange_id.clone(),
                        },
                    );
                    self.apply_reconciled_status(order.client_id, ack.status);
                }
                _ if order.exchange_id.is_none() && self.config.cancel_orphan_orders => {
                    self.bus.publish(
                        topics::ORDER_CANCELED,
                        Event::OrderCanceled {
                            client_id: order.client_id,
                            timestamp_ns: self.clock.now_ns(),
                        },
                    );
                    self.bus.publish(
                        topics::SYSTEM_ERROR,
                        Event::SystemError(zigquant_core::event::SystemErrorPayload {
                            client_id: Some(order.client_id),
                            reason_code: RejectReason::OrphanRecovered.to_string(),
                            message: "pending order had no exchange record at recovery; cancelled"
                                .into(),
                        }),
                    );
                    orphan_cancelled += 1;
                }
                _ => {}
            }
        }

        let summary = zigquant_core::event::RecoverySummary {
            recovered_orders: recovered,
            orphan_cancelled,
            reconciled,
        };
        self.bus
            .publish(topics::SYSTEM_RECOVERED, Event::SystemRecovered(summary.clone()));
        Ok(summary)
    }

    fn apply_reconciled_status(&self, client_id: ClientOrderId, status: OrderStatus) {
        match status {
            OrderStatus::Canceled => self.bus.publish(
                topics::ORDER_CANCELED,
                Event::OrderCanceled {
                    client_id,
                    timestamp_ns: self.clock.now_ns(),
                },
            ),
            OrderStatus::Rejected { reason } => self.bus.publish(
                topics::ORDER_REJECTED,
                Event::OrderRejected { client_id, reason },
            ),
            OrderStatus::Filled | OrderStatus::PartiallyFilled => {
                warn!(
                    %client_id,
                    "recovery found a fill already applied at the exchange; \
                     awaiting the explicit fill event to update the position"
                );
            }
            _ => {}
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }
}
