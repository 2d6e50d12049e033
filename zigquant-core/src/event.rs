//! The single tagged-union `Event` type published on the [`crate::ports`]'s
//! message bus port.
//!
//! Spec §9 ("Dynamic typing over events") calls for every event to become a
//! variant of one tagged union with explicit payload structs, replacing the
//! teacher's own Rust-native approach of several distinct event types
//! (`MarketEvent`, `AccountEvent`, ...) unified by trait bounds. Because
//! zigQuant's MessageBus (spec §4.A) is a single topic-routed bus rather
//! than several statically-typed channels, one closed `Event` enum is the
//! more faithful fit here.

use crate::{
    decimal::{Price, Quantity},
    instrument::{Instrument, Quote, Symbol},
    order::{ClientOrderId, ExchangeOrderId, Order, RejectReason, Side},
    position::Position,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    S1,
    S5,
    M1,
    M5,
    M15,
    H1,
    D1,
}

impl Timeframe {
    pub fn as_nanos(&self) -> i64 {
        const SEC: i64 = 1_000_000_000;
        match self {
            Timeframe::S1 => SEC,
            Timeframe::S5 => 5 * SEC,
            Timeframe::M1 => 60 * SEC,
            Timeframe::M5 => 5 * 60 * SEC,
            Timeframe::M15 => 15 * 60 * SEC,
            Timeframe::H1 => 60 * 60 * SEC,
            Timeframe::D1 => 24 * 60 * 60 * SEC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: Symbol,
    pub price: Price,
    pub qty: Quantity,
    pub side: Side,
    pub timestamp_ns: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookLevel {
    pub price: Price,
    pub qty: Quantity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookUpdate {
    pub symbol: Symbol,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
    pub timestamp_ns: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Quantity,
    /// Nanosecond timestamp of the bar's close (when it was emitted).
    pub close_ns: i64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySummary {
    pub recovered_orders: usize,
    pub orphan_cancelled: usize,
    pub reconciled: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemErrorPayload {
    pub client_id: Option<ClientOrderId>,
    pub reason_code: String,
    pub message: String,
}

/// A single tagged union over every event the core produces or consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    MarketData(Instrument),
    Quote { symbol: Symbol, quote: Quote },
    Trade(Trade),
    OrderbookUpdate(OrderbookUpdate),
    Candle(Candle),

    OrderPending(Order),
    OrderSubmitted {
        client_id: ClientOrderId,
        exchange_id: ExchangeOrderId,
    },
    OrderCancelRequested {
        client_id: ClientOrderId,
    },
    OrderFilled {
        client_id: ClientOrderId,
        fill_qty: Quantity,
        fill_price: Price,
        timestamp_ns: i64,
    },
    OrderCanceled {
        client_id: ClientOrderId,
        timestamp_ns: i64,
    },
    OrderRejected {
        client_id: ClientOrderId,
        reason: RejectReason,
    },
    OrderUncertain {
        client_id: ClientOrderId,
    },
    PositionUpdated(Position),

    Tick {
        timestamp_ns: i64,
    },
    ConnectionState {
        exchange: Symbol,
        state: ConnectionState,
    },
    SystemRecovered(RecoverySummary),
    SystemError(SystemErrorPayload),
    Shutdown,
}

/// Optional per-event identifier, attached at publish time when a caller
/// needs end-to-end correlation (spec §3: "per-event UUID optional").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Option<Uuid>,
    pub published_at: DateTime<Utc>,
    pub event: Event,
}

impl Envelope {
    pub fn new(event: Event, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            published_at: now,
            event,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}
