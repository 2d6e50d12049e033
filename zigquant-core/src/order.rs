//! Order entity and lifecycle state machine.
//!
//! The state machine mirrors `barter-execution::order::state`
//! (`OpenInFlight -> Open -> CancelInFlight -> {Cancelled, FullyFilled,
//! Failed, Expired}`), adapted to the client-id-first pre-submission
//! tracking model of spec §4.D: `Pending` exists *before* the exchange has
//! even acknowledged the order, and `client_id` — not `exchange_id` — is
//! the key used everywhere until the order terminates.

use crate::{
    decimal::{Price, Quantity},
    instrument::Symbol,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Locally assigned, monotonically increasing, never-reused order
/// identifier (spec §3 invariant 6). Remains the reconciliation key even
/// after `exchange_id` becomes known.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(pub u64);

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid-{}", self.0)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ExchangeOrderId(pub String);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(&self) -> i8 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// The order lifecycle state machine described in spec §4.D.
///
/// Terminal variants (`Filled`, `Canceled`, `Rejected`, `Expired`) are
/// never modified once reached (spec §3 invariant 2).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    /// Submission or cancellation outcome unknown after the submission
    /// timeout elapsed; a status query is in flight.
    Unknown,
    CancelPending,
    Filled,
    Canceled,
    Rejected { reason: RejectReason },
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected { .. }
                | OrderStatus::Expired
        )
    }

    /// The lifecycle DAG order used to decide whether an incoming status
    /// "strictly advances" the current one (spec §4.D idempotence rule).
    /// Higher rank == later in the lifecycle. `Unknown`/`CancelPending` are
    /// side-branches that do not themselves outrank the main line.
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Submitted => 1,
            OrderStatus::Unknown => 1,
            OrderStatus::CancelPending => 1,
            OrderStatus::PartiallyFilled => 2,
            OrderStatus::Filled
            | OrderStatus::Canceled
            | OrderStatus::Rejected { .. }
            | OrderStatus::Expired => 3,
        }
    }

    pub fn advances_from(&self, previous: &OrderStatus) -> bool {
        if previous.is_terminal() {
            return false;
        }
        self.rank() >= previous.rank()
    }
}

/// Reason taxonomy for exchange rejections (spec §4.D, §7).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    InsufficientMargin,
    InvalidPrice,
    PostOnlyViolation,
    Duplicate,
    OrphanRecovered,
    Other(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientMargin => write!(f, "insufficient_margin"),
            RejectReason::InvalidPrice => write!(f, "invalid_price"),
            RejectReason::PostOnlyViolation => write!(f, "post_only_violation"),
            RejectReason::Duplicate => write!(f, "duplicate"),
            RejectReason::OrphanRecovered => write!(f, "orphan_recovered"),
            RejectReason::Other(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub client_id: ClientOrderId,
    pub exchange_id: Option<ExchangeOrderId>,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderType,
    pub qty: Quantity,
    pub filled_qty: Quantity,
    pub price: Option<Price>,
    pub status: OrderStatus,
    pub created_ns: i64,
    pub updated_ns: i64,
}

impl Order {
    pub fn new_pending(
        client_id: ClientOrderId,
        symbol: Symbol,
        side: Side,
        kind: OrderType,
        qty: Quantity,
        price: Option<Price>,
        now_ns: i64,
    ) -> Self {
        Self {
            client_id,
            exchange_id: None,
            symbol,
            side,
            kind,
            qty,
            filled_qty: Quantity::ZERO,
            price,
            status: OrderStatus::Pending,
            created_ns: now_ns,
            updated_ns: now_ns,
        }
    }

    pub fn quantity_remaining(&self) -> Quantity {
        Quantity(
            self.qty
                .0
                .checked_sub(self.filled_qty.0)
                .unwrap_or_default(),
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The idempotence key from spec §4.D: duplicate lifecycle events, keyed by
/// this exact tuple, are dropped.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct LifecycleKey {
    pub client_id: ClientOrderId,
    pub status_discriminant: u8,
    pub filled_qty: Quantity,
    pub update_ns: i64,
}

impl LifecycleKey {
    pub fn new(order: &Order) -> Self {
        Self {
            client_id: order.client_id,
            status_discriminant: status_discriminant(&order.status),
            filled_qty: order.filled_qty,
            update_ns: order.updated_ns,
        }
    }
}

fn status_discriminant(status: &OrderStatus) -> u8 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::Submitted => 1,
        OrderStatus::PartiallyFilled => 2,
        OrderStatus::Unknown => 3,
        OrderStatus::CancelPending => 4,
        OrderStatus::Filled => 5,
        OrderStatus::Canceled => 6,
        OrderStatus::Rejected { .. } => 7,
        OrderStatus::Expired => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_never_advance() {
        assert!(!OrderStatus::Filled.advances_from(&OrderStatus::Canceled));
        assert!(!OrderStatus::PartiallyFilled.advances_from(&OrderStatus::Filled));
    }

    #[test]
    fn partial_fill_advances_from_submitted() {
        assert!(OrderStatus::PartiallyFilled.advances_from(&OrderStatus::Submitted));
    }

    #[test]
    fn out_of_order_status_does_not_advance() {
        assert!(!OrderStatus::Submitted.advances_from(&OrderStatus::PartiallyFilled));
    }
}
