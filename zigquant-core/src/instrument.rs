//! Instrument and Quote entities.
//!
//! Grounded on `barter-instrument::instrument` (symbol/spec separation) and
//! `barter-instrument::instrument::spec::InstrumentSpec` (tick size, minimum
//! order size, contract multiplier).

use crate::decimal::{Price, Quantity};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Unique identifier for an [`Instrument`] — its trading symbol.
///
/// Cheap to clone (`SmolStr` inlines short strings), matching the teacher's
/// choice of `smol_str::SmolStr` for instrument/asset names.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Symbol(pub SmolStr);

impl Symbol {
    pub fn new(value: impl Into<SmolStr>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Instrument specification. Created at subscription time and frozen
/// thereafter — nothing in the core mutates an `Instrument` after
/// construction (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub tick_size: Price,
    pub min_order_size: Quantity,
    pub contract_multiplier: Quantity,
}

impl Instrument {
    pub fn new(
        symbol: impl Into<Symbol>,
        tick_size: Price,
        min_order_size: Quantity,
        contract_multiplier: Quantity,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            tick_size,
            min_order_size,
            contract_multiplier,
        }
    }

    /// Rounds a raw price down to the nearest valid tick, per `tick_size`.
    pub fn round_to_tick(&self, price: Price) -> Price {
        if self.tick_size.is_zero() {
            return price;
        }
        let ticks = (price.0.checked_div(self.tick_size.0))
            .map(|d| d.as_decimal().trunc())
            .unwrap_or_default();
        Price(
            crate::decimal::FixedDecimal::from_decimal(ticks)
                .checked_mul(self.tick_size.0)
                .unwrap_or(price.0),
        )
    }
}

/// Latest best bid/ask for an instrument. Overwritten on every update —
/// the Cache only ever retains the most recent [`Quote`] per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Price,
    pub ask: Price,
    pub bid_size: Quantity,
    pub ask_size: Quantity,
    pub timestamp_ns: i64,
}

impl Quote {
    pub fn mid_price(&self) -> Price {
        self.bid.0.mid(self.ask.0).map(Price).unwrap_or(self.bid)
    }

    pub fn spread(&self) -> Price {
        Price(self.ask.0.checked_sub(self.bid.0).unwrap_or_default())
    }
}
