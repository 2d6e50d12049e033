//! Canonical bus topic names (spec §6: "Bus topics the host may subscribe
//! to"). Centralised here so every crate that publishes or subscribes
//! agrees on the exact strings without re-deriving them.

use crate::instrument::Symbol;

pub const ORDER_PENDING: &str = "order.pending";
pub const ORDER_SUBMITTED: &str = "order.submitted";
pub const ORDER_PARTIALLY_FILLED: &str = "order.partially_filled";
pub const ORDER_FILLED: &str = "order.filled";
pub const ORDER_CANCEL_REQUESTED: &str = "order.cancel_requested";
pub const ORDER_CANCELED: &str = "order.canceled";
pub const ORDER_REJECTED: &str = "order.rejected";
pub const ORDER_UNCERTAIN: &str = "order.uncertain";
pub const ORDER_WILDCARD: &str = "order.#";

pub const POSITION_UPDATED: &str = "position.updated";
pub const POSITION_WILDCARD: &str = "position.#";

pub const ACCOUNT_UPDATED: &str = "account.updated";
pub const ACCOUNT_WILDCARD: &str = "account.#";

pub const MARKET_DATA_WILDCARD: &str = "market_data.#";

pub const SYSTEM_TICK: &str = "system.tick";
pub const SYSTEM_CONNECTED: &str = "system.connected";
pub const SYSTEM_DISCONNECTED: &str = "system.disconnected";
pub const SYSTEM_SHUTDOWN: &str = "system.shutdown";
pub const SYSTEM_RECOVERED: &str = "system.recovered";
pub const SYSTEM_ERROR: &str = "system.error";

pub fn market_data_topic(symbol: &Symbol) -> String {
    format!("market_data.{}", symbol.as_str())
}

pub fn candle_topic(symbol: &Symbol, timeframe: &str) -> String {
    format!("candle.{}.{}", symbol.as_str(), timeframe)
}
