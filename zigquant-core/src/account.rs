//! Account entity: balances and margin usage for the session.

use crate::decimal::FixedDecimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct AccountId(pub SmolStr);

impl AccountId {
    pub fn new(value: impl Into<SmolStr>) -> Self {
        Self(value.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: FixedDecimal,
    pub available: FixedDecimal,
    pub margin_used: FixedDecimal,
    pub realized_pnl: FixedDecimal,
    pub unrealized_pnl: FixedDecimal,
    pub updated_ns: i64,
}

impl Account {
    pub fn new(id: AccountId, balance: FixedDecimal, now_ns: i64) -> Self {
        Self {
            id,
            balance,
            available: balance,
            margin_used: FixedDecimal::ZERO,
            realized_pnl: FixedDecimal::ZERO,
            unrealized_pnl: FixedDecimal::ZERO,
            updated_ns: now_ns,
        }
    }
}
