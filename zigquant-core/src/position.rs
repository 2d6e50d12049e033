//! Position state and fill-application logic.
//!
//! Grounded on `barter::engine::state::position::Position::update_from_trade`:
//! quantity-weighted average entry price while a position stays in one
//! direction, reset-to-flip-price on a sign flip, realised PnL booked on
//! every reduction.

use crate::{
    decimal::{FixedDecimal, Price, Quantity},
    instrument::Symbol,
    order::Side,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed quantity: positive is long, negative is short.
    pub qty: FixedDecimal,
    pub entry_price: Price,
    pub realized_pnl: FixedDecimal,
    pub unrealized_pnl: FixedDecimal,
    pub updated_ns: i64,
}

impl Position {
    pub fn flat(symbol: Symbol, now_ns: i64) -> Self {
        Self {
            symbol,
            qty: FixedDecimal::ZERO,
            entry_price: Price::ZERO,
            realized_pnl: FixedDecimal::ZERO,
            unrealized_pnl: FixedDecimal::ZERO,
            updated_ns: now_ns,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }

    /// Applies a fill of `side`/`qty`@`price`, updating quantity, entry
    /// price and realised PnL per spec §3 invariants 3 & 4.
    pub fn apply_fill(&mut self, side: Side, qty: Quantity, price: Price, now_ns: i64) {
        let signed_delta = match side {
            Side::Buy => qty.0,
            Side::Sell => qty.0.neg(),
        };

        let was_flat = self.qty.is_zero();
        let same_direction = !was_flat
            && ((self.qty.is_sign_positive() && signed_delta.is_sign_positive())
                || (self.qty.is_sign_negative() && signed_delta.is_sign_negative()));

        if was_flat || same_direction {
            // Opening or adding to a position: quantity-weighted average.
            let existing_notional = self
                .entry_price
                .0
                .checked_mul(self.qty.abs())
                .unwrap_or_default();
            let added_notional = price.0.checked_mul(qty.0).unwrap_or_default();
            let new_qty_abs = self
                .qty
                .abs()
                .checked_add(qty.0)
                .unwrap_or(self.qty.abs());

            self.entry_price = if new_qty_abs.is_zero() {
                price
            } else {
                Price(
                    existing_notional
                        .checked_add(added_notional)
                        .and_then(|total| total.checked_div(new_qty_abs))
                        .unwrap_or(price.0),
                )
            };
            self.qty = self.qty.checked_add(signed_delta).unwrap_or(self.qty);
        } else {
            // Reducing or flipping.
            let reduce_qty = qty.0.abs().min(self.qty.abs());
            let pnl_per_unit = match side {
                // Selling against a long position realises (sell - entry).
                Side::Sell => self.entry_price.0.neg().checked_add(price.0).unwrap_or_default(),
                // Buying against a short position realises (entry - buy).
                Side::Buy => self.entry_price.0.checked_sub(price.0).unwrap_or_default(),
            };
            let realized = pnl_per_unit.checked_mul(reduce_qty).unwrap_or_default();
            self.realized_pnl = self.realized_pnl.checked_add(realized).unwrap_or(self.realized_pnl);

            self.qty = self.qty.checked_add(signed_delta).unwrap_or(self.qty);

            if self.qty.is_zero() {
                self.entry_price = Price::ZERO;
            } else if (self.qty.is_sign_positive() && signed_delta.is_sign_positive())
                || (self.qty.is_sign_negative() && signed_delta.is_sign_negative())
            {
                // Flip: fill quantity exceeded what was needed to flatten,
                // so the remainder opens a fresh position in the new
                // direction at the flipping fill's price.
                self.entry_price = price;
            }
            // else: still reducing in the same direction, entry price is
            // unchanged (the remaining quantity was bought/sold at the
            // original entry price).
        }

        self.updated_ns = now_ns;
    }

    pub fn mark_to_market(&mut self, mark_price: Price) {
        if self.qty.is_zero() {
            self.unrealized_pnl = FixedDecimal::ZERO;
            return;
        }
        let diff = mark_price.0.checked_sub(self.entry_price.0).unwrap_or_default();
        self.unrealized_pnl = diff.checked_mul(self.qty).unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn p(v: rust_decimal::Decimal) -> Price {
        Price::from(v)
    }
    fn q(v: rust_decimal::Decimal) -> Quantity {
        Quantity::from(v)
    }

    /// S1 — Fill averaging: buy 2@100, buy 2@110 -> qty=4, entry=105.
    #[test]
    fn s1_fill_averaging() {
        let mut pos = Position::flat(Symbol::new("BTC-USD"), 1);
        pos.apply_fill(Side::Buy, q(dec!(2)), p(dec!(100)), 1);
        pos.apply_fill(Side::Buy, q(dec!(2)), p(dec!(110)), 2);
        assert_eq!(pos.qty, FixedDecimal::from_decimal(dec!(4)));
        assert_eq!(pos.entry_price, p(dec!(105)));
    }

    /// S2 — Flip: from S1, sell 6@120 -> qty=-2, entry=120, realized=+60.
    #[test]
    fn s2_flip() {
        let mut pos = Position::flat(Symbol::new("BTC-USD"), 1);
        pos.apply_fill(Side::Buy, q(dec!(2)), p(dec!(100)), 1);
        pos.apply_fill(Side::Buy, q(dec!(2)), p(dec!(110)), 2);
        pos.apply_fill(Side::Sell, q(dec!(6)), p(dec!(120)), 3);

        assert_eq!(pos.qty, FixedDecimal::from_decimal(dec!(-2)));
        assert_eq!(pos.entry_price, p(dec!(120)));
        assert_eq!(pos.realized_pnl, FixedDecimal::from_decimal(dec!(60)));
    }

    #[test]
    fn partial_reduce_keeps_entry_price() {
        let mut pos = Position::flat(Symbol::new("BTC-USD"), 1);
        pos.apply_fill(Side::Buy, q(dec!(2)), p(dec!(100)), 1);
        pos.apply_fill(Side::Sell, q(dec!(1)), p(dec!(110)), 2);

        assert_eq!(pos.qty, FixedDecimal::from_decimal(dec!(1)));
        assert_eq!(pos.entry_price, p(dec!(100)));
        assert_eq!(pos.realized_pnl, FixedDecimal::from_decimal(dec!(10)));
    }
}
