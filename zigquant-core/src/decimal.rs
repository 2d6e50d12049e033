//! Fixed-point decimal arithmetic used for every monetary quantity in zigQuant.
//!
//! [`FixedDecimal`] wraps [`rust_decimal::Decimal`] (a base-10, checked-arithmetic
//! fixed-point type) and rescales every value to 18 fractional digits on
//! construction, giving the "128-bit signed integer, 18 fractional digits"
//! representation demanded by the spec without hand-rolling i256 widening:
//! `rust_decimal` already performs overflow-checked multiply/divide internally
//! and widens as needed.

use derive_more::{Add, AddAssign, Neg, Sub, SubAssign};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Number of fractional digits every [`FixedDecimal`] is rescaled to.
pub const SCALE: u32 = 18;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FixedDecimalError {
    #[error("division by zero")]
    DivideByZero,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("invalid decimal literal: {0}")]
    Parse(String),
}

/// A fixed-point decimal with exactly [`SCALE`] fractional digits.
///
/// Equality is exact (post-rescale); ordering is total, inherited from
/// [`Decimal`]'s total order over its normalised representation.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FixedDecimal(Decimal);

impl FixedDecimal {
    pub const ZERO: FixedDecimal = FixedDecimal(Decimal::ZERO);

    pub fn new(mantissa: i64, scale: u32) -> Self {
        Self::rescale(Decimal::new(mantissa, scale))
    }

    pub fn from_decimal(value: Decimal) -> Self {
        Self::rescale(value)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_sign_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn is_sign_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn abs(&self) -> Self {
        FixedDecimal(self.0.abs())
    }

    pub fn neg(&self) -> Self {
        FixedDecimal(-self.0)
    }

    pub fn checked_add(&self, rhs: Self) -> Result<Self, FixedDecimalError> {
        self.0
            .checked_add(rhs.0)
            .map(Self::rescale)
            .ok_or(FixedDecimalError::Overflow)
    }

    pub fn checked_sub(&self, rhs: Self) -> Result<Self, FixedDecimalError> {
        self.0
            .checked_sub(rhs.0)
            .map(Self::rescale)
            .ok_or(FixedDecimalError::Overflow)
    }

    /// Multiplies two values, internally widening precision before rescaling
    /// back down to [`SCALE`] so intermediate products cannot silently
    /// truncate.
    pub fn checked_mul(&self, rhs: Self) -> Result<Self, FixedDecimalError> {
        self.0
            .checked_mul(rhs.0)
            .map(Self::rescale)
            .ok_or(FixedDecimalError::Overflow)
    }

    pub fn checked_div(&self, rhs: Self) -> Result<Self, FixedDecimalError> {
        if rhs.is_zero() {
            return Err(FixedDecimalError::DivideByZero);
        }
        self.0
            .checked_div(rhs.0)
            .map(Self::rescale)
            .ok_or(FixedDecimalError::Overflow)
    }

    pub fn mid(&self, rhs: Self) -> Result<Self, FixedDecimalError> {
        self.checked_add(rhs)?.checked_div(FixedDecimal::new(2, 0))
    }

    pub fn sqrt(&self) -> Option<Self> {
        self.0.sqrt().map(Self::rescale)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    fn rescale(mut value: Decimal) -> Self {
        value.rescale(SCALE);
        FixedDecimal(value)
    }
}

impl std::ops::Add for FixedDecimal {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::rescale(self.0 + rhs.0)
    }
}

impl std::ops::Sub for FixedDecimal {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::rescale(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for FixedDecimal {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::SubAssign for FixedDecimal {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl std::ops::Neg for FixedDecimal {
    type Output = Self;

    fn neg(self) -> Self {
        Self::rescale(-self.0)
    }
}

impl fmt::Display for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FixedDecimal {
    type Err = FixedDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s)
            .map(Self::rescale)
            .map_err(|e| FixedDecimalError::Parse(e.to_string()))
    }
}

impl From<Decimal> for FixedDecimal {
    fn from(value: Decimal) -> Self {
        Self::rescale(value)
    }
}

/// Wraps [`FixedDecimal`] with a distinct type per use (price vs quantity)
/// so order/position arithmetic cannot accidentally mix the two.
macro_rules! decimal_newtype {
    ($name:ident) => {
        #[derive(
            Debug,
            Default,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            Add,
            Sub,
            AddAssign,
            SubAssign,
            Neg,
        )]
        pub struct $name(pub FixedDecimal);

        impl $name {
            pub const ZERO: $name = $name(FixedDecimal::ZERO);

            pub fn new(mantissa: i64, scale: u32) -> Self {
                $name(FixedDecimal::new(mantissa, scale))
            }

            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            pub fn abs(&self) -> Self {
                $name(self.0.abs())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = FixedDecimalError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                FixedDecimal::from_str(s).map($name)
            }
        }

        impl From<Decimal> for $name {
            fn from(value: Decimal) -> Self {
                $name(FixedDecimal::from(value))
            }
        }
    };
}

decimal_newtype!(Price);
decimal_newtype!(Quantity);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rescales_to_eighteen_fractional_digits() {
        let value = FixedDecimal::from_decimal(dec!(1.5));
        assert_eq!(value.as_decimal().scale(), SCALE);
    }

    #[test]
    fn division_by_zero_is_distinguished() {
        let a = FixedDecimal::from_decimal(dec!(1));
        let b = FixedDecimal::ZERO;
        assert_eq!(a.checked_div(b), Err(FixedDecimalError::DivideByZero));
    }

    #[test]
    fn multiply_then_divide_round_trips() {
        let price = Price::from(dec!(105.25));
        let qty = Quantity::from(dec!(4));
        let notional = price.0.checked_mul(qty.0).unwrap();
        let back = notional.checked_div(qty.0).unwrap();
        assert_eq!(back, price.0);
    }

    #[test]
    fn ordering_is_total() {
        let a = FixedDecimal::from_decimal(dec!(1.0001));
        let b = FixedDecimal::from_decimal(dec!(1.0002));
        assert!(a < b);
    }
}
