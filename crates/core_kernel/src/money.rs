//! Money types with precise decimal arithmetic
//!
//! This module provides a type-safe representation of monetary values
//! using rust_decimal for precise calculations without floating-point errors.
//! Ride billing runs in a single currency, so `Money` carries only an amount.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub, Mul, Div, Neg};
use std::str::FromStr;
use thiserror::Error;

/// ISO 4217 code of the only supported currency
pub const CURRENCY_CODE: &str = "USD";

/// Number of fractional digits every amount is rounded to
pub const MONEY_SCALE: u32 = 4;

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Overflow during calculation")]
    Overflow,
}

/// A monetary amount in USD
///
/// Amounts are stored with 4 decimal places; every constructor and every
/// arithmetic operation re-rounds to that scale. There is no conversion from
/// floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money {
    amount: Decimal,
}

impl Money {
    /// Creates a new Money value, rounding to 4 fractional digits
    pub fn new(amount: Decimal) -> Self {
        Self {
            amount: amount.round_dp(MONEY_SCALE),
        }
    }

    /// Creates Money from an integer amount of cents
    pub fn from_minor(cents: i64) -> Self {
        Self::new(Decimal::new(cents, 2))
    }

    /// Creates a zero amount
    pub fn zero() -> Self {
        Self { amount: Decimal::ZERO }
    }

    /// Returns the amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Returns the currency code
    pub fn currency(&self) -> &'static str {
        CURRENCY_CODE
    }

    /// Returns true if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Returns true if the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }

    /// Returns true if the amount is strictly negative
    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Returns the absolute value
    pub fn abs(&self) -> Self {
        Self { amount: self.amount.abs() }
    }

    /// Rounds to whole cents for presentation
    pub fn round_to_cents(&self) -> Self {
        Self::new(self.amount.round_dp(2))
    }

    /// Checked addition that reports overflow instead of panicking
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.amount
            .checked_add(other.amount)
            .map(Self::new)
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction that reports overflow instead of panicking
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.amount
            .checked_sub(other.amount)
            .map(Self::new)
            .ok_or(MoneyError::Overflow)
    }

    /// Multiplies by a scalar
    pub fn multiply(&self, factor: Decimal) -> Self {
        Self::new(self.amount * factor)
    }

    /// Divides by a scalar
    pub fn divide(&self, divisor: Decimal) -> Result<Self, MoneyError> {
        if divisor.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        self.amount
            .checked_div(divisor)
            .map(Self::new)
            .ok_or(MoneyError::Overflow)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Decimal {
        money.amount
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('$');
        Decimal::from_str(trimmed)
            .map(Self::new)
            .map_err(|_| MoneyError::InvalidAmount(s.to_string()))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            write!(f, "-${:.2}", self.amount.abs())
        } else {
            write!(f, "${:.2}", self.amount)
        }
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.amount + other.amount)
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.amount - other.amount)
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.amount)
    }
}

impl Mul<Decimal> for Money {
    type Output = Self;

    fn mul(self, factor: Decimal) -> Self {
        self.multiply(factor)
    }
}

/// Scalar division. Like `Decimal` division this panics on a zero divisor;
/// use [`Money::divide`] when the divisor is not known to be non-zero.
impl Div<Decimal> for Money {
    type Output = Self;

    fn div(self, divisor: Decimal) -> Self {
        Self::new(self.amount / divisor)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn money_arithmetic_is_associative(
            a in -1_000_000i64..1_000_000i64,
            b in -1_000_000i64..1_000_000i64,
            c in -1_000_000i64..1_000_000i64
        ) {
            let ma = Money::from_minor(a);
            let mb = Money::from_minor(b);
            let mc = Money::from_minor(c);

            prop_assert_eq!((ma + mb) + mc, ma + (mb + mc));
        }

        #[test]
        fn negation_cancels(a in -1_000_000i64..1_000_000i64) {
            let m = Money::from_minor(a);
            prop_assert!((m + (-m)).is_zero());
        }
    }
}
