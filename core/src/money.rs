//! Fixed-point money.
//!
//! RULE: No settlement figure is ever held in a binary float.
//! Every amount flows through `Money`, which wraps `rust_decimal::Decimal`.
//! Derived quantities are rounded once, at the end of their formula,
//! to `MONEY_DP` places using half-up (away from zero) rounding.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Decimal places every derived amount is rounded to.
pub const MONEY_DP: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub const fn new(amount: Decimal) -> Self {
        Money(amount)
    }

    /// Whole cents, e.g. `from_cents(1099)` is 10.99.
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, MONEY_DP))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Round half-up to `MONEY_DP` places.
    pub fn round(self) -> Self {
        self.round_dp(MONEY_DP)
    }

    pub fn round_dp(self, places: u32) -> Self {
        Money(
            self.0
                .round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// `self * factor`, unrounded.
    pub fn times(self, factor: Decimal) -> Self {
        Money(self.0 * factor)
    }

    /// `self * numerator / denominator`, unrounded.
    /// Multiplies first so short fractions keep full precision.
    /// A zero denominator yields zero.
    pub fn scale(self, numerator: Decimal, denominator: Decimal) -> Self {
        if denominator.is_zero() {
            return Money::ZERO;
        }
        Money(self.0 * numerator / denominator)
    }

    /// `self * rate / 100`, unrounded.
    pub fn percent(self, rate: Decimal) -> Self {
        self.scale(rate, Decimal::ONE_HUNDRED)
    }

    /// Canonical storage text. Never rounds: trailing zeros are dropped and
    /// the result padded back to at least `MONEY_DP` places, so equal values
    /// always give the same bytes and inputs finer than a cent survive.
    pub fn to_storage_string(&self) -> String {
        let mut d = self.0.normalize();
        if d.scale() < MONEY_DP {
            d.rescale(MONEY_DP);
        }
        d.to_string()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_storage_string())
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Money)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money(d)
    }
}

impl From<Money> for Decimal {
    fn from(m: Money) -> Self {
        m.0
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_up() {
        assert_eq!(Money::new(dec!(0.125)).round(), Money::new(dec!(0.13)));
        assert_eq!(Money::new(dec!(-0.125)).round(), Money::new(dec!(-0.13)));
        assert_eq!(Money::new(dec!(42.857142)).round(), Money::new(dec!(42.86)));
    }

    #[test]
    fn decimal_sums_do_not_drift() {
        let total: Money = std::iter::repeat(Money::new(dec!(0.1))).take(10).sum();
        assert_eq!(total, Money::new(dec!(1.0)));
        assert_eq!(
            Money::new(dec!(0.1)) + Money::new(dec!(0.2)),
            Money::new(dec!(0.3))
        );
    }

    #[test]
    fn storage_string_is_canonical() {
        assert_eq!(Money::new(dec!(250)).to_storage_string(), "250.00");
        assert_eq!(Money::new(dec!(250.0)).to_storage_string(), "250.00");
        assert_eq!(Money::new(dec!(-3.4560)).to_storage_string(), "-3.456");
        assert_eq!(Money::new(dec!(0.125)).to_storage_string(), "0.125");
        assert_eq!("12.5".parse::<Money>().unwrap(), Money::new(dec!(12.50)));
    }

    #[test]
    fn scale_with_zero_denominator_is_zero() {
        assert_eq!(Money::new(dec!(10)).scale(dec!(3), Decimal::ZERO), Money::ZERO);
    }
}
