//! Monthly cost proration.
//!
//! Settlement periods are rolling windows that do not line up with calendar
//! months, so recurring monthly costs are spread over the average month
//! length rather than the length of any particular month.

use crate::money::Money;
use rust_decimal::Decimal;

/// 365.25 / 12.
pub const AVERAGE_MONTH_DAYS: Decimal = Decimal::from_parts(3044, 0, 0, false, 2);

/// `monthly_cost * period_days / average_month_days`, rounded to cents.
/// A missing or zero cost short-circuits to zero.
pub fn prorate_monthly_cost(
    monthly_cost: Option<Money>,
    period_days: i64,
    average_month_days: Decimal,
) -> Money {
    match monthly_cost {
        Some(cost) if !cost.is_zero() => cost
            .scale(Decimal::from(period_days), average_month_days)
            .round(),
        _ => Money::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn prorates_over_average_month() {
        // 600 * 7 / 30.44 = 137.976...
        let weekly = prorate_monthly_cost(Some(Money::new(dec!(600))), 7, AVERAGE_MONTH_DAYS);
        assert_eq!(weekly, Money::new(dec!(137.98)));

        let month = prorate_monthly_cost(Some(Money::new(dec!(304.40))), 30, AVERAGE_MONTH_DAYS);
        assert_eq!(month, Money::new(dec!(300.00)));
    }

    #[test]
    fn missing_or_zero_cost_is_zero() {
        assert_eq!(prorate_monthly_cost(None, 7, AVERAGE_MONTH_DAYS), Money::ZERO);
        assert_eq!(
            prorate_monthly_cost(Some(Money::ZERO), 7, AVERAGE_MONTH_DAYS),
            Money::ZERO
        );
    }
}
