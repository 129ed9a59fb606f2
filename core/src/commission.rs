//! Partner commission evaluation.
//!
//! Pure function over a driver's configured model and the period aggregates.
//! Missing configuration values count as zero; a half-configured driver
//! yields a smaller (possibly zero) commission, never an error.

use crate::{driver::CommissionModel, money::Money};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct CommissionInputs {
    pub model:                Option<CommissionModel>,
    pub total_platform_net:   Money,
    pub commission_rate:      Option<Decimal>,
    pub fixed_fee:            Option<Money>,
    pub hybrid_threshold:     Option<Money>,
    pub per_ride_fee:         Option<Money>,
    pub completed_ride_count: u32,
    pub period_days:          i64,
    pub standard_period_days: i64,
}

/// Partner commission, rounded once to cents.
pub fn evaluate_commission(inputs: &CommissionInputs) -> Money {
    let rate = inputs.commission_rate.unwrap_or(Decimal::ZERO);

    let amount = match inputs.model {
        Some(CommissionModel::Percentage) => inputs.total_platform_net.percent(rate),
        Some(CommissionModel::Fixed) => prorated_fixed_fee(inputs),
        Some(CommissionModel::Hybrid) => {
            let threshold = inputs.hybrid_threshold.unwrap_or(Money::ZERO);
            let excess = (inputs.total_platform_net - threshold).max(Money::ZERO);
            prorated_fixed_fee(inputs) + excess.percent(rate)
        }
        Some(CommissionModel::PerRide) => inputs
            .per_ride_fee
            .unwrap_or(Money::ZERO)
            .times(Decimal::from(inputs.completed_ride_count)),
        None => Money::ZERO,
    };

    amount.round()
}

/// Fixed fee scaled down for short periods only.
/// A period at or above the standard length pays the plain fee; it is
/// never scaled up.
fn prorated_fixed_fee(inputs: &CommissionInputs) -> Money {
    let fee = inputs.fixed_fee.unwrap_or(Money::ZERO);
    if inputs.period_days < inputs.standard_period_days && inputs.standard_period_days > 0 {
        fee.scale(
            Decimal::from(inputs.period_days),
            Decimal::from(inputs.standard_period_days),
        )
    } else {
        fee
    }
}

/// Names the configuration field a model needs but the driver lacks.
/// Used only for data-quality logging.
pub fn missing_config_field(inputs: &CommissionInputs) -> Option<&'static str> {
    match inputs.model {
        Some(CommissionModel::Percentage) if inputs.commission_rate.is_none() => {
            Some("commission_rate")
        }
        Some(CommissionModel::Fixed) if inputs.fixed_fee.is_none() => Some("fixed_fee"),
        Some(CommissionModel::Hybrid) if inputs.fixed_fee.is_none() => Some("fixed_fee"),
        Some(CommissionModel::Hybrid) if inputs.hybrid_threshold.is_none() => {
            Some("hybrid_threshold")
        }
        Some(CommissionModel::Hybrid) if inputs.commission_rate.is_none() => {
            Some("commission_rate")
        }
        Some(CommissionModel::PerRide) if inputs.per_ride_fee.is_none() => Some("per_ride_fee"),
        None => Some("commission_model"),
        _ => None,
    }
}
