//! Settlement calculation: one driver, one period, no side effects.
//!
//! Pipeline:
//!   1. select rides in the period
//!   2. aggregate per platform, sum the platform nets
//!   3. evaluate the partner commission
//!   4. prorate vehicle rental and insurance
//!   5. net out cash the driver already holds
//!
//! Inputs are fetched by the caller; nothing here touches the store, so a
//! failed calculation leaves no trace and the function is safe to call in
//! a loop (or in parallel) across drivers.

use crate::{
    aggregator::{aggregate_by_platform, rides_in_period, PlatformBreakdowns},
    commission::{evaluate_commission, missing_config_field, CommissionInputs},
    config::EngineConfig,
    driver::{DriverCommissionConfig, VehicleCostConfig},
    money::Money,
    proration::prorate_monthly_cost,
    ride::{RideRecord, SettlementPeriod},
    types::{DriverId, PartnerId, RideId},
};
use serde::{Deserialize, Serialize};

/// Everything the calculator needs for one driver and period.
#[derive(Debug, Clone)]
pub struct SettlementInputs {
    pub driver:  DriverCommissionConfig,
    pub vehicle: Option<VehicleCostConfig>,
    /// May include rides outside the period; they are filtered here.
    pub rides:   Vec<RideRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub driver_id:                DriverId,
    pub partner_id:               PartnerId,
    pub period:                   SettlementPeriod,
    pub platforms:                PlatformBreakdowns,
    pub total_platform_net:       Money,
    pub partner_commission_amount: Money,
    pub vehicle_rental_deduction: Money,
    pub insurance_deduction:      Money,
    /// Only ever set later through the manual fuel path.
    pub fuel_cost_deduction:      Money,
    pub cash_collected_by_driver: Money,
    pub driver_net_earnings:      Money,
    pub payout_amount:            Money,
    pub total_rides:              u32,
    pub completed_rides:          u32,
    pub period_days:              i64,
    /// Rides the result was computed from; re-tagged on persistence.
    pub ride_ids:                 Vec<RideId>,
}

pub fn calculate_settlement(
    partner_id: &str,
    period: &SettlementPeriod,
    inputs: &SettlementInputs,
    config: &EngineConfig,
) -> SettlementResult {
    let driver = &inputs.driver;

    let in_period: Vec<&RideRecord> = rides_in_period(&inputs.rides, period).collect();
    let platforms = aggregate_by_platform(&inputs.rides, period);
    let total_platform_net = platforms.total_net();

    let period_days = period.days();
    let standard_period_days = config.standard_days(driver.settlement_frequency);
    let completed_rides = in_period.iter().filter(|r| r.is_completed()).count() as u32;

    let commission_inputs = CommissionInputs {
        model:                driver.commission_model,
        total_platform_net,
        commission_rate:      driver.commission_rate,
        fixed_fee:            driver.fixed_fee,
        hybrid_threshold:     driver.hybrid_threshold,
        per_ride_fee:         driver.per_ride_fee,
        completed_ride_count: completed_rides,
        period_days,
        standard_period_days,
    };
    if let Some(field) = missing_config_field(&commission_inputs) {
        log::warn!(
            "driver={} period={period} commission config has no {field}; counting it as zero",
            driver.driver_id
        );
    }
    let partner_commission_amount = evaluate_commission(&commission_inputs);

    let (vehicle_rental_deduction, insurance_deduction) = match &inputs.vehicle {
        Some(v) => (
            prorate_monthly_cost(v.monthly_rental_cost, period_days, config.average_month_days),
            prorate_monthly_cost(v.insurance_monthly_cost, period_days, config.average_month_days),
        ),
        None => (Money::ZERO, Money::ZERO),
    };
    let fuel_cost_deduction = Money::ZERO;

    // Only the fare is physically collected; tips stay out of the cash sum.
    let cash_collected_by_driver: Money = in_period
        .iter()
        .filter(|r| r.is_cash())
        .map(|r| r.fare_amount)
        .sum::<Money>()
        .round();

    let driver_net_earnings = base_net_earnings(
        total_platform_net,
        partner_commission_amount,
        vehicle_rental_deduction,
        insurance_deduction,
        fuel_cost_deduction,
    );
    let payout_amount = (driver_net_earnings - cash_collected_by_driver).round();

    SettlementResult {
        driver_id: driver.driver_id.clone(),
        partner_id: partner_id.to_string(),
        period: *period,
        platforms,
        total_platform_net,
        partner_commission_amount,
        vehicle_rental_deduction,
        insurance_deduction,
        fuel_cost_deduction,
        cash_collected_by_driver,
        driver_net_earnings,
        payout_amount,
        total_rides: in_period.len() as u32,
        completed_rides,
        period_days,
        ride_ids: in_period.iter().map(|r| r.id.clone()).collect(),
    }
}

/// Platform net less commission and vehicle/fuel costs.
pub fn base_net_earnings(
    total_platform_net: Money,
    partner_commission: Money,
    vehicle_rental: Money,
    insurance: Money,
    fuel: Money,
) -> Money {
    (total_platform_net - partner_commission - vehicle_rental - insurance - fuel).round()
}
