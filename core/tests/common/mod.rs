//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, Utc};
use fleetpay_core::{
    driver::{CommissionModel, DriverCommissionConfig, SettlementFrequency, VehicleCostConfig},
    engine::SettlementEngine,
    money::Money,
    ride::{PaymentMethod, PlatformSource, RideRecord, RideStatus, SettlementPeriod},
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rust_decimal::Decimal;

pub const PARTNER: &str = "partner-1";

/// In-memory engine, clock pinned to 2024-07-01T12:00:00Z.
pub fn build() -> SettlementEngine {
    SettlementEngine::build_test().expect("build_test failed")
}

pub fn money(amount: Decimal) -> Money {
    Money::new(amount)
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("bad test date")
}

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("bad test timestamp")
        .with_timezone(&Utc)
}

pub fn period(start: &str, end: &str) -> SettlementPeriod {
    SettlementPeriod::new(date(start), date(end)).expect("bad test period")
}

/// Seven-day period starting on `start`.
pub fn week(start: &str) -> SettlementPeriod {
    let start = date(start);
    SettlementPeriod::new(start, start + Duration::days(6)).expect("bad test week")
}

/// Active weekly driver with no commission terms set.
pub fn bare_driver(driver_id: &str) -> DriverCommissionConfig {
    DriverCommissionConfig {
        driver_id:            driver_id.to_string(),
        partner_id:           PARTNER.to_string(),
        commission_model:     None,
        commission_rate:      None,
        fixed_fee:            None,
        hybrid_threshold:     None,
        per_ride_fee:         None,
        settlement_frequency: SettlementFrequency::Weekly,
        active:               true,
    }
}

pub fn percentage_driver(driver_id: &str, rate: Decimal) -> DriverCommissionConfig {
    DriverCommissionConfig {
        commission_model: Some(CommissionModel::Percentage),
        commission_rate: Some(rate),
        ..bare_driver(driver_id)
    }
}

pub fn vehicle(vehicle_id: &str, rental: Decimal, insurance: Decimal) -> VehicleCostConfig {
    VehicleCostConfig {
        vehicle_id:             vehicle_id.to_string(),
        monthly_rental_cost:    Some(Money::new(rental)),
        insurance_monthly_cost: Some(Money::new(insurance)),
    }
}

/// Completed ride, finished at `completed_at`, started 30 minutes earlier.
pub fn ride(
    id: &str,
    driver_id: &str,
    platform: PlatformSource,
    fare: Decimal,
    payment: PaymentMethod,
    completed_at: &str,
) -> RideRecord {
    let completed = at(completed_at);
    RideRecord {
        id:                         id.to_string(),
        driver_id:                  driver_id.to_string(),
        platform_source:            platform,
        fare_amount:                Money::new(fare),
        tip_amount:                 Money::ZERO,
        platform_commission_amount: Money::ZERO,
        payment_method:             payment,
        started_at:                 completed - Duration::minutes(30),
        completed_at:               Some(completed),
        status:                     RideStatus::Completed,
        settlement_id:              None,
    }
}

pub fn insert_rides(engine: &SettlementEngine, rides: &[RideRecord]) {
    for r in rides {
        engine.store.insert_ride(r).expect("insert_ride failed");
    }
}

/// Deterministic pseudo-random rides inside `period`, all completed.
pub fn random_rides(
    seed: u64,
    driver_id: &str,
    period: &SettlementPeriod,
    count: usize,
) -> Vec<RideRecord> {
    let mut rng = Pcg64::seed_from_u64(seed);
    let minutes_in_period = period.days() * 24 * 60;
    (0..count)
        .map(|i| {
            let platform = PlatformSource::ALL[rng.gen_range(0..3)];
            let payment = match rng.gen_range(0..3) {
                0 => PaymentMethod::Cash,
                1 => PaymentMethod::Card,
                _ => PaymentMethod::InApp,
            };
            let completed =
                period.window_start() + Duration::minutes(rng.gen_range(30..minutes_in_period));
            RideRecord {
                id:                         format!("{driver_id}-r{seed}-{i}"),
                driver_id:                  driver_id.to_string(),
                platform_source:            platform,
                fare_amount:                Money::from_cents(rng.gen_range(500..6000)),
                tip_amount:                 Money::from_cents(rng.gen_range(0..500)),
                platform_commission_amount: Money::from_cents(rng.gen_range(0..1200)),
                payment_method:             payment,
                started_at:                 completed - Duration::minutes(25),
                completed_at:               Some(completed),
                status:                     RideStatus::Completed,
                settlement_id:              None,
            }
        })
        .collect()
}
