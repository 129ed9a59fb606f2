//! Settlement calculation and persistence.
//!
//! 1. Cash netting: payout = net earnings - cash held by the driver
//! 2. Vehicle costs are prorated over the average month
//! 3. Recalculation upserts by (driver, period) and is idempotent
//! 4. Unknown drivers fail before any write
//! 5. Status machine CALCULATED -> APPROVED -> PAID

mod common;

use chrono::Duration;
use common::*;
use fleetpay_core::{
    driver::CommissionModel,
    error::SettleError,
    money::Money,
    ride::{PaymentMethod, PlatformSource, RideStatus},
    settlement::SettlementStatus,
};
use rust_decimal_macros::dec;

/// Driver "d1" at 25% with 120.00 in cash rides and 380.00 card/in-app.
fn cash_netting_fixture() -> fleetpay_core::engine::SettlementEngine {
    let engine = build();
    engine.store.insert_driver(&percentage_driver("d1", dec!(25))).unwrap();
    insert_rides(
        &engine,
        &[
            ride("c1", "d1", PlatformSource::Bolt, dec!(120.00), PaymentMethod::Cash, "2024-06-03T09:00:00Z"),
            ride("k1", "d1", PlatformSource::Uber, dec!(200.00), PaymentMethod::Card, "2024-06-04T09:00:00Z"),
            ride("k2", "d1", PlatformSource::Freenow, dec!(180.00), PaymentMethod::InApp, "2024-06-05T09:00:00Z"),
        ],
    );
    engine
}

// ─────────────────────────────────────────────────────────────────────────────
// Calculation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn cash_is_netted_out_of_payout() {
    let engine = cash_netting_fixture();
    let result = engine
        .calculate_settlement("d1", PARTNER, &week("2024-06-03"))
        .unwrap();

    assert_eq!(result.total_platform_net, money(dec!(500.00)));
    assert_eq!(result.partner_commission_amount, money(dec!(125.00)));
    assert_eq!(result.cash_collected_by_driver, money(dec!(120.00)));
    assert_eq!(result.driver_net_earnings, money(dec!(375.00)));
    assert_eq!(result.payout_amount, money(dec!(255.00)));
    assert_eq!(result.total_rides, 3);
    assert_eq!(result.completed_rides, 3);
    assert_eq!(result.fuel_cost_deduction, Money::ZERO);
}

#[test]
fn cash_sum_excludes_tips() {
    let engine = build();
    engine.store.insert_driver(&bare_driver("d1")).unwrap();
    let mut r = ride("c1", "d1", PlatformSource::Bolt, dec!(40.00), PaymentMethod::Cash, "2024-06-03T09:00:00Z");
    r.tip_amount = money(dec!(6.00));
    insert_rides(&engine, &[r]);

    let result = engine.calculate_settlement("d1", PARTNER, &week("2024-06-03")).unwrap();
    assert_eq!(result.total_platform_net, money(dec!(46.00)));
    assert_eq!(result.cash_collected_by_driver, money(dec!(40.00)));
    assert_eq!(result.payout_amount, money(dec!(6.00)));
}

#[test]
fn vehicle_costs_prorated_by_period_days() {
    let engine = build();
    engine.store.insert_driver(&bare_driver("d1")).unwrap();
    engine
        .store
        .insert_vehicle(PARTNER, Some("B-XY-1"), &vehicle("v1", dec!(600.00), dec!(150.00)))
        .unwrap();
    engine.store.assign_vehicle("d1", Some("v1")).unwrap();

    let result = engine.calculate_settlement("d1", PARTNER, &week("2024-06-03")).unwrap();
    // 600 * 7 / 30.44 and 150 * 7 / 30.44
    assert_eq!(result.vehicle_rental_deduction, money(dec!(137.98)));
    assert_eq!(result.insurance_deduction, money(dec!(34.49)));
    assert_eq!(result.driver_net_earnings, money(dec!(-172.47)));
}

#[test]
fn unassigned_vehicle_costs_nothing() {
    let engine = cash_netting_fixture();
    let result = engine.calculate_settlement("d1", PARTNER, &week("2024-06-03")).unwrap();
    assert_eq!(result.vehicle_rental_deduction, Money::ZERO);
    assert_eq!(result.insurance_deduction, Money::ZERO);
}

#[test]
fn assigning_missing_vehicle_is_not_found() {
    let engine = build();
    engine.store.insert_driver(&bare_driver("d1")).unwrap();
    let err = engine.store.assign_vehicle("d1", Some("ghost")).unwrap_err();
    assert!(matches!(err, SettleError::VehicleNotFound { .. }));
}

fn per_ride_driver(driver_id: &str, fee: rust_decimal::Decimal) -> fleetpay_core::driver::DriverCommissionConfig {
    fleetpay_core::driver::DriverCommissionConfig {
        commission_model: Some(CommissionModel::PerRide),
        per_ride_fee: Some(money(fee)),
        ..bare_driver(driver_id)
    }
}

#[test]
fn only_completed_rides_count_toward_per_ride_fee() {
    let engine = build();
    engine.store.insert_driver(&per_ride_driver("d1", dec!(2.00))).unwrap();
    let done = ride("done", "d1", PlatformSource::Bolt, dec!(30.00), PaymentMethod::Card, "2024-06-03T09:00:00Z");
    let mut cancelled = ride("cancelled", "d1", PlatformSource::Bolt, dec!(0.00), PaymentMethod::Card, "2024-06-04T09:00:00Z");
    cancelled.status = RideStatus::Cancelled;
    let mut no_show = ride("no-show", "d1", PlatformSource::Uber, dec!(0.00), PaymentMethod::Cash, "2024-06-05T09:00:00Z");
    no_show.status = RideStatus::NoShow;
    no_show.completed_at = None;
    insert_rides(&engine, &[done, cancelled, no_show]);

    let result = engine
        .calculate_settlement("d1", PARTNER, &week("2024-06-03"))
        .unwrap();
    assert_eq!(result.total_rides, 3);
    assert_eq!(result.completed_rides, 1);
    assert_eq!(result.partner_commission_amount, money(dec!(2.00)));
}

#[test]
fn sub_cent_config_is_stored_at_full_precision() {
    let engine = build();
    engine.store.insert_driver(&per_ride_driver("d1", dec!(0.125))).unwrap();
    let rides: Vec<_> = (0..40)
        .map(|i| {
            let completed = format!("2024-06-04T{:02}:{:02}:00Z", 6 + i / 4, (i % 4) * 10);
            ride(&format!("r{i}"), "d1", PlatformSource::Uber, dec!(10.00), PaymentMethod::Card, &completed)
        })
        .collect();
    insert_rides(&engine, &rides);

    let stored = engine.store.get_driver_config("d1").unwrap();
    assert_eq!(stored.per_ride_fee, Some(money(dec!(0.125))));

    let result = engine
        .calculate_settlement("d1", PARTNER, &week("2024-06-03"))
        .unwrap();
    assert_eq!(result.completed_rides, 40);
    assert_eq!(result.partner_commission_amount, money(dec!(5.00)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn persisted_settlement_links_its_rides() {
    let engine = cash_netting_fixture();
    let id = engine
        .create_or_update_settlement("d1", PARTNER, &week("2024-06-03"))
        .unwrap();

    let s = engine.store.get_settlement(&id).unwrap();
    assert_eq!(s.status, SettlementStatus::Calculated);
    assert_eq!(s.payout_amount, money(dec!(255.00)));
    assert!(s.platforms.bolt.is_some() && s.platforms.uber.is_some() && s.platforms.freenow.is_some());

    let linked = engine.store.rides_for_settlement(&id).unwrap();
    assert_eq!(linked.len(), 3);
    assert!(linked.iter().all(|r| r.settlement_id.as_deref() == Some(id.as_str())));
}

#[test]
fn recalculation_is_idempotent() {
    let engine = build();
    engine.store.insert_driver(&percentage_driver("d1", dec!(20))).unwrap();
    let p = week("2024-06-03");
    insert_rides(&engine, &random_rides(7, "d1", &p, 40));

    let first_id = engine.create_or_update_settlement("d1", PARTNER, &p).unwrap();
    let first = engine.store.get_settlement(&first_id).unwrap();
    engine.clock().advance(Duration::hours(3));
    let second_id = engine.create_or_update_settlement("d1", PARTNER, &p).unwrap();
    let second = engine.store.get_settlement(&second_id).unwrap();

    assert_eq!(first_id, second_id);
    assert_eq!(first, second);
    assert_eq!(engine.store.settlement_count("d1").unwrap(), 1);
    assert_eq!(engine.store.balance_chain("d1").unwrap().len(), 1);
}

#[test]
fn recalculation_picks_up_new_rides_in_place() {
    let engine = cash_netting_fixture();
    let p = week("2024-06-03");
    let id = engine.create_or_update_settlement("d1", PARTNER, &p).unwrap();
    let first_calculated = engine.store.get_settlement(&id).unwrap().calculated_at;

    engine.clock().advance(Duration::hours(3));
    insert_rides(
        &engine,
        &[ride("k3", "d1", PlatformSource::Uber, dec!(100.00), PaymentMethod::Card, "2024-06-06T09:00:00Z")],
    );
    let again = engine.create_or_update_settlement("d1", PARTNER, &p).unwrap();
    assert_eq!(id, again);

    let s = engine.store.get_settlement(&id).unwrap();
    assert_eq!(s.total_platform_net, money(dec!(600.00)));
    assert_eq!(s.driver_net_earnings, money(dec!(450.00)));
    assert_eq!(s.calculated_at, first_calculated + Duration::hours(3));
    assert_eq!(engine.store.rides_for_settlement(&id).unwrap().len(), 4);

    let entry = engine.store.balance_entry_for_settlement(&id).unwrap().unwrap();
    assert_eq!(entry.settlement_net, money(dec!(450.00)));
    assert_eq!(entry.closing_balance, money(dec!(330.00)));
    assert_eq!(engine.store.event_count("settlement_recalculated").unwrap(), 1);
}

#[test]
fn unknown_driver_fails_without_writes() {
    let engine = build();
    let p = week("2024-06-03");

    let err = engine.create_or_update_settlement("ghost", PARTNER, &p).unwrap_err();
    assert!(matches!(err, SettleError::DriverNotFound { .. }));
    assert!(err.is_not_found());

    assert_eq!(engine.store.settlement_count("ghost").unwrap(), 0);
    assert!(engine.store.balance_chain("ghost").unwrap().is_empty());
    assert!(engine.store.events_for_driver("ghost").unwrap().is_empty());
}

#[test]
fn reversed_period_is_rejected() {
    let err = fleetpay_core::ride::SettlementPeriod::new(date("2024-06-09"), date("2024-06-03"))
        .unwrap_err();
    assert!(matches!(err, SettleError::InvalidPeriod { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Status machine
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn approve_then_pay_records_payout() {
    let engine = cash_netting_fixture();
    let id = engine
        .create_or_update_settlement("d1", PARTNER, &week("2024-06-03"))
        .unwrap();

    let approved = engine.approve_settlement(&id).unwrap();
    assert_eq!(approved.status, SettlementStatus::Approved);
    assert!(approved.approved_at.is_some());

    let paid = engine.mark_settlement_paid(&id).unwrap();
    assert_eq!(paid.status, SettlementStatus::Paid);
    assert!(paid.paid_at.is_some());

    let entry = engine.store.balance_entry_for_settlement(&id).unwrap().unwrap();
    assert_eq!(entry.payout_made, money(dec!(255.00)));
    // Informational only: the closing balance does not move.
    assert_eq!(entry.closing_balance, money(dec!(255.00)));
}

#[test]
fn skipping_or_repeating_a_step_is_rejected() {
    let engine = cash_netting_fixture();
    let id = engine
        .create_or_update_settlement("d1", PARTNER, &week("2024-06-03"))
        .unwrap();

    let err = engine.mark_settlement_paid(&id).unwrap_err();
    assert!(matches!(err, SettleError::InvalidTransition { .. }));

    engine.approve_settlement(&id).unwrap();
    let err = engine.approve_settlement(&id).unwrap_err();
    assert!(matches!(err, SettleError::InvalidTransition { .. }));

    let err = engine.approve_settlement("no-such-settlement").unwrap_err();
    assert!(matches!(err, SettleError::SettlementNotFound { .. }));
}

#[test]
fn recalculation_keeps_status_unless_reset() {
    let engine = cash_netting_fixture();
    let p = week("2024-06-03");
    let id = engine.create_or_update_settlement("d1", PARTNER, &p).unwrap();
    engine.approve_settlement(&id).unwrap();

    engine.create_or_update_settlement("d1", PARTNER, &p).unwrap();
    let kept = engine.store.get_settlement(&id).unwrap();
    assert_eq!(kept.status, SettlementStatus::Approved);
    assert!(kept.approved_at.is_some());

    engine.recalculate_settlement("d1", PARTNER, &p, true).unwrap();
    let reset = engine.store.get_settlement(&id).unwrap();
    assert_eq!(reset.status, SettlementStatus::Calculated);
    assert!(reset.approved_at.is_none());
}
