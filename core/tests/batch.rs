//! Partner-wide batch settlement.
//!
//! 1. Every active driver is settled; inactive drivers are skipped
//! 2. One driver's failure is collected, never aborts the others
//! 3. Parallel results match the single-driver calculation

mod common;

use common::*;
use fleetpay_core::{
    driver::DriverCommissionConfig,
    error::SettleError,
    money::Money,
    ride::{PaymentMethod, PlatformSource},
};
use rust_decimal_macros::dec;

#[test]
fn settles_every_active_driver() {
    let engine = build();
    let p = week("2024-06-10");
    for (i, id) in ["d1", "d2", "d3"].iter().enumerate() {
        engine.store.insert_driver(&percentage_driver(id, dec!(20))).unwrap();
        insert_rides(&engine, &random_rides(i as u64 + 1, id, &p, 15));
    }
    engine
        .store
        .insert_driver(&DriverCommissionConfig { active: false, ..bare_driver("idle") })
        .unwrap();

    let outcome = engine.settle_all(PARTNER, &p).unwrap();
    assert!(outcome.failures.is_empty());
    let mut settled: Vec<&str> = outcome.settled.iter().map(|(d, _)| d.as_str()).collect();
    settled.sort();
    assert_eq!(settled, vec!["d1", "d2", "d3"]);
    assert_eq!(engine.store.settlement_count("idle").unwrap(), 0);

    for (driver_id, settlement_id) in &outcome.settled {
        let stored = engine.store.get_settlement(settlement_id).unwrap();
        let fresh = engine.calculate_settlement(driver_id, PARTNER, &p).unwrap();
        assert_eq!(stored.payout_amount, fresh.payout_amount);
        assert_eq!(stored.total_platform_net, fresh.total_platform_net);
        engine.verify_balance_chain(driver_id).unwrap();
    }
}

#[test]
fn one_failure_does_not_abort_the_batch() {
    let engine = build();
    let p = week("2024-06-10");
    for id in ["d1", "d2", "d3"] {
        engine.store.insert_driver(&bare_driver(id)).unwrap();
        insert_rides(
            &engine,
            &[ride(&format!("{id}-now"), id, PlatformSource::Bolt, dec!(80.00), PaymentMethod::Card, "2024-06-11T10:00:00Z")],
        );
    }

    // d2 carries a forked chain from earlier weeks.
    insert_rides(
        &engine,
        &[
            ride("d2-a", "d2", PlatformSource::Uber, dec!(100.00), PaymentMethod::Card, "2024-05-28T10:00:00Z"),
            ride("d2-b", "d2", PlatformSource::Uber, dec!(50.00), PaymentMethod::Card, "2024-06-04T10:00:00Z"),
        ],
    );
    engine.create_or_update_settlement("d2", PARTNER, &week("2024-05-27")).unwrap();
    engine.create_or_update_settlement("d2", PARTNER, &week("2024-06-03")).unwrap();
    let chain = engine.store.balance_chain("d2").unwrap();
    engine
        .store
        .update_balance_figures(&chain[1].id, Money::ZERO, money(dec!(50.00)))
        .unwrap();

    let outcome = engine.settle_all(PARTNER, &p).unwrap();

    let mut settled: Vec<&str> = outcome.settled.iter().map(|(d, _)| d.as_str()).collect();
    settled.sort();
    assert_eq!(settled, vec!["d1", "d3"]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].driver_id, "d2");
    assert!(matches!(
        outcome.failures[0].error,
        SettleError::ConcurrencyViolation { .. }
    ));

    // The failed driver's write was rolled back whole.
    assert_eq!(engine.store.settlement_count("d2").unwrap(), 2);
    assert_eq!(engine.store.balance_chain("d2").unwrap().len(), 2);
    let untagged = engine.store.rides_in_period("d2", &p).unwrap();
    assert!(untagged.iter().all(|r| r.settlement_id.is_none()));
    assert_eq!(
        engine.get_current_balance("d1").unwrap(),
        money(dec!(80.00))
    );
}

#[test]
fn partner_without_drivers_is_empty_outcome() {
    let engine = build();
    let outcome = engine.settle_all("nobody", &week("2024-06-10")).unwrap();
    assert!(outcome.settled.is_empty());
    assert!(outcome.failures.is_empty());
}
