//! Per-driver serialization across engine handles.
//!
//! Two handles on one database file post to the same driver's ledger from
//! separate threads; the chain must come out intact.

mod common;

use common::*;
use fleetpay_core::{
    clock::LedgerClock,
    config::EngineConfig,
    engine::SettlementEngine,
    ride::{PaymentMethod, PlatformSource},
    store::SettleStore,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;

struct TempDb(String);

impl TempDb {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir()
            .join(format!("fleetpay-{name}-{}.db", std::process::id()))
            .to_string_lossy()
            .into_owned();
        let db = TempDb(path);
        db.remove();
        db
    }

    fn remove(&self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.0));
        }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        self.remove();
    }
}

fn file_engine(db: &TempDb) -> SettlementEngine {
    let store = SettleStore::open(&db.0).unwrap();
    store.migrate().unwrap();
    SettlementEngine::with_clock(
        EngineConfig::default_test(),
        store,
        Arc::new(LedgerClock::fixed(at("2024-07-01T12:00:00Z"))),
    )
}

#[test]
fn concurrent_adjustments_keep_the_chain() {
    let db = TempDb::new("adjust");
    let engine = file_engine(&db);
    engine.store.insert_driver(&bare_driver("d1")).unwrap();

    let handles: Vec<_> = [dec!(1.00), dec!(-0.50)]
        .into_iter()
        .map(|amount| {
            let worker = engine.fork().unwrap();
            thread::spawn(move || {
                for _ in 0..20 {
                    worker
                        .add_manual_adjustment("d1", PARTNER, money(amount), None)
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let chain = engine.store.balance_chain("d1").unwrap();
    assert_eq!(chain.len(), 40);
    engine.verify_balance_chain("d1").unwrap();
    assert_eq!(engine.get_current_balance("d1").unwrap(), money(dec!(10.00)));
}

#[test]
fn settlements_and_adjustments_interleave_safely() {
    let db = TempDb::new("mixed");
    let engine = file_engine(&db);
    engine.store.insert_driver(&bare_driver("d1")).unwrap();
    let weeks = ["2024-05-27", "2024-06-03", "2024-06-10", "2024-06-17"];
    for (i, start) in weeks.iter().enumerate() {
        insert_rides(
            &engine,
            &[ride(
                &format!("r{i}"),
                "d1",
                PlatformSource::Uber,
                dec!(100.00),
                PaymentMethod::Card,
                &format!("{start}T10:00:00Z"),
            )],
        );
    }

    let settler = engine.fork().unwrap();
    let adjuster = engine.fork().unwrap();
    let a = thread::spawn(move || {
        for start in weeks.iter().rev() {
            settler
                .create_or_update_settlement("d1", PARTNER, &week(start))
                .unwrap();
        }
    });
    let b = thread::spawn(move || {
        for _ in 0..10 {
            adjuster
                .add_manual_adjustment("d1", PARTNER, money(dec!(-5.00)), None)
                .unwrap();
        }
    });
    a.join().unwrap();
    b.join().unwrap();

    engine.verify_balance_chain("d1").unwrap();
    assert_eq!(engine.store.balance_chain("d1").unwrap().len(), 14);
    assert_eq!(engine.get_current_balance("d1").unwrap(), money(dec!(350.00)));
}
