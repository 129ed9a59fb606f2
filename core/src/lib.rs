//! fleetpay-core: multi-platform ride settlement for partner fleets.
//!
//! Pure calculation (commission, proration, aggregation, calculator) sits
//! underneath a persistent layer (store, ledger, engine). Callers use
//! `SettlementEngine`; everything else is public for tests and tooling.

pub mod aggregator;
pub mod calculator;
pub mod clock;
pub mod commission;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod event;
pub mod ledger;
pub mod money;
pub mod proration;
pub mod ride;
pub mod settlement;
pub mod store;
pub mod types;
