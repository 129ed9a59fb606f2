//! Shared identifier types used across the settlement engine.

/// A driver working for a partner fleet.
pub type DriverId = String;

/// The fleet-operating partner that takes the commission.
pub type PartnerId = String;

/// A persisted settlement row.
pub type SettlementId = String;

pub type VehicleId = String;

pub type RideId = String;

/// Fresh random identifier for rows the engine creates.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
