use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettleError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Driver '{driver_id}' not found")]
    DriverNotFound { driver_id: String },

    #[error("Vehicle '{vehicle_id}' not found")]
    VehicleNotFound { vehicle_id: String },

    #[error("Settlement '{settlement_id}' not found")]
    SettlementNotFound { settlement_id: String },

    #[error("Line item '{line_item_id}' not found")]
    LineItemNotFound { line_item_id: String },

    #[error("Invalid period: {start} .. {end}")]
    InvalidPeriod { start: String, end: String },

    #[error("Invalid amount for {field}: {value}")]
    InvalidAmount { field: String, value: String },

    #[error("Settlement '{settlement_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        settlement_id: String,
        from: String,
        to: String,
    },

    #[error("Balance chain fork for driver '{driver_id}' at entry {entry_id}: {detail}")]
    ConcurrencyViolation {
        driver_id: String,
        entry_id: String,
        detail: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SettleError {
    /// True for the NotFound family. Callers must not retry these without
    /// correcting the referenced id.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SettleError::DriverNotFound { .. }
                | SettleError::VehicleNotFound { .. }
                | SettleError::SettlementNotFound { .. }
                | SettleError::LineItemNotFound { .. }
        )
    }
}

pub type SettleResult<T> = Result<T, SettleError>;
