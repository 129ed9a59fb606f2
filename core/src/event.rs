//! The audit trail of ledger-affecting operations.
//!
//! RULE: Every state change the engine makes is recorded in the event log.
//! Variants are only ever added, never removed or reordered.

use crate::{
    money::Money,
    types::{DriverId, SettlementId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    SettlementCalculated {
        settlement_id:      SettlementId,
        driver_id:          DriverId,
        period:             String,
        total_platform_net: Money,
        payout_amount:      Money,
        rides_linked:       usize,
    },
    SettlementRecalculated {
        settlement_id:      SettlementId,
        driver_id:          DriverId,
        period:             String,
        total_platform_net: Money,
        payout_amount:      Money,
        rides_linked:       usize,
        status_reset:       bool,
    },
    LineItemsRecomputed {
        settlement_id:       SettlementId,
        line_items_total:    Money,
        driver_net_earnings: Money,
        payout_amount:       Money,
    },
    SettlementApproved {
        settlement_id: SettlementId,
    },
    SettlementPaid {
        settlement_id: SettlementId,
        payout_amount: Money,
    },
    BalanceEntryPosted {
        driver_id:       DriverId,
        settlement_id:   SettlementId,
        opening_balance: Money,
        closing_balance: Money,
    },
    ManualAdjustmentPosted {
        driver_id:       DriverId,
        entry_id:        String,
        amount:          Money,
        closing_balance: Money,
    },
    LedgerRechained {
        driver_id:       DriverId,
        entries_updated: usize,
    },
}

impl LedgerEvent {
    /// Stable name stored in the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            LedgerEvent::SettlementCalculated { .. }   => "settlement_calculated",
            LedgerEvent::SettlementRecalculated { .. } => "settlement_recalculated",
            LedgerEvent::LineItemsRecomputed { .. }    => "line_items_recomputed",
            LedgerEvent::SettlementApproved { .. }     => "settlement_approved",
            LedgerEvent::SettlementPaid { .. }         => "settlement_paid",
            LedgerEvent::BalanceEntryPosted { .. }     => "balance_entry_posted",
            LedgerEvent::ManualAdjustmentPosted { .. } => "manual_adjustment_posted",
            LedgerEvent::LedgerRechained { .. }        => "ledger_rechained",
        }
    }
}

/// A row in the event_log table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:          Option<i64>,
    pub driver_id:   Option<DriverId>,
    pub recorded_at: DateTime<Utc>,
    pub component:   String,
    pub event_type:  String,
    pub payload:     String,
}

impl EventLogEntry {
    pub fn new(
        driver_id: Option<&str>,
        component: &str,
        event: &LedgerEvent,
        recorded_at: DateTime<Utc>,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id:          None,
            driver_id:   driver_id.map(str::to_string),
            recorded_at,
            component:   component.to_string(),
            event_type:  event.type_name().to_string(),
            payload:     serde_json::to_string(event)?,
        })
    }

    pub fn decode(&self) -> serde_json::Result<LedgerEvent> {
        serde_json::from_str(&self.payload)
    }
}
