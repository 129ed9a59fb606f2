//! Driver balance ledger.
//!
//! Per driver, entries ordered by period_end form a chain:
//!   entry[0].opening_balance == 0
//!   entry[i].opening_balance == entry[i-1].closing_balance
//!   closing = opening + settlement_net - cash_collected + adjustments
//!
//! RULE: Every ledger mutation for a driver runs under that driver's lock
//! (see DriverLocks) and inside one store transaction. A chain that does
//! not verify is a hard failure, never repaired silently.

use crate::{
    error::{SettleError, SettleResult},
    money::Money,
    ride::SettlementPeriod,
    settlement::Settlement,
    types::{new_id, DriverId, PartnerId, SettlementId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverBalanceEntry {
    pub id:               String,
    pub driver_id:        DriverId,
    pub partner_id:       PartnerId,
    /// None for manual adjustments.
    pub settlement_id:    Option<SettlementId>,
    pub period_start:     DateTime<Utc>,
    pub period_end:       DateTime<Utc>,
    pub opening_balance:  Money,
    pub settlement_net:   Money,
    pub line_items_total: Money,
    pub cash_collected:   Money,
    /// Informational; recorded when the settlement is paid.
    pub payout_made:      Money,
    pub adjustments:      Money,
    pub closing_balance:  Money,
    pub notes:            Option<String>,
    pub created_at:       DateTime<Utc>,
}

impl DriverBalanceEntry {
    /// Entry derived from a settlement, opening at `opening_balance`.
    pub fn for_settlement(
        settlement: &Settlement,
        opening_balance: Money,
        now: DateTime<Utc>,
    ) -> Self {
        let mut entry = Self {
            id:               new_id(),
            driver_id:        settlement.driver_id.clone(),
            partner_id:       settlement.partner_id.clone(),
            settlement_id:    Some(settlement.id.clone()),
            period_start:     settlement.period.window_start(),
            period_end:       settlement.period.window_end(),
            opening_balance,
            settlement_net:   settlement.driver_net_earnings,
            line_items_total: settlement.line_items_total,
            cash_collected:   settlement.cash_collected_by_driver,
            payout_made:      Money::ZERO,
            adjustments:      Money::ZERO,
            closing_balance:  Money::ZERO,
            notes:            None,
            created_at:       now,
        };
        entry.recompute_closing();
        entry
    }

    /// Point-in-time manual adjustment, opening at `opening_balance`.
    pub fn manual_adjustment(
        driver_id: &str,
        partner_id: &str,
        opening_balance: Money,
        amount: Money,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut entry = Self {
            id:               new_id(),
            driver_id:        driver_id.to_string(),
            partner_id:       partner_id.to_string(),
            settlement_id:    None,
            period_start:     at,
            period_end:       at,
            opening_balance,
            settlement_net:   Money::ZERO,
            line_items_total: Money::ZERO,
            cash_collected:   Money::ZERO,
            payout_made:      Money::ZERO,
            adjustments:      amount.round(),
            closing_balance:  Money::ZERO,
            notes,
            created_at:       at,
        };
        entry.recompute_closing();
        entry
    }

    /// Refresh the settlement-derived figures, keeping id, opening balance
    /// and payout bookkeeping.
    pub fn refresh_from_settlement(&mut self, settlement: &Settlement) {
        self.partner_id       = settlement.partner_id.clone();
        self.period_start     = settlement.period.window_start();
        self.period_end       = settlement.period.window_end();
        self.settlement_net   = settlement.driver_net_earnings;
        self.line_items_total = settlement.line_items_total;
        self.cash_collected   = settlement.cash_collected_by_driver;
        self.recompute_closing();
    }

    pub fn expected_closing(&self) -> Money {
        closing_balance(
            self.opening_balance,
            self.settlement_net,
            self.cash_collected,
            self.adjustments,
        )
    }

    pub fn recompute_closing(&mut self) {
        self.closing_balance = self.expected_closing();
    }

    pub fn is_adjustment(&self) -> bool {
        self.settlement_id.is_none()
    }
}

pub fn closing_balance(
    opening: Money,
    settlement_net: Money,
    cash_collected: Money,
    adjustments: Money,
) -> Money {
    (opening + settlement_net - cash_collected + adjustments).round()
}

/// Closing balance of the latest entry that ended strictly before the
/// period starts; zero for a driver's first settlement.
/// `chain` must be in period_end ascending order.
pub fn opening_for_period(chain: &[DriverBalanceEntry], period: &SettlementPeriod) -> Money {
    let start = period.window_start();
    chain
        .iter()
        .rev()
        .find(|e| e.period_end < start)
        .map(|e| e.closing_balance)
        .unwrap_or(Money::ZERO)
}

/// Re-derive opening and closing balances of every entry after `anchor`
/// (`None` means from the very first entry, which opens at zero).
/// Returns the indices of entries whose figures changed.
pub fn rechain_after(chain: &mut [DriverBalanceEntry], anchor: Option<usize>) -> Vec<usize> {
    let first = anchor.map(|a| a + 1).unwrap_or(0);
    let mut changed = Vec::new();
    for i in first..chain.len() {
        let opening = if i == 0 { Money::ZERO } else { chain[i - 1].closing_balance };
        let before = (chain[i].opening_balance, chain[i].closing_balance);
        chain[i].opening_balance = opening;
        chain[i].recompute_closing();
        if (chain[i].opening_balance, chain[i].closing_balance) != before {
            changed.push(i);
        }
    }
    changed
}

/// Check the chain invariants over a driver's entries in period_end order.
pub fn verify_chain(driver_id: &str, chain: &[DriverBalanceEntry]) -> SettleResult<()> {
    let mut expected_opening = Money::ZERO;
    for entry in chain {
        if entry.opening_balance != expected_opening {
            return Err(SettleError::ConcurrencyViolation {
                driver_id: driver_id.to_string(),
                entry_id:  entry.id.clone(),
                detail:    format!(
                    "opens at {} but the previous entry closed at {}",
                    entry.opening_balance, expected_opening
                ),
            });
        }
        if entry.closing_balance != entry.expected_closing() {
            return Err(SettleError::ConcurrencyViolation {
                driver_id: driver_id.to_string(),
                entry_id:  entry.id.clone(),
                detail:    format!(
                    "closes at {} but its figures give {}",
                    entry.closing_balance,
                    entry.expected_closing()
                ),
            });
        }
        expected_opening = entry.closing_balance;
    }
    Ok(())
}

/// Process-wide registry of per-driver mutexes. Shared between engine
/// handles (see `SettlementEngine::fork`) so that ledger writes for one
/// driver are serialized across threads while other drivers proceed.
#[derive(Debug, Default)]
pub struct DriverLocks {
    locks: Mutex<HashMap<DriverId, Arc<Mutex<()>>>>,
}

impl DriverLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, driver_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(driver_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Hold a driver's ledger lock for the duration of `f`.
pub fn with_driver_lock<T>(
    locks: &DriverLocks,
    driver_id: &str,
    f: impl FnOnce() -> SettleResult<T>,
) -> SettleResult<T> {
    let lock = locks.lock_for(driver_id);
    let _guard: MutexGuard<'_, ()> = lock.lock().unwrap_or_else(|e| e.into_inner());
    f()
}
