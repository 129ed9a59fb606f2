//! The settlement engine: the only entry point callers use.
//!
//! ORDER OF A LEDGER-AFFECTING CALL (fixed, never reordered):
//!   1. Resolve referenced ids (NotFound before any write).
//!   2. Take the driver's lock.
//!   3. Open one IMMEDIATE transaction.
//!   4. Write settlement / line item / balance rows.
//!   5. Rechain later balance entries and verify the whole chain.
//!   6. Append the audit event(s), commit.
//!
//! RULES:
//!   - Calculation is pure; it runs outside the lock and may run in parallel.
//!   - Transactions never nest: helpers suffixed `_in_tx` assume one is open.
//!   - "now" always comes from the injected LedgerClock.

use crate::{
    calculator::{self, SettlementInputs, SettlementResult},
    clock::LedgerClock,
    config::EngineConfig,
    error::{SettleError, SettleResult},
    event::{EventLogEntry, LedgerEvent},
    ledger::{opening_for_period, rechain_after, verify_chain, with_driver_lock, DriverBalanceEntry, DriverLocks},
    money::Money,
    ride::SettlementPeriod,
    settlement::{line_items_total, LineItemKind, Settlement, SettlementLineItem, SettlementStatus},
    store::SettleStore,
    types::{new_id, DriverId, SettlementId},
};
use chrono::{TimeZone, Utc};
use rayon::prelude::*;
use std::sync::Arc;

const SETTLEMENT_COMPONENT: &str = "settlement";
const LEDGER_COMPONENT: &str = "ledger";

/// Result of a partner-wide batch run. Failed drivers never abort the rest.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub settled:  Vec<(DriverId, SettlementId)>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub driver_id: DriverId,
    pub error:     SettleError,
}

pub struct SettlementEngine {
    pub config: EngineConfig,
    pub store:  SettleStore,
    clock:      Arc<LedgerClock>,
    locks:      Arc<DriverLocks>,
}

impl SettlementEngine {
    pub fn new(config: EngineConfig, store: SettleStore) -> Self {
        Self::with_clock(config, store, Arc::new(LedgerClock::System))
    }

    pub fn with_clock(config: EngineConfig, store: SettleStore, clock: Arc<LedgerClock>) -> Self {
        Self {
            config,
            store,
            clock,
            locks: Arc::new(DriverLocks::new()),
        }
    }

    /// In-memory engine with test config and a clock pinned to
    /// 2024-07-01T12:00:00Z.
    pub fn build_test() -> SettleResult<Self> {
        let store = SettleStore::in_memory()?;
        store.migrate()?;
        let start = Utc
            .with_ymd_and_hms(2024, 7, 1, 12, 0, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid test clock start"))?;
        Ok(Self::with_clock(
            EngineConfig::default_test(),
            store,
            Arc::new(LedgerClock::fixed(start)),
        ))
    }

    /// A second handle on the same database with its own connection, for
    /// use on another thread. Shares the clock and the driver locks.
    /// An in-memory store forks into a fresh, empty database.
    pub fn fork(&self) -> SettleResult<Self> {
        let store = self.store.reopen()?;
        store.migrate()?;
        Ok(Self {
            config: self.config.clone(),
            store,
            clock:  Arc::clone(&self.clock),
            locks:  Arc::clone(&self.locks),
        })
    }

    pub fn clock(&self) -> &LedgerClock {
        &self.clock
    }

    // ── Calculation ────────────────────────────────────────────

    /// Fetch everything one driver's calculation needs.
    pub fn fetch_inputs(
        &self,
        driver_id: &str,
        period: &SettlementPeriod,
    ) -> SettleResult<SettlementInputs> {
        let driver = self.store.get_driver_config(driver_id)?;
        let vehicle = self.store.assigned_vehicle_cost(driver_id)?;
        let rides = self.store.rides_in_period(driver_id, period)?;
        Ok(SettlementInputs { driver, vehicle, rides })
    }

    /// Compute a settlement without writing anything.
    pub fn calculate_settlement(
        &self,
        driver_id: &str,
        partner_id: &str,
        period: &SettlementPeriod,
    ) -> SettleResult<SettlementResult> {
        let inputs = self.fetch_inputs(driver_id, period)?;
        Ok(calculator::calculate_settlement(partner_id, period, &inputs, &self.config))
    }

    /// Calculate and persist, then post the balance entry. Recalculating an
    /// existing (driver, period) keeps its status history.
    pub fn create_or_update_settlement(
        &self,
        driver_id: &str,
        partner_id: &str,
        period: &SettlementPeriod,
    ) -> SettleResult<SettlementId> {
        self.recalculate_settlement(driver_id, partner_id, period, false)
    }

    /// As `create_or_update_settlement`; `reset_status` returns an existing
    /// row to CALCULATED and clears its approval and payment stamps.
    pub fn recalculate_settlement(
        &self,
        driver_id: &str,
        partner_id: &str,
        period: &SettlementPeriod,
        reset_status: bool,
    ) -> SettleResult<SettlementId> {
        let result = self.calculate_settlement(driver_id, partner_id, period)?;
        self.persist_settlement(&result, reset_status)
    }

    fn persist_settlement(
        &self,
        result: &SettlementResult,
        reset_status: bool,
    ) -> SettleResult<SettlementId> {
        with_driver_lock(&self.locks, &result.driver_id, || {
            self.store
                .in_transaction(|| self.persist_settlement_in_tx(result, reset_status))
        })
    }

    fn persist_settlement_in_tx(
        &self,
        result: &SettlementResult,
        reset_status: bool,
    ) -> SettleResult<SettlementId> {
        let now = self.clock.now();
        let existing = self.store.find_settlement(&result.driver_id, &result.period)?;
        let recalculated = existing.is_some();
        let mut settlement = match existing {
            Some(mut s) => {
                s.apply_recalculation(result, now, reset_status);
                s
            }
            None => Settlement::from_result(new_id(), result, now),
        };
        settlement.id = self.store.upsert_settlement(&settlement)?;
        let rides_linked = self
            .store
            .link_rides_to_settlement(&settlement.id, &result.ride_ids)?;

        let event = if recalculated {
            LedgerEvent::SettlementRecalculated {
                settlement_id:      settlement.id.clone(),
                driver_id:          settlement.driver_id.clone(),
                period:             settlement.period.to_string(),
                total_platform_net: settlement.total_platform_net,
                payout_amount:      settlement.payout_amount,
                rides_linked,
                status_reset:       reset_status,
            }
        } else {
            LedgerEvent::SettlementCalculated {
                settlement_id:      settlement.id.clone(),
                driver_id:          settlement.driver_id.clone(),
                period:             settlement.period.to_string(),
                total_platform_net: settlement.total_platform_net,
                payout_amount:      settlement.payout_amount,
                rides_linked,
            }
        };
        self.record(Some(&settlement.driver_id), SETTLEMENT_COMPONENT, &event)?;

        log::info!(
            "driver={} period={} settlement={} net={} payout={} rides={}{}",
            settlement.driver_id,
            settlement.period,
            settlement.id,
            settlement.driver_net_earnings,
            settlement.payout_amount,
            rides_linked,
            if recalculated { " (recalculated)" } else { "" },
        );

        self.post_balance_entry_in_tx(&settlement)?;
        Ok(settlement.id)
    }

    // ── Line items and fuel ────────────────────────────────────

    /// Re-derive line item total, net earnings and payout from the stored
    /// base figures. Never re-reads ride data.
    pub fn recompute_line_items(&self, settlement_id: &str) -> SettleResult<Settlement> {
        let driver_id = self.store.get_settlement(settlement_id)?.driver_id;
        with_driver_lock(&self.locks, &driver_id, || {
            self.store
                .in_transaction(|| self.recompute_line_items_in_tx(settlement_id))
        })
    }

    fn recompute_line_items_in_tx(&self, settlement_id: &str) -> SettleResult<Settlement> {
        let mut settlement = self.store.get_settlement(settlement_id)?;
        let items = self.store.line_items_for_settlement(settlement_id)?;
        settlement.apply_line_items(line_items_total(&items));
        self.store.update_settlement_totals(
            settlement_id,
            settlement.line_items_total,
            settlement.driver_net_earnings,
            settlement.payout_amount,
        )?;
        self.record(
            Some(&settlement.driver_id),
            SETTLEMENT_COMPONENT,
            &LedgerEvent::LineItemsRecomputed {
                settlement_id:       settlement.id.clone(),
                line_items_total:    settlement.line_items_total,
                driver_net_earnings: settlement.driver_net_earnings,
                payout_amount:       settlement.payout_amount,
            },
        )?;
        log::debug!(
            "settlement={} line_items={} net={} payout={}",
            settlement.id,
            settlement.line_items_total,
            settlement.driver_net_earnings,
            settlement.payout_amount
        );
        self.post_balance_entry_in_tx(&settlement)?;
        Ok(settlement)
    }

    /// Attach a bonus or deduction and recompute. `amount` must be positive.
    pub fn add_line_item(
        &self,
        settlement_id: &str,
        kind: LineItemKind,
        amount: Money,
        description: Option<String>,
    ) -> SettleResult<SettlementLineItem> {
        if !amount.round().is_positive() {
            return Err(SettleError::InvalidAmount {
                field: "line_item.amount".into(),
                value: amount.to_string(),
            });
        }
        let driver_id = self.store.get_settlement(settlement_id)?.driver_id;
        with_driver_lock(&self.locks, &driver_id, || {
            self.store.in_transaction(|| {
                let item = SettlementLineItem {
                    id: new_id(),
                    settlement_id: settlement_id.to_string(),
                    kind,
                    amount: amount.round(),
                    description,
                    created_at: self.clock.now(),
                };
                self.store.insert_line_item(&item)?;
                self.recompute_line_items_in_tx(settlement_id)?;
                Ok(item)
            })
        })
    }

    pub fn remove_line_item(&self, line_item_id: &str) -> SettleResult<Settlement> {
        let item = self.store.get_line_item(line_item_id)?;
        let driver_id = self.store.get_settlement(&item.settlement_id)?.driver_id;
        with_driver_lock(&self.locks, &driver_id, || {
            self.store.in_transaction(|| {
                self.store.delete_line_item(line_item_id)?;
                self.recompute_line_items_in_tx(&item.settlement_id)
            })
        })
    }

    pub fn line_items(&self, settlement_id: &str) -> SettleResult<Vec<SettlementLineItem>> {
        self.store.get_settlement(settlement_id)?;
        self.store.line_items_for_settlement(settlement_id)
    }

    /// Manual fuel deduction; replaces any earlier value.
    pub fn set_fuel_cost(&self, settlement_id: &str, amount: Money) -> SettleResult<Settlement> {
        if amount.is_negative() {
            return Err(SettleError::InvalidAmount {
                field: "fuel_cost_deduction".into(),
                value: amount.to_string(),
            });
        }
        let driver_id = self.store.get_settlement(settlement_id)?.driver_id;
        with_driver_lock(&self.locks, &driver_id, || {
            self.store.in_transaction(|| {
                self.store.update_fuel_cost(settlement_id, amount.round())?;
                self.recompute_line_items_in_tx(settlement_id)
            })
        })
    }

    // ── Status ─────────────────────────────────────────────────

    pub fn approve_settlement(&self, settlement_id: &str) -> SettleResult<Settlement> {
        self.advance_status(settlement_id, SettlementStatus::Approved)
    }

    /// Mark paid and record the payout on the settlement's balance entry.
    pub fn mark_settlement_paid(&self, settlement_id: &str) -> SettleResult<Settlement> {
        self.advance_status(settlement_id, SettlementStatus::Paid)
    }

    fn advance_status(&self, settlement_id: &str, to: SettlementStatus) -> SettleResult<Settlement> {
        let driver_id = self.store.get_settlement(settlement_id)?.driver_id;
        with_driver_lock(&self.locks, &driver_id, || {
            self.store.in_transaction(|| {
                let mut settlement = self.store.get_settlement(settlement_id)?;
                settlement.advance_status(to, self.clock.now())?;
                self.store.update_settlement_status(&settlement)?;
                let event = match to {
                    SettlementStatus::Paid => {
                        self.store
                            .set_payout_made(&settlement.id, settlement.payout_amount)?;
                        LedgerEvent::SettlementPaid {
                            settlement_id: settlement.id.clone(),
                            payout_amount: settlement.payout_amount,
                        }
                    }
                    _ => LedgerEvent::SettlementApproved {
                        settlement_id: settlement.id.clone(),
                    },
                };
                self.record(Some(&settlement.driver_id), SETTLEMENT_COMPONENT, &event)?;
                log::info!("settlement={} status={}", settlement.id, settlement.status.as_str());
                Ok(settlement)
            })
        })
    }

    // ── Balance ledger ─────────────────────────────────────────

    /// Upsert the settlement's entry, then rechain everything after it.
    /// A chain that is already broken is reported, never rewritten.
    fn post_balance_entry_in_tx(&self, settlement: &Settlement) -> SettleResult<DriverBalanceEntry> {
        let driver_id = settlement.driver_id.as_str();
        let chain = self.store.balance_chain(driver_id)?;
        verify_chain(driver_id, &chain)?;
        let entry = match chain
            .iter()
            .find(|e| e.settlement_id.as_deref() == Some(settlement.id.as_str()))
        {
            Some(existing) => {
                let mut entry = existing.clone();
                entry.refresh_from_settlement(settlement);
                entry
            }
            None => {
                let opening = opening_for_period(&chain, &settlement.period);
                DriverBalanceEntry::for_settlement(settlement, opening, self.clock.now())
            }
        };
        self.store.upsert_balance_entry(&entry)?;

        let entry = self.rechain_and_verify_in_tx(driver_id, &settlement.id, true)?;
        self.record(
            Some(driver_id),
            LEDGER_COMPONENT,
            &LedgerEvent::BalanceEntryPosted {
                driver_id:       driver_id.to_string(),
                settlement_id:   settlement.id.clone(),
                opening_balance: entry.opening_balance,
                closing_balance: entry.closing_balance,
            },
        )?;
        Ok(entry)
    }

    /// Re-derive every entry after the one preceding `key` in chain order,
    /// persist the ones that moved, and verify the stored chain. `key` is a
    /// settlement id when `by_settlement`, else an entry id. Returns the
    /// entry for `key` as stored.
    fn rechain_and_verify_in_tx(
        &self,
        driver_id: &str,
        key: &str,
        by_settlement: bool,
    ) -> SettleResult<DriverBalanceEntry> {
        let mut chain = self.store.balance_chain(driver_id)?;
        let position = chain.iter().position(|e| {
            if by_settlement {
                e.settlement_id.as_deref() == Some(key)
            } else {
                e.id == key
            }
        });
        let Some(position) = position else {
            return Err(anyhow::anyhow!("balance entry for {key} vanished mid-transaction").into());
        };

        let changed = rechain_after(&mut chain, position.checked_sub(1));
        for &i in &changed {
            self.store.update_balance_figures(
                &chain[i].id,
                chain[i].opening_balance,
                chain[i].closing_balance,
            )?;
        }
        let later_moved = changed.iter().filter(|&&i| i != position).count();
        if later_moved > 0 {
            log::debug!("driver={driver_id} rechained {later_moved} later balance entries");
            self.record(
                Some(driver_id),
                LEDGER_COMPONENT,
                &LedgerEvent::LedgerRechained {
                    driver_id:       driver_id.to_string(),
                    entries_updated: later_moved,
                },
            )?;
        }

        let stored = self.store.balance_chain(driver_id)?;
        verify_chain(driver_id, &stored)?;
        Ok(chain.swap_remove(position))
    }

    /// Closing balance of the driver's latest entry; zero without entries.
    pub fn get_current_balance(&self, driver_id: &str) -> SettleResult<Money> {
        Ok(self
            .store
            .latest_balance_entry(driver_id)?
            .map(|e| e.closing_balance)
            .unwrap_or(Money::ZERO))
    }

    /// Post a point-in-time adjustment opening at the current balance.
    pub fn add_manual_adjustment(
        &self,
        driver_id: &str,
        partner_id: &str,
        amount: Money,
        notes: Option<String>,
    ) -> SettleResult<DriverBalanceEntry> {
        if !self.store.driver_exists(driver_id)? {
            return Err(SettleError::DriverNotFound {
                driver_id: driver_id.to_string(),
            });
        }
        with_driver_lock(&self.locks, driver_id, || {
            self.store.in_transaction(|| {
                let chain = self.store.balance_chain(driver_id)?;
                verify_chain(driver_id, &chain)?;
                let opening = chain.last().map(|e| e.closing_balance).unwrap_or(Money::ZERO);
                let entry = DriverBalanceEntry::manual_adjustment(
                    driver_id,
                    partner_id,
                    opening,
                    amount,
                    notes,
                    self.clock.now(),
                );
                self.store.insert_balance_entry(&entry)?;
                let entry = self.rechain_and_verify_in_tx(driver_id, &entry.id, false)?;
                self.record(
                    Some(driver_id),
                    LEDGER_COMPONENT,
                    &LedgerEvent::ManualAdjustmentPosted {
                        driver_id:       driver_id.to_string(),
                        entry_id:        entry.id.clone(),
                        amount:          entry.adjustments,
                        closing_balance: entry.closing_balance,
                    },
                )?;
                log::info!(
                    "driver={driver_id} adjustment={} opening={} closing={}",
                    entry.adjustments,
                    entry.opening_balance,
                    entry.closing_balance
                );
                Ok(entry)
            })
        })
    }

    /// Newest first.
    pub fn get_balance_history(
        &self,
        driver_id: &str,
        limit: usize,
    ) -> SettleResult<Vec<DriverBalanceEntry>> {
        self.store.balance_history(driver_id, limit)
    }

    pub fn verify_balance_chain(&self, driver_id: &str) -> SettleResult<()> {
        let chain = self.store.balance_chain(driver_id)?;
        verify_chain(driver_id, &chain)
    }

    // ── Batch ──────────────────────────────────────────────────

    /// Settle every active driver of a partner for one period.
    /// Inputs are read and results written on this handle's connection;
    /// only the pure calculation runs on the rayon pool.
    pub fn settle_all(
        &self,
        partner_id: &str,
        period: &SettlementPeriod,
    ) -> SettleResult<BatchOutcome> {
        let drivers = self.store.active_drivers(partner_id)?;
        let mut outcome = BatchOutcome::default();

        let mut fetched = Vec::with_capacity(drivers.len());
        for driver_id in drivers {
            match self.fetch_inputs(&driver_id, period) {
                Ok(inputs) => fetched.push(inputs),
                Err(error) => outcome.failures.push(BatchFailure { driver_id, error }),
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.batch_worker_threads)
            .build()
            .map_err(|e| anyhow::anyhow!("cannot start batch workers: {e}"))?;
        let config = &self.config;
        let results: Vec<SettlementResult> = pool.install(|| {
            fetched
                .par_iter()
                .map(|inputs| calculator::calculate_settlement(partner_id, period, inputs, config))
                .collect()
        });

        for result in &results {
            match self.persist_settlement(result, false) {
                Ok(id) => outcome.settled.push((result.driver_id.clone(), id)),
                Err(error) => outcome.failures.push(BatchFailure {
                    driver_id: result.driver_id.clone(),
                    error,
                }),
            }
        }

        for failure in &outcome.failures {
            log::warn!(
                "driver={} period={period} settlement failed: {}",
                failure.driver_id,
                failure.error
            );
        }
        log::info!(
            "partner={partner_id} period={period} settled={} failed={}",
            outcome.settled.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    fn record(&self, driver_id: Option<&str>, component: &str, event: &LedgerEvent) -> SettleResult<()> {
        let entry = EventLogEntry::new(driver_id, component, event, self.clock.now())?;
        self.store.append_event(&entry)
    }
}
