//! The persisted settlement, its line items, and its status lifecycle.
//!
//! Status transitions:
//!   CALCULATED -> APPROVED -> PAID
//! Recalculation keeps the current status unless a reset is requested.

use crate::{
    aggregator::PlatformBreakdowns,
    calculator::{base_net_earnings, SettlementResult},
    error::{SettleError, SettleResult},
    money::Money,
    ride::SettlementPeriod,
    types::{DriverId, PartnerId, SettlementId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Calculated,
    Approved,
    Paid,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Calculated => "CALCULATED",
            SettlementStatus::Approved   => "APPROVED",
            SettlementStatus::Paid       => "PAID",
        }
    }

    /// The status `self` may move to next, if any.
    fn next(&self) -> Option<SettlementStatus> {
        match self {
            SettlementStatus::Calculated => Some(SettlementStatus::Approved),
            SettlementStatus::Approved   => Some(SettlementStatus::Paid),
            SettlementStatus::Paid       => None,
        }
    }
}

impl FromStr for SettlementStatus {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CALCULATED" => Ok(SettlementStatus::Calculated),
            "APPROVED"   => Ok(SettlementStatus::Approved),
            "PAID"       => Ok(SettlementStatus::Paid),
            other        => Err(anyhow::anyhow!("unknown settlement status '{other}'").into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id:                        SettlementId,
    pub driver_id:                 DriverId,
    pub partner_id:                PartnerId,
    pub period:                    SettlementPeriod,
    pub platforms:                 PlatformBreakdowns,
    pub total_platform_net:        Money,
    pub partner_commission_amount: Money,
    pub vehicle_rental_deduction:  Money,
    pub insurance_deduction:       Money,
    pub fuel_cost_deduction:       Money,
    pub line_items_total:          Money,
    pub cash_collected_by_driver:  Money,
    pub driver_net_earnings:       Money,
    pub payout_amount:             Money,
    pub total_rides:               u32,
    pub completed_rides:           u32,
    pub status:                    SettlementStatus,
    pub calculated_at:             DateTime<Utc>,
    pub approved_at:               Option<DateTime<Utc>>,
    pub paid_at:                   Option<DateTime<Utc>>,
}

impl Settlement {
    /// A fresh CALCULATED settlement built from a calculation result.
    pub fn from_result(id: SettlementId, result: &SettlementResult, now: DateTime<Utc>) -> Self {
        Self {
            id,
            driver_id:                 result.driver_id.clone(),
            partner_id:                result.partner_id.clone(),
            period:                    result.period,
            platforms:                 result.platforms.clone(),
            total_platform_net:        result.total_platform_net,
            partner_commission_amount: result.partner_commission_amount,
            vehicle_rental_deduction:  result.vehicle_rental_deduction,
            insurance_deduction:       result.insurance_deduction,
            fuel_cost_deduction:       result.fuel_cost_deduction,
            line_items_total:          Money::ZERO,
            cash_collected_by_driver:  result.cash_collected_by_driver,
            driver_net_earnings:       result.driver_net_earnings,
            payout_amount:             result.payout_amount,
            total_rides:               result.total_rides,
            completed_rides:           result.completed_rides,
            status:                    SettlementStatus::Calculated,
            calculated_at:             now,
            approved_at:               None,
            paid_at:                   None,
        }
    }

    /// Overwrite the financial fields from a fresh calculation.
    /// Manual fuel cost and line items already on the settlement survive,
    /// as do status and approval history unless `reset_status` is set.
    /// `calculated_at` only moves when something else did, so repeating a
    /// recalculation over unchanged rides leaves the row identical.
    pub fn apply_recalculation(
        &mut self,
        result: &SettlementResult,
        now: DateTime<Utc>,
        reset_status: bool,
    ) {
        let before = self.clone();
        self.partner_id                = result.partner_id.clone();
        self.platforms                 = result.platforms.clone();
        self.total_platform_net        = result.total_platform_net;
        self.partner_commission_amount = result.partner_commission_amount;
        self.vehicle_rental_deduction  = result.vehicle_rental_deduction;
        self.insurance_deduction       = result.insurance_deduction;
        self.cash_collected_by_driver  = result.cash_collected_by_driver;
        self.total_rides               = result.total_rides;
        self.completed_rides           = result.completed_rides;
        if reset_status {
            self.status      = SettlementStatus::Calculated;
            self.approved_at = None;
            self.paid_at     = None;
        }
        self.rederive_totals();
        if *self != before {
            self.calculated_at = now;
        }
    }

    /// Set the line item total and re-derive net earnings and payout from
    /// the stored base figures. Platform, commission, and vehicle figures
    /// are left as they are.
    pub fn apply_line_items(&mut self, line_items_total: Money) {
        self.line_items_total = line_items_total.round();
        self.rederive_totals();
    }

    fn rederive_totals(&mut self) {
        self.driver_net_earnings = (base_net_earnings(
            self.total_platform_net,
            self.partner_commission_amount,
            self.vehicle_rental_deduction,
            self.insurance_deduction,
            self.fuel_cost_deduction,
        ) + self.line_items_total)
            .round();
        self.payout_amount = (self.driver_net_earnings - self.cash_collected_by_driver).round();
    }

    /// Move one step along CALCULATED -> APPROVED -> PAID.
    pub fn advance_status(&mut self, to: SettlementStatus, now: DateTime<Utc>) -> SettleResult<()> {
        if self.status.next() != Some(to) {
            return Err(SettleError::InvalidTransition {
                settlement_id: self.id.clone(),
                from:          self.status.as_str().into(),
                to:            to.as_str().into(),
            });
        }
        match to {
            SettlementStatus::Approved   => self.approved_at = Some(now),
            SettlementStatus::Paid       => self.paid_at = Some(now),
            SettlementStatus::Calculated => {}
        }
        self.status = to;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineItemKind {
    Bonus,
    Deduction,
}

impl LineItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineItemKind::Bonus     => "BONUS",
            LineItemKind::Deduction => "DEDUCTION",
        }
    }
}

impl FromStr for LineItemKind {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BONUS"     => Ok(LineItemKind::Bonus),
            "DEDUCTION" => Ok(LineItemKind::Deduction),
            other       => Err(anyhow::anyhow!("unknown line item type '{other}'").into()),
        }
    }
}

/// An ad-hoc bonus or deduction on one settlement. `amount` is positive;
/// the kind decides the sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementLineItem {
    pub id:            String,
    pub settlement_id: SettlementId,
    pub kind:          LineItemKind,
    pub amount:        Money,
    pub description:   Option<String>,
    pub created_at:    DateTime<Utc>,
}

impl SettlementLineItem {
    pub fn signed_amount(&self) -> Money {
        match self.kind {
            LineItemKind::Bonus     => self.amount,
            LineItemKind::Deduction => -self.amount,
        }
    }
}

/// Bonuses minus deductions.
pub fn line_items_total(items: &[SettlementLineItem]) -> Money {
    items.iter().map(SettlementLineItem::signed_amount).sum::<Money>().round()
}
