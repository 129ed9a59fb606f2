//! Driver commission and vehicle cost configuration.

use crate::{
    error::SettleError,
    money::Money,
    types::{DriverId, PartnerId, VehicleId},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionModel {
    Percentage,
    Fixed,
    Hybrid,
    PerRide,
}

impl CommissionModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionModel::Percentage => "PERCENTAGE",
            CommissionModel::Fixed      => "FIXED",
            CommissionModel::Hybrid     => "HYBRID",
            CommissionModel::PerRide    => "PER_RIDE",
        }
    }

    /// Unrecognised stored values return `None`; the evaluator then charges
    /// no commission.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PERCENTAGE" => Some(CommissionModel::Percentage),
            "FIXED"      => Some(CommissionModel::Fixed),
            "HYBRID"     => Some(CommissionModel::Hybrid),
            "PER_RIDE"   => Some(CommissionModel::PerRide),
            _            => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementFrequency {
    Weekly,
    Biweekly,
    Monthly,
}

impl SettlementFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementFrequency::Weekly   => "WEEKLY",
            SettlementFrequency::Biweekly => "BIWEEKLY",
            SettlementFrequency::Monthly  => "MONTHLY",
        }
    }
}

impl FromStr for SettlementFrequency {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WEEKLY"   => Ok(SettlementFrequency::Weekly),
            "BIWEEKLY" => Ok(SettlementFrequency::Biweekly),
            "MONTHLY"  => Ok(SettlementFrequency::Monthly),
            other      => Err(anyhow::anyhow!("unknown settlement frequency '{other}'").into()),
        }
    }
}

/// A driver's commission terms. Every numeric field is optional; a missing
/// value counts as zero when the commission is evaluated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverCommissionConfig {
    pub driver_id:            DriverId,
    pub partner_id:           PartnerId,
    /// `None` when the stored model is not one we recognise.
    pub commission_model:     Option<CommissionModel>,
    /// Percentage, e.g. 25 means 25%.
    pub commission_rate:      Option<Decimal>,
    pub fixed_fee:            Option<Money>,
    pub hybrid_threshold:     Option<Money>,
    pub per_ride_fee:         Option<Money>,
    pub settlement_frequency: SettlementFrequency,
    pub active:               bool,
}

/// Recurring costs of a vehicle a driver may be assigned to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleCostConfig {
    pub vehicle_id:             VehicleId,
    pub monthly_rental_cost:    Option<Money>,
    pub insurance_monthly_cost: Option<Money>,
}
