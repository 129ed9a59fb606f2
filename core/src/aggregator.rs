//! Per-platform aggregation of a driver's rides over one period.
//!
//! A platform with no rides in the period produces no breakdown at all
//! (`None`), not a zero-valued one, so statements can hide unused platforms.

use crate::{
    money::Money,
    ride::{PlatformSource, RideRecord, SettlementPeriod},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformBreakdown {
    pub gross_revenue: Money,
    pub commission:    Money,
    pub tips:          Money,
    /// No ride field feeds this yet; always zero.
    pub bonuses:       Money,
    /// Bolt only, and not tracked per ride; always zero.
    pub cash_service_fee: Money,
    pub net_amount:    Money,
    pub ride_count:    u32,
}

impl PlatformBreakdown {
    fn from_rides<'a>(rides: impl Iterator<Item = &'a RideRecord>) -> Option<Self> {
        let mut gross_revenue = Money::ZERO;
        let mut commission = Money::ZERO;
        let mut tips = Money::ZERO;
        let mut ride_count = 0u32;

        for ride in rides {
            gross_revenue += ride.fare_amount;
            tips += ride.tip_amount;
            commission += ride.platform_commission_amount;
            ride_count += 1;
        }

        if ride_count == 0 {
            return None;
        }

        let bonuses = Money::ZERO;
        let cash_service_fee = Money::ZERO;
        let net_amount = (gross_revenue - commission + tips + bonuses - cash_service_fee).round();

        Some(Self {
            gross_revenue: gross_revenue.round(),
            commission: commission.round(),
            tips: tips.round(),
            bonuses,
            cash_service_fee,
            net_amount,
            ride_count,
        })
    }
}

/// The three optional platform breakdowns of one settlement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformBreakdowns {
    pub bolt:    Option<PlatformBreakdown>,
    pub uber:    Option<PlatformBreakdown>,
    pub freenow: Option<PlatformBreakdown>,
}

impl PlatformBreakdowns {
    pub fn get(&self, source: PlatformSource) -> Option<&PlatformBreakdown> {
        match source {
            PlatformSource::Bolt    => self.bolt.as_ref(),
            PlatformSource::Uber    => self.uber.as_ref(),
            PlatformSource::Freenow => self.freenow.as_ref(),
        }
    }

    fn set(&mut self, source: PlatformSource, breakdown: Option<PlatformBreakdown>) {
        match source {
            PlatformSource::Bolt    => self.bolt = breakdown,
            PlatformSource::Uber    => self.uber = breakdown,
            PlatformSource::Freenow => self.freenow = breakdown,
        }
    }

    /// Sum of the net amounts of the platforms that had rides.
    pub fn total_net(&self) -> Money {
        PlatformSource::ALL
            .iter()
            .filter_map(|s| self.get(*s))
            .map(|b| b.net_amount)
            .sum()
    }
}

/// Rides of `rides` that belong to `period`.
pub fn rides_in_period<'a>(
    rides: &'a [RideRecord],
    period: &'a SettlementPeriod,
) -> impl Iterator<Item = &'a RideRecord> + 'a {
    rides.iter().filter(move |r| r.falls_in(period))
}

/// Aggregate one platform's rides within the period.
pub fn aggregate_platform(
    rides: &[RideRecord],
    period: &SettlementPeriod,
    source: PlatformSource,
) -> Option<PlatformBreakdown> {
    PlatformBreakdown::from_rides(
        rides_in_period(rides, period).filter(|r| r.platform_source == source),
    )
}

/// Partition the rides by platform and aggregate each partition.
pub fn aggregate_by_platform(
    rides: &[RideRecord],
    period: &SettlementPeriod,
) -> PlatformBreakdowns {
    let mut out = PlatformBreakdowns::default();
    for source in PlatformSource::ALL {
        let breakdown = aggregate_platform(rides, period, source);
        if let Some(b) = &breakdown {
            log::debug!(
                "period={period} platform={} rides={} net={}",
                source.as_str(),
                b.ride_count,
                b.net_amount
            );
        }
        out.set(source, breakdown);
    }
    out
}
