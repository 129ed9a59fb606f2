//! Ride records and settlement periods.
//!
//! Rides are read-only inputs. Settling a period only tags a ride with
//! the settlement that consumed it; the financial fields never change.

use crate::{
    error::{SettleError, SettleResult},
    money::Money,
    types::{DriverId, RideId, SettlementId},
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformSource {
    Bolt,
    Uber,
    Freenow,
}

impl PlatformSource {
    pub const ALL: [PlatformSource; 3] =
        [PlatformSource::Bolt, PlatformSource::Uber, PlatformSource::Freenow];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformSource::Bolt    => "BOLT",
            PlatformSource::Uber    => "UBER",
            PlatformSource::Freenow => "FREENOW",
        }
    }
}

impl FromStr for PlatformSource {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BOLT"    => Ok(PlatformSource::Bolt),
            "UBER"    => Ok(PlatformSource::Uber),
            "FREENOW" => Ok(PlatformSource::Freenow),
            other     => Err(anyhow::anyhow!("unknown platform source '{other}'").into()),
        }
    }
}

/// How the passenger paid. Anything a platform reports that is not one of
/// the known methods lands in `Unknown` and is treated as non-cash.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    InApp,
    Unknown,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash    => "CASH",
            PaymentMethod::Card    => "CARD",
            PaymentMethod::InApp   => "IN_APP",
            PaymentMethod::Unknown => "UNKNOWN",
        }
    }

    /// Lenient parse: unrecognised values map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "CASH"   => PaymentMethod::Cash,
            "CARD"   => PaymentMethod::Card,
            "IN_APP" => PaymentMethod::InApp,
            _        => PaymentMethod::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Completed,
    Cancelled,
    NoShow,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
            RideStatus::NoShow    => "NO_SHOW",
        }
    }
}

impl FromStr for RideStatus {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COMPLETED" => Ok(RideStatus::Completed),
            "CANCELLED" => Ok(RideStatus::Cancelled),
            "NO_SHOW"   => Ok(RideStatus::NoShow),
            other       => Err(anyhow::anyhow!("unknown ride status '{other}'").into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideRecord {
    pub id:                         RideId,
    pub driver_id:                  DriverId,
    pub platform_source:            PlatformSource,
    pub fare_amount:                Money,
    pub tip_amount:                 Money,
    pub platform_commission_amount: Money,
    pub payment_method:             PaymentMethod,
    pub started_at:                 DateTime<Utc>,
    pub completed_at:               Option<DateTime<Utc>>,
    pub status:                     RideStatus,
    /// Set once a settlement has consumed this ride.
    #[serde(default)]
    pub settlement_id:              Option<SettlementId>,
}

impl RideRecord {
    /// Period membership: `completed_at` inside the window, or no
    /// `completed_at` at all and `started_at` inside the window.
    /// A ride that completed outside the window is excluded even when it
    /// started inside it.
    pub fn falls_in(&self, period: &SettlementPeriod) -> bool {
        match self.completed_at {
            Some(done) => period.contains(done),
            None       => period.contains(self.started_at),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RideStatus::Completed
    }

    pub fn is_cash(&self) -> bool {
        self.payment_method == PaymentMethod::Cash
    }
}

/// A contiguous settlement period, inclusive of both boundary days.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SettlementPeriod {
    pub start: NaiveDate,
    pub end:   NaiveDate,
}

impl SettlementPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> SettleResult<Self> {
        if end < start {
            return Err(SettleError::InvalidPeriod {
                start: start.to_string(),
                end:   end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// First instant of the window: `start` at 00:00:00.000 UTC.
    pub fn window_start(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.start.and_time(NaiveTime::MIN))
    }

    /// Last instant of the window: `end` at 23:59:59.999 UTC.
    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_limit() - Duration::milliseconds(1)
    }

    /// Exclusive upper bound: the day after `end` at 00:00 UTC.
    pub fn window_limit(&self) -> DateTime<Utc> {
        let next_day = self.end + Duration::days(1);
        Utc.from_utc_datetime(&next_day.and_time(NaiveTime::MIN))
    }

    /// Half-open `[window_start, window_limit)`, so sub-millisecond
    /// instants late on the last day stay inside.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.window_start() && at < self.window_limit()
    }

    /// `max(1, round(window length / 1 day))`, i.e. the inclusive day count.
    pub fn days(&self) -> i64 {
        let millis = (self.window_end() - self.window_start()).num_milliseconds();
        let day = Duration::days(1).num_milliseconds();
        let rounded = (millis + day / 2) / day;
        rounded.max(1)
    }
}

impl std::fmt::Display for SettlementPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
