//! Ledger clock: the engine's only source of "now".
//!
//! Adjustment timestamps and status stamps come from here, so tests can pin
//! time and get reproducible ledgers.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

#[derive(Debug)]
pub enum LedgerClock {
    System,
    /// Fixed instant, advanced only by `advance`.
    Fixed(Mutex<DateTime<Utc>>),
}

impl LedgerClock {
    pub fn fixed(at: DateTime<Utc>) -> Self {
        LedgerClock::Fixed(Mutex::new(at))
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            LedgerClock::System    => Utc::now(),
            LedgerClock::Fixed(at) => *at.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Move a fixed clock forward. No effect on the system clock.
    pub fn advance(&self, by: Duration) {
        if let LedgerClock::Fixed(at) = self {
            let mut at = at.lock().unwrap_or_else(|e| e.into_inner());
            *at += by;
        }
    }
}

impl Default for LedgerClock {
    fn default() -> Self {
        LedgerClock::System
    }
}
