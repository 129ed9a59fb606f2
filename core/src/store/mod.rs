//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The engine calls store methods; it never executes SQL directly.
//! Money is stored as canonical decimal TEXT at full precision.

use crate::{
    error::SettleResult,
    event::EventLogEntry,
    money::Money,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef},
    Connection, Row, Transaction, TransactionBehavior,
};
use std::str::FromStr;

mod balance;
mod fleet;
mod settlement;

pub struct SettleStore {
    conn: Connection,
    /// File backing this connection; `None` for a private in-memory db.
    path: Option<String>,
}

impl SettleStore {
    /// Open (or create) a database file. Several handles on one file may
    /// write concurrently; SQLite serializes them and waiters block up to
    /// the busy timeout.
    pub fn open(path: &str) -> SettleResult<Self> {
        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        log::debug!("opened {path} (journal_mode={mode})");
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    pub fn in_memory() -> SettleResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// A second connection to the same file. An in-memory store has no
    /// file to share, so it gets a fresh, empty database instead.
    pub fn reopen(&self) -> SettleResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SettleResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_fleet.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_settlements.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_driver_balance.sql"))?;
        Ok(())
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction: the write lock is
    /// taken up front, so no other connection can write between our reads
    /// and our writes. Any error rolls the whole unit back.
    /// Not re-entrant; callers open at most one per operation.
    pub fn in_transaction<T>(&self, f: impl FnOnce() -> SettleResult<T>) -> SettleResult<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f()?;
        tx.commit()?;
        Ok(out)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> SettleResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (driver_id, recorded_at, component, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.driver_id,
                ts_text(&entry.recorded_at),
                entry.component,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_driver(&self, driver_id: &str) -> SettleResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, driver_id, recorded_at, component, event_type, payload
             FROM event_log WHERE driver_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![driver_id], |row| {
            Ok(EventLogEntry {
                id:          row.get(0)?,
                driver_id:   row.get(1)?,
                recorded_at: get_ts(row, 2)?,
                component:   row.get(3)?,
                event_type:  row.get(4)?,
                payload:     row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn event_count(&self, event_type: &str) -> SettleResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE event_type = ?1",
            params![event_type],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

// ── Column conversions ─────────────────────────────────────────

impl ToSql for Money {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_storage_string()))
    }
}

impl FromSql for Money {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse::<Money>()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Fixed-width UTC timestamp; sorts lexicographically in time order.
pub(crate) fn ts_text(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn date_text(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => DateTime::parse_from_rfc3339(&text)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

pub(crate) fn get_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_opt_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => Decimal::from_str(text.trim())
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

/// Parse a TEXT enum column through its `FromStr` impl.
pub(crate) fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse::<T>().map_err(|e| conversion_error(idx, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCommissionConfig, SettlementFrequency};

    fn driver(driver_id: &str) -> DriverCommissionConfig {
        DriverCommissionConfig {
            driver_id:            driver_id.into(),
            partner_id:           "p1".into(),
            commission_model:     None,
            commission_rate:      None,
            fixed_fee:            None,
            hybrid_threshold:     None,
            per_ride_fee:         None,
            settlement_frequency: SettlementFrequency::Weekly,
            active:               true,
        }
    }

    #[test]
    fn reopened_file_store_shares_rows() {
        let path = std::env::temp_dir()
            .join(format!("fleetpay-store-reopen-{}.db", std::process::id()))
            .to_string_lossy()
            .into_owned();
        let cleanup = || {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{path}{suffix}"));
            }
        };
        cleanup();

        let store = SettleStore::open(&path).unwrap();
        store.migrate().unwrap();
        store.insert_driver(&driver("d1")).unwrap();
        let other = store.reopen().unwrap();
        assert!(other.driver_exists("d1").unwrap());

        drop(other);
        drop(store);
        cleanup();
    }

    #[test]
    fn reopened_memory_store_is_empty() {
        let store = SettleStore::in_memory().unwrap();
        store.migrate().unwrap();
        store.insert_driver(&driver("d1")).unwrap();
        let other = store.reopen().unwrap();
        other.migrate().unwrap();
        assert!(!other.driver_exists("d1").unwrap());
    }
}
