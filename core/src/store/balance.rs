use super::{get_ts, ts_text, SettleStore};
use crate::{
    error::SettleResult,
    ledger::DriverBalanceEntry,
    money::Money,
};
use rusqlite::{params, OptionalExtension, Row};

const BALANCE_COLUMNS: &str = "entry_id, driver_id, partner_id, settlement_id,
    period_start, period_end, opening_balance, settlement_net, line_items_total,
    cash_collected, payout_made, adjustments, closing_balance, notes, created_at";

impl SettleStore {
    /// All of a driver's entries in chain order (period_end, then insertion).
    pub fn balance_chain(&self, driver_id: &str) -> SettleResult<Vec<DriverBalanceEntry>> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM driver_balance
             WHERE driver_id = ?1 ORDER BY period_end ASC, seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![driver_id], map_balance_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn latest_balance_entry(&self, driver_id: &str) -> SettleResult<Option<DriverBalanceEntry>> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM driver_balance
             WHERE driver_id = ?1 ORDER BY period_end DESC, seq DESC LIMIT 1"
        );
        let row = self
            .conn
            .query_row(&sql, params![driver_id], map_balance_row)
            .optional()?;
        Ok(row)
    }

    /// Newest first.
    pub fn balance_history(
        &self,
        driver_id: &str,
        limit: usize,
    ) -> SettleResult<Vec<DriverBalanceEntry>> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM driver_balance
             WHERE driver_id = ?1 ORDER BY period_end DESC, seq DESC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![driver_id, limit], map_balance_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn balance_entry_for_settlement(
        &self,
        settlement_id: &str,
    ) -> SettleResult<Option<DriverBalanceEntry>> {
        let sql = format!("SELECT {BALANCE_COLUMNS} FROM driver_balance WHERE settlement_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![settlement_id], map_balance_row)
            .optional()?;
        Ok(row)
    }

    /// Write a settlement-derived entry, one row per settlement id. On
    /// conflict the existing row keeps its entry id, seq and payout.
    pub fn upsert_balance_entry(&self, e: &DriverBalanceEntry) -> SettleResult<()> {
        self.write_balance_entry(
            "ON CONFLICT(settlement_id) DO UPDATE SET
                partner_id       = excluded.partner_id,
                period_start     = excluded.period_start,
                period_end       = excluded.period_end,
                opening_balance  = excluded.opening_balance,
                settlement_net   = excluded.settlement_net,
                line_items_total = excluded.line_items_total,
                cash_collected   = excluded.cash_collected,
                adjustments      = excluded.adjustments,
                closing_balance  = excluded.closing_balance",
            e,
        )
    }

    /// Plain insert; manual adjustments always get a new row.
    pub fn insert_balance_entry(&self, e: &DriverBalanceEntry) -> SettleResult<()> {
        self.write_balance_entry("", e)
    }

    /// Rechaining only ever moves these two figures.
    pub fn update_balance_figures(
        &self,
        entry_id: &str,
        opening_balance: Money,
        closing_balance: Money,
    ) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE driver_balance SET opening_balance = ?1, closing_balance = ?2
             WHERE entry_id = ?3",
            params![opening_balance, closing_balance, entry_id],
        )?;
        Ok(())
    }

    fn write_balance_entry(&self, conflict_clause: &str, e: &DriverBalanceEntry) -> SettleResult<()> {
        let sql = format!(
            "INSERT INTO driver_balance (
                entry_id, driver_id, partner_id, settlement_id, period_start, period_end,
                opening_balance, settlement_net, line_items_total, cash_collected,
                payout_made, adjustments, closing_balance, notes, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
            {conflict_clause}"
        );
        self.conn.execute(
            &sql,
            params![
                e.id,
                e.driver_id,
                e.partner_id,
                e.settlement_id,
                ts_text(&e.period_start),
                ts_text(&e.period_end),
                e.opening_balance,
                e.settlement_net,
                e.line_items_total,
                e.cash_collected,
                e.payout_made,
                e.adjustments,
                e.closing_balance,
                e.notes,
                ts_text(&e.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn set_payout_made(&self, settlement_id: &str, payout: Money) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE driver_balance SET payout_made = ?1 WHERE settlement_id = ?2",
            params![payout, settlement_id],
        )?;
        Ok(())
    }
}

fn map_balance_row(row: &Row<'_>) -> rusqlite::Result<DriverBalanceEntry> {
    Ok(DriverBalanceEntry {
        id:               row.get(0)?,
        driver_id:        row.get(1)?,
        partner_id:       row.get(2)?,
        settlement_id:    row.get(3)?,
        period_start:     get_ts(row, 4)?,
        period_end:       get_ts(row, 5)?,
        opening_balance:  row.get(6)?,
        settlement_net:   row.get(7)?,
        line_items_total: row.get(8)?,
        cash_collected:   row.get(9)?,
        payout_made:      row.get(10)?,
        adjustments:      row.get(11)?,
        closing_balance:  row.get(12)?,
        notes:            row.get(13)?,
        created_at:       get_ts(row, 14)?,
    })
}
