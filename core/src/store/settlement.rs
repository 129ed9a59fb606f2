use super::{date_text, get_date, get_opt_ts, get_parsed, get_ts, ts_text, SettleStore};
use crate::{
    aggregator::{PlatformBreakdown, PlatformBreakdowns},
    error::{SettleError, SettleResult},
    money::Money,
    ride::SettlementPeriod,
    settlement::{Settlement, SettlementLineItem},
    types::SettlementId,
};
use rusqlite::{params, OptionalExtension, Row};

const SETTLEMENT_COLUMNS: &str = "settlement_id, driver_id, partner_id, period_start, period_end,
    bolt_breakdown, uber_breakdown, freenow_breakdown,
    total_platform_net, partner_commission_amount, vehicle_rental_deduction,
    insurance_deduction, fuel_cost_deduction, line_items_total,
    cash_collected_by_driver, driver_net_earnings, payout_amount,
    total_rides, completed_rides, status, calculated_at, approved_at, paid_at";

impl SettleStore {
    // ── Settlements ─────────────────────────────────────────────

    /// Insert, or overwrite the row holding the same (driver, period) key.
    /// Returns the id of the row actually stored, which is the existing
    /// row's id when the key was already taken.
    pub fn upsert_settlement(&self, s: &Settlement) -> SettleResult<SettlementId> {
        let id: String = self.conn.query_row(
            "INSERT INTO settlement (
                settlement_id, driver_id, partner_id, period_start, period_end,
                bolt_breakdown, uber_breakdown, freenow_breakdown,
                total_platform_net, partner_commission_amount, vehicle_rental_deduction,
                insurance_deduction, fuel_cost_deduction, line_items_total,
                cash_collected_by_driver, driver_net_earnings, payout_amount,
                total_rides, completed_rides, status, calculated_at, approved_at, paid_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)
            ON CONFLICT(driver_id, period_start, period_end) DO UPDATE SET
                partner_id                = excluded.partner_id,
                bolt_breakdown            = excluded.bolt_breakdown,
                uber_breakdown            = excluded.uber_breakdown,
                freenow_breakdown         = excluded.freenow_breakdown,
                total_platform_net        = excluded.total_platform_net,
                partner_commission_amount = excluded.partner_commission_amount,
                vehicle_rental_deduction  = excluded.vehicle_rental_deduction,
                insurance_deduction       = excluded.insurance_deduction,
                fuel_cost_deduction       = excluded.fuel_cost_deduction,
                line_items_total          = excluded.line_items_total,
                cash_collected_by_driver  = excluded.cash_collected_by_driver,
                driver_net_earnings       = excluded.driver_net_earnings,
                payout_amount             = excluded.payout_amount,
                total_rides               = excluded.total_rides,
                completed_rides           = excluded.completed_rides,
                status                    = excluded.status,
                calculated_at             = excluded.calculated_at,
                approved_at               = excluded.approved_at,
                paid_at                   = excluded.paid_at
            RETURNING settlement_id",
            params![
                s.id,
                s.driver_id,
                s.partner_id,
                date_text(&s.period.start),
                date_text(&s.period.end),
                breakdown_json(s.platforms.bolt.as_ref())?,
                breakdown_json(s.platforms.uber.as_ref())?,
                breakdown_json(s.platforms.freenow.as_ref())?,
                s.total_platform_net,
                s.partner_commission_amount,
                s.vehicle_rental_deduction,
                s.insurance_deduction,
                s.fuel_cost_deduction,
                s.line_items_total,
                s.cash_collected_by_driver,
                s.driver_net_earnings,
                s.payout_amount,
                s.total_rides,
                s.completed_rides,
                s.status.as_str(),
                ts_text(&s.calculated_at),
                s.approved_at.as_ref().map(ts_text),
                s.paid_at.as_ref().map(ts_text),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn find_settlement(
        &self,
        driver_id: &str,
        period: &SettlementPeriod,
    ) -> SettleResult<Option<Settlement>> {
        let sql = format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlement
             WHERE driver_id = ?1 AND period_start = ?2 AND period_end = ?3"
        );
        let row = self
            .conn
            .query_row(
                &sql,
                params![driver_id, date_text(&period.start), date_text(&period.end)],
                map_settlement_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_settlement(&self, settlement_id: &str) -> SettleResult<Settlement> {
        let sql = format!("SELECT {SETTLEMENT_COLUMNS} FROM settlement WHERE settlement_id = ?1");
        self.conn
            .query_row(&sql, params![settlement_id], map_settlement_row)
            .optional()?
            .ok_or_else(|| SettleError::SettlementNotFound {
                settlement_id: settlement_id.to_string(),
            })
    }

    pub fn settlement_count(&self, driver_id: &str) -> SettleResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM settlement WHERE driver_id = ?1",
            params![driver_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// The narrow write of the line-item recompute: only these three
    /// derived columns change.
    pub fn update_settlement_totals(
        &self,
        settlement_id: &str,
        line_items_total: Money,
        driver_net_earnings: Money,
        payout_amount: Money,
    ) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE settlement
             SET line_items_total = ?1, driver_net_earnings = ?2, payout_amount = ?3
             WHERE settlement_id = ?4",
            params![line_items_total, driver_net_earnings, payout_amount, settlement_id],
        )?;
        Ok(())
    }

    pub fn update_fuel_cost(&self, settlement_id: &str, fuel: Money) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE settlement SET fuel_cost_deduction = ?1 WHERE settlement_id = ?2",
            params![fuel, settlement_id],
        )?;
        Ok(())
    }

    pub fn update_settlement_status(&self, s: &Settlement) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE settlement SET status = ?1, approved_at = ?2, paid_at = ?3
             WHERE settlement_id = ?4",
            params![
                s.status.as_str(),
                s.approved_at.as_ref().map(ts_text),
                s.paid_at.as_ref().map(ts_text),
                s.id,
            ],
        )?;
        Ok(())
    }

    // ── Line items ──────────────────────────────────────────────

    pub fn insert_line_item(&self, item: &SettlementLineItem) -> SettleResult<()> {
        self.conn.execute(
            "INSERT INTO settlement_line_item
                (line_item_id, settlement_id, kind, amount, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                item.id,
                item.settlement_id,
                item.kind.as_str(),
                item.amount,
                item.description,
                ts_text(&item.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_line_item(&self, line_item_id: &str) -> SettleResult<SettlementLineItem> {
        self.conn
            .query_row(
                "SELECT line_item_id, settlement_id, kind, amount, description, created_at
                 FROM settlement_line_item WHERE line_item_id = ?1",
                params![line_item_id],
                map_line_item_row,
            )
            .optional()?
            .ok_or_else(|| SettleError::LineItemNotFound {
                line_item_id: line_item_id.to_string(),
            })
    }

    pub fn delete_line_item(&self, line_item_id: &str) -> SettleResult<()> {
        self.conn.execute(
            "DELETE FROM settlement_line_item WHERE line_item_id = ?1",
            params![line_item_id],
        )?;
        Ok(())
    }

    pub fn line_items_for_settlement(
        &self,
        settlement_id: &str,
    ) -> SettleResult<Vec<SettlementLineItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT line_item_id, settlement_id, kind, amount, description, created_at
             FROM settlement_line_item WHERE settlement_id = ?1
             ORDER BY created_at, line_item_id",
        )?;
        let rows = stmt.query_map(params![settlement_id], map_line_item_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn breakdown_json(b: Option<&PlatformBreakdown>) -> SettleResult<Option<String>> {
    b.map(serde_json::to_string).transpose().map_err(Into::into)
}

fn get_breakdown(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<PlatformBreakdown>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

fn map_settlement_row(row: &Row<'_>) -> rusqlite::Result<Settlement> {
    Ok(Settlement {
        id:         row.get(0)?,
        driver_id:  row.get(1)?,
        partner_id: row.get(2)?,
        period:     SettlementPeriod {
            start: get_date(row, 3)?,
            end:   get_date(row, 4)?,
        },
        platforms: PlatformBreakdowns {
            bolt:    get_breakdown(row, 5)?,
            uber:    get_breakdown(row, 6)?,
            freenow: get_breakdown(row, 7)?,
        },
        total_platform_net:        row.get(8)?,
        partner_commission_amount: row.get(9)?,
        vehicle_rental_deduction:  row.get(10)?,
        insurance_deduction:       row.get(11)?,
        fuel_cost_deduction:       row.get(12)?,
        line_items_total:          row.get(13)?,
        cash_collected_by_driver:  row.get(14)?,
        driver_net_earnings:       row.get(15)?,
        payout_amount:             row.get(16)?,
        total_rides:               row.get(17)?,
        completed_rides:           row.get(18)?,
        status:                    get_parsed(row, 19)?,
        calculated_at:             get_ts(row, 20)?,
        approved_at:               get_opt_ts(row, 21)?,
        paid_at:                   get_opt_ts(row, 22)?,
    })
}

fn map_line_item_row(row: &Row<'_>) -> rusqlite::Result<SettlementLineItem> {
    Ok(SettlementLineItem {
        id:            row.get(0)?,
        settlement_id: row.get(1)?,
        kind:          get_parsed(row, 2)?,
        amount:        row.get(3)?,
        description:   row.get(4)?,
        created_at:    get_ts(row, 5)?,
    })
}
