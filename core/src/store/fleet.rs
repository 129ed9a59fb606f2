use super::{get_opt_decimal, get_opt_ts, get_parsed, get_ts, ts_text, SettleStore};
use crate::{
    driver::{CommissionModel, DriverCommissionConfig, VehicleCostConfig},
    error::{SettleError, SettleResult},
    ride::{PaymentMethod, RideRecord, SettlementPeriod},
    types::DriverId,
};
use rusqlite::{params, OptionalExtension, Row};

impl SettleStore {
    // ── Drivers ─────────────────────────────────────────────────

    pub fn insert_driver(&self, driver: &DriverCommissionConfig) -> SettleResult<()> {
        self.conn.execute(
            "INSERT INTO driver (
                driver_id, partner_id, commission_model, commission_rate, fixed_fee,
                hybrid_threshold, per_ride_fee, settlement_frequency, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                driver.driver_id,
                driver.partner_id,
                driver.commission_model.map(|m| m.as_str()).unwrap_or("UNSPECIFIED"),
                driver.commission_rate.map(|r| r.to_string()),
                driver.fixed_fee,
                driver.hybrid_threshold,
                driver.per_ride_fee,
                driver.settlement_frequency.as_str(),
                if driver.active { 1 } else { 0 },
            ],
        )?;
        Ok(())
    }

    pub fn get_driver_config(&self, driver_id: &str) -> SettleResult<DriverCommissionConfig> {
        self.conn
            .query_row(
                "SELECT driver_id, partner_id, commission_model, commission_rate, fixed_fee,
                        hybrid_threshold, per_ride_fee, settlement_frequency, active
                 FROM driver WHERE driver_id = ?1",
                params![driver_id],
                map_driver_row,
            )
            .optional()?
            .ok_or_else(|| SettleError::DriverNotFound {
                driver_id: driver_id.to_string(),
            })
    }

    pub fn driver_exists(&self, driver_id: &str) -> SettleResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM driver WHERE driver_id = ?1",
            params![driver_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Active drivers of a partner, in id order.
    pub fn active_drivers(&self, partner_id: &str) -> SettleResult<Vec<DriverId>> {
        let mut stmt = self.conn.prepare(
            "SELECT driver_id FROM driver
             WHERE partner_id = ?1 AND active = 1
             ORDER BY driver_id",
        )?;
        let rows = stmt.query_map(params![partner_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Vehicles ────────────────────────────────────────────────

    pub fn insert_vehicle(
        &self,
        partner_id: &str,
        plate: Option<&str>,
        vehicle: &VehicleCostConfig,
    ) -> SettleResult<()> {
        self.conn.execute(
            "INSERT INTO vehicle (vehicle_id, partner_id, plate, monthly_rental_cost, insurance_monthly_cost)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                vehicle.vehicle_id,
                partner_id,
                plate,
                vehicle.monthly_rental_cost,
                vehicle.insurance_monthly_cost,
            ],
        )?;
        Ok(())
    }

    /// Assign (or with `None`, unassign) a driver's vehicle.
    pub fn assign_vehicle(&self, driver_id: &str, vehicle_id: Option<&str>) -> SettleResult<()> {
        if let Some(vid) = vehicle_id {
            let n: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM vehicle WHERE vehicle_id = ?1",
                params![vid],
                |row| row.get(0),
            )?;
            if n == 0 {
                return Err(SettleError::VehicleNotFound {
                    vehicle_id: vid.to_string(),
                });
            }
        }
        let updated = self.conn.execute(
            "UPDATE driver SET vehicle_id = ?1 WHERE driver_id = ?2",
            params![vehicle_id, driver_id],
        )?;
        if updated == 0 {
            return Err(SettleError::DriverNotFound {
                driver_id: driver_id.to_string(),
            });
        }
        Ok(())
    }

    /// Cost config of the vehicle currently assigned to the driver, if any.
    pub fn assigned_vehicle_cost(&self, driver_id: &str) -> SettleResult<Option<VehicleCostConfig>> {
        let row = self
            .conn
            .query_row(
                "SELECT v.vehicle_id, v.monthly_rental_cost, v.insurance_monthly_cost
                 FROM driver d JOIN vehicle v ON v.vehicle_id = d.vehicle_id
                 WHERE d.driver_id = ?1",
                params![driver_id],
                |row| {
                    Ok(VehicleCostConfig {
                        vehicle_id:             row.get(0)?,
                        monthly_rental_cost:    row.get(1)?,
                        insurance_monthly_cost: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ── Rides ───────────────────────────────────────────────────

    pub fn insert_ride(&self, ride: &RideRecord) -> SettleResult<()> {
        self.conn.execute(
            "INSERT INTO ride (
                ride_id, driver_id, platform_source, fare_amount, tip_amount,
                platform_commission_amount, payment_method, started_at, completed_at,
                status, settlement_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                ride.id,
                ride.driver_id,
                ride.platform_source.as_str(),
                ride.fare_amount,
                ride.tip_amount,
                ride.platform_commission_amount,
                ride.payment_method.as_str(),
                ts_text(&ride.started_at),
                ride.completed_at.as_ref().map(ts_text),
                ride.status.as_str(),
                ride.settlement_id,
            ],
        )?;
        Ok(())
    }

    /// Rides of one driver that belong to the period: completed inside the
    /// window, or never completed and started inside it.
    pub fn rides_in_period(
        &self,
        driver_id: &str,
        period: &SettlementPeriod,
    ) -> SettleResult<Vec<RideRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT ride_id, driver_id, platform_source, fare_amount, tip_amount,
                    platform_commission_amount, payment_method, started_at, completed_at,
                    status, settlement_id
             FROM ride
             WHERE driver_id = ?1
               AND ((completed_at IS NOT NULL AND completed_at >= ?2 AND completed_at < ?3)
                 OR (completed_at IS NULL AND started_at >= ?2 AND started_at < ?3))
             ORDER BY started_at, ride_id",
        )?;
        let rows = stmt.query_map(
            params![
                driver_id,
                ts_text(&period.window_start()),
                ts_text(&period.window_limit()),
            ],
            map_ride_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn rides_for_settlement(&self, settlement_id: &str) -> SettleResult<Vec<RideRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT ride_id, driver_id, platform_source, fare_amount, tip_amount,
                    platform_commission_amount, payment_method, started_at, completed_at,
                    status, settlement_id
             FROM ride WHERE settlement_id = ?1
             ORDER BY started_at, ride_id",
        )?;
        let rows = stmt.query_map(params![settlement_id], map_ride_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Point exactly `ride_ids` at the settlement. Rides it consumed on an
    /// earlier calculation but no longer matches are released.
    pub fn link_rides_to_settlement(
        &self,
        settlement_id: &str,
        ride_ids: &[String],
    ) -> SettleResult<usize> {
        self.conn.execute(
            "UPDATE ride SET settlement_id = NULL WHERE settlement_id = ?1",
            params![settlement_id],
        )?;
        let mut stmt = self
            .conn
            .prepare("UPDATE ride SET settlement_id = ?1 WHERE ride_id = ?2")?;
        let mut linked = 0;
        for ride_id in ride_ids {
            linked += stmt.execute(params![settlement_id, ride_id])?;
        }
        Ok(linked)
    }
}

fn map_driver_row(row: &Row<'_>) -> rusqlite::Result<DriverCommissionConfig> {
    let model: String = row.get(2)?;
    Ok(DriverCommissionConfig {
        driver_id:            row.get(0)?,
        partner_id:           row.get(1)?,
        commission_model:     CommissionModel::parse(&model),
        commission_rate:      get_opt_decimal(row, 3)?,
        fixed_fee:            row.get(4)?,
        hybrid_threshold:     row.get(5)?,
        per_ride_fee:         row.get(6)?,
        settlement_frequency: get_parsed(row, 7)?,
        active:               row.get::<_, i32>(8)? != 0,
    })
}

fn map_ride_row(row: &Row<'_>) -> rusqlite::Result<RideRecord> {
    let payment: String = row.get(6)?;
    Ok(RideRecord {
        id:                         row.get(0)?,
        driver_id:                  row.get(1)?,
        platform_source:            get_parsed(row, 2)?,
        fare_amount:                row.get(3)?,
        tip_amount:                 row.get(4)?,
        platform_commission_amount: row.get(5)?,
        payment_method:             PaymentMethod::parse(&payment),
        started_at:                 get_ts(row, 7)?,
        completed_at:               get_opt_ts(row, 8)?,
        status:                     get_parsed(row, 9)?,
        settlement_id:              row.get(10)?,
    })
}
