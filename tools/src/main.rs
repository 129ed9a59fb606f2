//! settle-runner: headless settlement runner for fleetpay.
//!
//! Usage:
//!   settle-runner --db fleet.db --import data/sample_fleet.json \
//!                 --partner partner-berlin --start 2024-06-03 --end 2024-06-09
//!   settle-runner --db fleet.db --ipc-mode

use anyhow::{Context, Result};
use chrono::NaiveDate;
use fleetpay_core::{
    config::EngineConfig,
    driver::{DriverCommissionConfig, VehicleCostConfig},
    engine::SettlementEngine,
    ledger::DriverBalanceEntry,
    money::Money,
    ride::{RideRecord, SettlementPeriod},
    settlement::LineItemKind,
    store::SettleStore,
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Settle {
        driver_id:  String,
        partner_id: String,
        start:      NaiveDate,
        end:        NaiveDate,
        #[serde(default)]
        reset_status: bool,
    },
    AddLineItem {
        settlement_id: String,
        kind:          LineItemKind,
        amount:        Money,
        #[serde(default)]
        description:   Option<String>,
    },
    Adjust {
        driver_id:  String,
        partner_id: String,
        amount:     Money,
        #[serde(default)]
        notes:      Option<String>,
    },
    Balance {
        driver_id: String,
    },
    History {
        driver_id: String,
        #[serde(default = "default_history_limit")]
        limit:     usize,
    },
    Quit,
}

fn default_history_limit() -> usize {
    20
}

/// Fleet import file: vehicles, drivers (optionally with a vehicle), rides.
#[derive(serde::Deserialize)]
struct FleetImport {
    #[serde(default)]
    vehicles: Vec<VehicleImport>,
    #[serde(default)]
    drivers:  Vec<DriverImport>,
    #[serde(default)]
    rides:    Vec<RideRecord>,
    partner_id: String,
}

#[derive(serde::Deserialize)]
struct VehicleImport {
    #[serde(default)]
    plate: Option<String>,
    #[serde(flatten)]
    costs: VehicleCostConfig,
}

#[derive(serde::Deserialize)]
struct DriverImport {
    #[serde(default)]
    vehicle_id: Option<String>,
    #[serde(flatten)]
    config:     DriverCommissionConfig,
}

#[derive(serde::Serialize)]
struct DriverSummary {
    driver_id:     String,
    settlement_id: String,
    net_earnings:  Money,
    cash:          Money,
    payout:        Money,
    balance:       Money,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let import = string_arg(&args, "--import");

    let config = EngineConfig::load(data_dir)?;
    let store = SettleStore::open(db)?;
    store.migrate()?;
    let engine = SettlementEngine::new(config, store);

    let imported_partner = match import {
        Some(path) => Some(import_fleet(&engine, path)?),
        None => None,
    };

    if ipc_mode {
        return run_ipc_loop(&engine);
    }

    let partner = string_arg(&args, "--partner")
        .map(str::to_string)
        .or(imported_partner)
        .context("--partner is required when no fleet is imported")?;
    let start: NaiveDate = parse_arg(&args, "--start").context("--start YYYY-MM-DD is required")?;
    let end: NaiveDate = parse_arg(&args, "--end").context("--end YYYY-MM-DD is required")?;
    let period = SettlementPeriod::new(start, end)?;

    println!("fleetpay settle-runner");
    println!("  partner:   {partner}");
    println!("  period:    {period}");
    println!("  db:        {db}");
    println!("  currency:  {}", engine.config.currency);
    println!();

    let outcome = engine.settle_all(&partner, &period)?;
    for (driver_id, settlement_id) in &outcome.settled {
        let settlement = engine.store.get_settlement(settlement_id)?;
        let summary = DriverSummary {
            driver_id:     driver_id.clone(),
            settlement_id: settlement_id.clone(),
            net_earnings:  settlement.driver_net_earnings,
            cash:          settlement.cash_collected_by_driver,
            payout:        settlement.payout_amount,
            balance:       engine.get_current_balance(driver_id)?,
        };
        println!("{}", serde_json::to_string(&summary)?);
    }
    for failure in &outcome.failures {
        println!(
            "{}",
            serde_json::json!({ "driver_id": failure.driver_id, "error": failure.error.to_string() })
        );
    }
    println!();
    println!(
        "settled {} driver(s), {} failure(s)",
        outcome.settled.len(),
        outcome.failures.len()
    );
    Ok(())
}

/// Load a fleet file into the store. Returns the file's partner id.
fn import_fleet(engine: &SettlementEngine, path: &str) -> Result<String> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
    let fleet: FleetImport = serde_json::from_str(&content)?;

    for vehicle in &fleet.vehicles {
        engine
            .store
            .insert_vehicle(&fleet.partner_id, vehicle.plate.as_deref(), &vehicle.costs)?;
    }
    for driver in &fleet.drivers {
        engine.store.insert_driver(&driver.config)?;
        if driver.vehicle_id.is_some() {
            engine
                .store
                .assign_vehicle(&driver.config.driver_id, driver.vehicle_id.as_deref())?;
        }
    }
    for ride in &fleet.rides {
        engine.store.insert_ride(ride)?;
    }
    log::info!(
        "imported {} vehicle(s), {} driver(s), {} ride(s) from {path}",
        fleet.vehicles.len(),
        fleet.drivers.len(),
        fleet.rides.len()
    );
    Ok(fleet.partner_id)
}

fn run_ipc_loop(engine: &SettlementEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        // Engine errors go back to the caller; the loop keeps serving.
        let response = match handle_command(engine, cmd) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("ipc command failed: {e:#}");
                serde_json::json!({ "error": format!("{e:#}") })
            }
        };
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &SettlementEngine, cmd: IpcCommand) -> Result<serde_json::Value> {
    let value = match cmd {
        IpcCommand::Settle { driver_id, partner_id, start, end, reset_status } => {
            let period = SettlementPeriod::new(start, end)?;
            let id = engine.recalculate_settlement(&driver_id, &partner_id, &period, reset_status)?;
            serde_json::to_value(engine.store.get_settlement(&id)?)?
        }
        IpcCommand::AddLineItem { settlement_id, kind, amount, description } => {
            let item = engine.add_line_item(&settlement_id, kind, amount, description)?;
            serde_json::json!({
                "line_item": item,
                "settlement": engine.store.get_settlement(&settlement_id)?,
            })
        }
        IpcCommand::Adjust { driver_id, partner_id, amount, notes } => {
            let entry = engine.add_manual_adjustment(&driver_id, &partner_id, amount, notes)?;
            serde_json::to_value(entry)?
        }
        IpcCommand::Balance { driver_id } => {
            let balance = engine.get_current_balance(&driver_id)?;
            serde_json::json!({ "driver_id": driver_id, "balance": balance })
        }
        IpcCommand::History { driver_id, limit } => {
            let history: Vec<DriverBalanceEntry> = engine.get_balance_history(&driver_id, limit)?;
            serde_json::to_value(history)?
        }
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    string_arg(args, flag).and_then(|v| v.parse().ok())
}
