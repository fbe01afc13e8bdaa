// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of mffr-meter.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use mffr_core::{BaselineStore, SlotStore, StoreError, StoreResult};
use mffr_types::{BaselineState, Settlement, Signal, Slot, SlotQuery, slot_key};
use rusqlite::{ErrorCode, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

const SLOT_COLUMNS: &str = "timeslot, start, \"end\", slot_end, signal, energy_kwh, grid_kwh, \
     baseline_w, duration_min, cancelled, was_backup, mffr_price, nordpool_price, \
     profit, ffr_income, fusebox_fee, grid_cost, net_total, price_per_kwh";

const BASELINE_KEY: &str = "latest";

/// SQLite slot store shared by all periodic tasks
#[derive(Debug)]
pub struct Database {
    conn: Mutex<rusqlite::Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open database: {path}"))?;

        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path, journal = %journal, "Database journal mode");

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS slots (
                timeslot       TEXT PRIMARY KEY,
                slot_epoch     INTEGER,
                start          TEXT NOT NULL,
                \"end\"        TEXT NOT NULL,
                end_epoch      INTEGER,
                slot_end       TEXT NOT NULL,
                signal         TEXT NOT NULL,
                energy_kwh     REAL NOT NULL DEFAULT 0,
                grid_kwh       REAL NOT NULL DEFAULT 0,
                duration_min   INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS baseline_state (
                key               TEXT PRIMARY KEY,
                baseline_w        REAL NOT NULL,
                computed_for_slot TEXT NOT NULL,
                energy_wh         REAL NOT NULL,
                updated_at        TEXT NOT NULL
            );",
        )
        .context("Failed to initialize database schema")?;

        // Columns added after the first release; existing databases gain them in place
        let migration_columns = [
            "slot_epoch INTEGER",
            "end_epoch INTEGER",
            "baseline_w REAL",
            "cancelled INTEGER NOT NULL DEFAULT 0",
            "was_backup INTEGER NOT NULL DEFAULT 0",
            "mffr_price REAL",
            "nordpool_price REAL",
            "profit REAL",
            "ffr_income REAL",
            "fusebox_fee REAL",
            "grid_cost REAL",
            "net_total REAL",
            "price_per_kwh REAL",
        ];
        for col_def in &migration_columns {
            let sql = format!("ALTER TABLE slots ADD COLUMN {col_def}");
            // Fails with "duplicate column" once applied
            let _ = conn.execute_batch(&sql);
        }

        conn.execute_batch(
            "UPDATE slots SET slot_epoch = CAST(strftime('%s', timeslot) AS INTEGER)
                WHERE slot_epoch IS NULL;
            UPDATE slots SET end_epoch = CAST(strftime('%s', \"end\") AS INTEGER)
                WHERE end_epoch IS NULL;

            CREATE UNIQUE INDEX IF NOT EXISTS idx_slots_epoch ON slots(slot_epoch);
            CREATE INDEX IF NOT EXISTS idx_slots_zero_duration ON slots(duration_min, end_epoch);",
        )
        .context("Failed to migrate slots table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("database mutex poisoned".to_owned()))
    }

    pub fn slot_count(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM slots", [], |row| row.get(0))
            .map_err(classify)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn write_slot(&self, slot: &Slot) -> StoreResult<()> {
        let conn = self.lock()?;
        let settlement = slot.settlement.as_ref();
        conn.execute(
            "INSERT INTO slots (timeslot, slot_epoch, start, \"end\", end_epoch, slot_end, signal,
                energy_kwh, grid_kwh, baseline_w, duration_min, cancelled, was_backup,
                mffr_price, nordpool_price, profit, ffr_income, fusebox_fee, grid_cost,
                net_total, price_per_kwh)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21)",
            params![
                slot.key(),
                slot.timeslot.timestamp(),
                slot_key(&slot.start),
                slot_key(&slot.end),
                slot.end.timestamp(),
                slot_key(&slot.slot_end),
                slot.signal.as_str(),
                slot.energy_kwh,
                slot.grid_kwh,
                slot.baseline_w,
                slot.duration_min,
                slot.cancelled,
                slot.was_backup,
                slot.mffr_price,
                slot.nordpool_price,
                settlement.map(|s| s.profit),
                settlement.map(|s| s.ffr_income),
                settlement.map(|s| s.fusebox_fee),
                settlement.map(|s| s.grid_cost),
                settlement.map(|s| s.net_total),
                settlement.and_then(|s| s.price_per_kwh),
            ],
        )
        .map_err(|e| {
            if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
                StoreError::Conflict(slot.key())
            } else {
                classify(e)
            }
        })?;
        Ok(())
    }
}

/// Busy/locked maps to contention so callers can drop the work until the next tick
fn classify(e: rusqlite::Error) -> StoreError {
    if matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    ) {
        StoreError::Contention(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

/// Raw `slots` row before validation
struct SlotRow {
    timeslot: String,
    start: String,
    end: String,
    slot_end: String,
    signal: String,
    energy_kwh: f64,
    grid_kwh: f64,
    baseline_w: Option<f64>,
    duration_min: i64,
    cancelled: bool,
    was_backup: bool,
    mffr_price: Option<f64>,
    nordpool_price: Option<f64>,
    profit: Option<f64>,
    ffr_income: Option<f64>,
    fusebox_fee: Option<f64>,
    grid_cost: Option<f64>,
    net_total: Option<f64>,
    price_per_kwh: Option<f64>,
}

impl SlotRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            timeslot: row.get(0)?,
            start: row.get(1)?,
            end: row.get(2)?,
            slot_end: row.get(3)?,
            signal: row.get(4)?,
            energy_kwh: row.get(5)?,
            grid_kwh: row.get(6)?,
            baseline_w: row.get(7)?,
            duration_min: row.get(8)?,
            cancelled: row.get(9)?,
            was_backup: row.get(10)?,
            mffr_price: row.get(11)?,
            nordpool_price: row.get(12)?,
            profit: row.get(13)?,
            ffr_income: row.get(14)?,
            fusebox_fee: row.get(15)?,
            grid_cost: row.get(16)?,
            net_total: row.get(17)?,
            price_per_kwh: row.get(18)?,
        })
    }

    fn instant(&self, column: &str, raw: &str) -> StoreResult<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(raw).map_err(|e| StoreError::Malformed {
            key: self.timeslot.clone(),
            reason: format!("{column} '{raw}': {e}"),
        })
    }

    fn into_slot(self) -> StoreResult<Slot> {
        let timeslot = self.instant("timeslot", &self.timeslot)?;
        let start = self.instant("start", &self.start)?;
        let end = self.instant("end", &self.end)?;
        let slot_end = self.instant("slot_end", &self.slot_end)?;
        let signal: Signal = self.signal.parse().map_err(|e| StoreError::Malformed {
            key: self.timeslot.clone(),
            reason: format!("{e}"),
        })?;

        // A slot counts as settled once net_total is written
        let settlement = self.net_total.map(|net_total| Settlement {
            profit: self.profit.unwrap_or_default(),
            ffr_income: self.ffr_income.unwrap_or_default(),
            fusebox_fee: self.fusebox_fee.unwrap_or_default(),
            grid_cost: self.grid_cost.unwrap_or_default(),
            net_total,
            price_per_kwh: self.price_per_kwh,
        });

        Ok(Slot {
            timeslot,
            start,
            end,
            slot_end,
            signal,
            energy_kwh: self.energy_kwh,
            grid_kwh: self.grid_kwh,
            baseline_w: self.baseline_w,
            duration_min: self.duration_min,
            cancelled: self.cancelled,
            was_backup: self.was_backup,
            mffr_price: self.mffr_price,
            nordpool_price: self.nordpool_price,
            settlement,
        })
    }
}

fn select_slots<P: rusqlite::Params>(
    conn: &rusqlite::Connection,
    tail: &str,
    params: P,
) -> StoreResult<Vec<Slot>> {
    let sql = format!("SELECT {SLOT_COLUMNS} FROM slots {tail}");
    let mut stmt = conn.prepare(&sql).map_err(classify)?;
    let rows = stmt
        .query_map(params, SlotRow::from_row)
        .map_err(classify)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(classify)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| match row.into_slot() {
            Ok(slot) => Some(slot),
            Err(e) => {
                warn!("Skipping slot row: {e}");
                None
            }
        })
        .collect())
}

impl SlotStore for Database {
    fn get(&self, timeslot: &DateTime<FixedOffset>) -> StoreResult<Option<Slot>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {SLOT_COLUMNS} FROM slots WHERE slot_epoch = ?1"),
                params![timeslot.timestamp()],
                SlotRow::from_row,
            )
            .optional()
            .map_err(classify)?;
        row.map(SlotRow::into_slot).transpose()
    }

    fn insert(&self, slot: &Slot) -> StoreResult<()> {
        self.write_slot(slot)
    }

    fn update_metering(&self, slot: &Slot) -> StoreResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE slots SET
                    \"end\" = ?2,
                    end_epoch = ?3,
                    slot_end = ?4,
                    energy_kwh = ?5,
                    grid_kwh = ?6,
                    duration_min = ?7,
                    cancelled = ?8,
                    was_backup = ?9,
                    baseline_w = COALESCE(baseline_w, ?10),
                    signal = ?11,
                    start = ?12
                 WHERE slot_epoch = ?1",
                params![
                    slot.timeslot.timestamp(),
                    slot_key(&slot.end),
                    slot.end.timestamp(),
                    slot_key(&slot.slot_end),
                    slot.energy_kwh,
                    slot.grid_kwh,
                    slot.duration_min,
                    slot.cancelled,
                    slot.was_backup,
                    slot.baseline_w,
                    slot.signal.as_str(),
                    slot_key(&slot.start),
                ],
            )
            .map_err(classify)?;
        if changed == 0 {
            return Err(StoreError::Backend(format!("no slot {}", slot.key())));
        }
        Ok(())
    }

    fn set_nordpool_price_if_null(
        &self,
        timeslot: &DateTime<FixedOffset>,
        price_eur_kwh: f64,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE slots SET nordpool_price = ?2
                 WHERE slot_epoch = ?1 AND nordpool_price IS NULL",
                params![timeslot.timestamp(), price_eur_kwh],
            )
            .map_err(classify)?;
        Ok(changed > 0)
    }

    fn set_mffr_price_if_null(
        &self,
        timeslot: &DateTime<FixedOffset>,
        price_eur_mwh: f64,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE slots SET mffr_price = ?2
                 WHERE slot_epoch = ?1 AND mffr_price IS NULL",
                params![timeslot.timestamp(), price_eur_mwh],
            )
            .map_err(classify)?;
        Ok(changed > 0)
    }

    fn write_settlement(
        &self,
        timeslot: &DateTime<FixedOffset>,
        settlement: &Settlement,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE slots SET
                    profit = ?2,
                    ffr_income = ?3,
                    fusebox_fee = ?4,
                    grid_cost = ?5,
                    net_total = ?6,
                    price_per_kwh = ?7
                 WHERE slot_epoch = ?1 AND net_total IS NULL",
                params![
                    timeslot.timestamp(),
                    settlement.profit,
                    settlement.ffr_income,
                    settlement.fusebox_fee,
                    settlement.grid_cost,
                    settlement.net_total,
                    settlement.price_per_kwh,
                ],
            )
            .map_err(classify)?;
        Ok(changed > 0)
    }

    fn unsettled_slots(&self) -> StoreResult<Vec<Slot>> {
        let conn = self.lock()?;
        select_slots(&conn, "WHERE net_total IS NULL ORDER BY slot_epoch", [])
    }

    fn slots_missing_activation_price(&self) -> StoreResult<Vec<Slot>> {
        let conn = self.lock()?;
        select_slots(&conn, "WHERE mffr_price IS NULL ORDER BY slot_epoch", [])
    }

    fn delete_stale_zero_duration(&self, cutoff: &DateTime<FixedOffset>) -> StoreResult<usize> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM slots WHERE duration_min = 0 AND end_epoch < ?1",
            params![cutoff.timestamp()],
        )
        .map_err(classify)
    }

    fn query(&self, query: &SlotQuery) -> StoreResult<Vec<Slot>> {
        // LIMIT -1 is unbounded in SQLite
        let limit = query
            .row_limit()
            .map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let conn = self.lock()?;
        select_slots(
            &conn,
            "WHERE (?1 IS NULL OR slot_epoch >= ?1) AND (?2 IS NULL OR slot_epoch <= ?2)
             ORDER BY slot_epoch DESC LIMIT ?3",
            params![
                query.from.map(|t| t.timestamp()),
                query.to.map(|t| t.timestamp()),
                limit
            ],
        )
    }
}

impl BaselineStore for Database {
    fn latest_baseline(&self) -> StoreResult<Option<BaselineState>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT baseline_w, computed_for_slot, energy_wh, updated_at
                 FROM baseline_state WHERE key = ?1",
                params![BASELINE_KEY],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(classify)?;

        let Some((baseline_w, computed_for_slot, energy_wh, updated_at)) = row else {
            return Ok(None);
        };
        let parse = |raw: &str| {
            DateTime::parse_from_rfc3339(raw).map_err(|e| StoreError::Malformed {
                key: BASELINE_KEY.to_owned(),
                reason: format!("'{raw}': {e}"),
            })
        };
        Ok(Some(BaselineState {
            baseline_w,
            computed_for_slot: parse(&computed_for_slot)?,
            energy_wh,
            updated_at: parse(&updated_at)?,
        }))
    }

    fn publish_baseline(&self, state: &BaselineState) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO baseline_state (key, baseline_w, computed_for_slot, energy_wh, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                baseline_w = excluded.baseline_w,
                computed_for_slot = excluded.computed_for_slot,
                energy_wh = excluded.energy_wh,
                updated_at = excluded.updated_at",
            params![
                BASELINE_KEY,
                state.baseline_w,
                slot_key(&state.computed_for_slot),
                state.energy_wh,
                slot_key(&state.updated_at),
            ],
        )
        .map_err(classify)?;
        Ok(())
    }

    fn reset_baseline(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM baseline_state", [])
            .map_err(classify)?;
        Ok(())
    }
}
