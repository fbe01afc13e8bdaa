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

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use mffr_types::{MeteringConfig, Signal, Slot, SlotQuery, find_price, slot_end, slot_start};
use tracing::{debug, error, info, warn};

use crate::errors::StoreResult;
use crate::integrator::{hold_energy_wh, round_to};
use crate::traits::{BaselineStore, PriceSource, SignalReader, SlotStore, read_mode, read_power};

// ============= Slot Lifecycle Rules =============

/// A new slot is not opened this close to its boundary
pub const BOUNDARY_JITTER_SECS: i64 = 5;
/// A new slot right after a same-signal slot ended this recently is a duplicate
pub const DUPLICATE_WINDOW_SECS: i64 = 7;
/// Activity ending earlier than this before the boundary marks the slot cancelled
pub const CANCEL_MARGIN_SECS: i64 = 11;
/// Activity starting this late after the boundary marks a delayed (backup) activation
pub const BACKUP_DELAY_SECS: i64 = 15;

/// Energy measured during one metering tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickEnergy {
    /// Absolute directional energy (kWh)
    pub energy_kwh: f64,
    /// Signed grid energy (kWh, +import / -export)
    pub grid_kwh: f64,
}

impl TickEnergy {
    /// Energy for one tick, holding each reading for the sampling interval.
    ///
    /// Directional energy uses the baseline-corrected power if available and
    /// falls back to the grid reading with its sign discarded.
    pub fn from_readings(
        directional_w: Option<f64>,
        grid_w: Option<f64>,
        interval_secs: f64,
    ) -> Self {
        let directional = directional_w.or(grid_w).map_or(0.0, f64::abs);
        Self {
            energy_kwh: round_to(hold_energy_wh(directional, interval_secs) / 1000.0, 5),
            grid_kwh: round_to(hold_energy_wh(grid_w.unwrap_or(0.0), interval_secs) / 1000.0, 5),
        }
    }
}

/// What the metering tick decided to do with the slot store
#[derive(Debug, Clone, PartialEq)]
pub enum SlotPlan {
    /// Update the open slot's metering columns
    Extend(Slot),
    /// Insert a fresh slot
    Create(Slot),
    /// Rewrite an opposite-signal slot in place under the same key
    Replace { superseded: Signal, slot: Slot },
    /// Too close to the boundary to open a slot
    SkipJitter,
    /// Continuation of a slot that just ended in the previous window
    SuppressDuplicate,
}

/// Decide how a directional reading at `now` affects the slot store.
///
/// `current` is the row keyed by the enclosing timeslot and `previous` the row
/// one slot earlier.
pub fn plan_slot(
    now: DateTime<FixedOffset>,
    signal: Signal,
    energy: TickEnergy,
    baseline_w: Option<f64>,
    current: Option<&Slot>,
    previous: Option<&Slot>,
) -> SlotPlan {
    let timeslot = slot_start(&now);
    let boundary = slot_end(&timeslot);

    if let Some(row) = current
        && row.signal == signal
        && row.end < boundary
    {
        let mut slot = row.clone();
        slot.energy_kwh = round_to(row.energy_kwh + energy.energy_kwh, 5);
        slot.grid_kwh = round_to(row.grid_kwh + energy.grid_kwh, 5);
        slot.end = now;
        slot.slot_end = boundary;
        slot.duration_min = elapsed_minutes(row.start, now);
        slot.cancelled = now < boundary - Duration::seconds(CANCEL_MARGIN_SECS);
        slot.was_backup = row.start - timeslot >= Duration::seconds(BACKUP_DELAY_SECS);
        if slot.baseline_w.is_none() {
            slot.baseline_w = baseline_w;
        }
        return SlotPlan::Extend(slot);
    }

    if now - timeslot < Duration::seconds(BOUNDARY_JITTER_SECS) {
        return SlotPlan::SkipJitter;
    }

    if let Some(prev) = previous
        && prev.signal == signal
        && (now - prev.end).abs() <= Duration::seconds(DUPLICATE_WINDOW_SECS)
    {
        return SlotPlan::SuppressDuplicate;
    }

    let mut slot = Slot::open(
        timeslot,
        now,
        signal,
        energy.energy_kwh,
        energy.grid_kwh,
        baseline_w,
    );
    match current {
        Some(row) => {
            // Prices and the first baseline snapshot belong to the timeslot
            slot.baseline_w = row.baseline_w.or(baseline_w);
            slot.nordpool_price = row.nordpool_price;
            slot.mffr_price = row.mffr_price;
            SlotPlan::Replace {
                superseded: row.signal,
                slot,
            }
        }
        None => SlotPlan::Create(slot),
    }
}

/// Whole minutes between `start` and `now`, halves rounded away from zero
fn elapsed_minutes(start: DateTime<FixedOffset>, now: DateTime<FixedOffset>) -> i64 {
    let seconds = (now - start).num_seconds();
    seconds.abs().saturating_add(30).div_euclid(60) * seconds.signum()
}

// ============= Metering Engine =============

/// Outcome of one metering tick, for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAction {
    /// No directional signal this tick
    Idle,
    Extended,
    Created,
    Replaced,
    SkippedJitter,
    SuppressedDuplicate,
    /// The store rejected the read or write; retried next tick
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub timeslot: DateTime<FixedOffset>,
    pub signal: Option<Signal>,
    pub action: SlotAction,
    /// Slots that received their day-ahead price this tick
    pub nordpool_prices_set: usize,
}

/// Owns the metering state and drives the slot lifecycle
pub struct MeteringEngine {
    config: MeteringConfig,
    reader: Arc<dyn SignalReader>,
    prices: Arc<dyn PriceSource>,
    slots: Arc<dyn SlotStore>,
    baseline: Arc<dyn BaselineStore>,
    last_signal: Option<Option<Signal>>,
}

impl std::fmt::Debug for MeteringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteringEngine")
            .field("reader", &self.reader.name())
            .field("prices", &self.prices.name())
            .field("last_signal", &self.last_signal)
            .finish_non_exhaustive()
    }
}

impl MeteringEngine {
    pub fn new(
        config: MeteringConfig,
        reader: Arc<dyn SignalReader>,
        prices: Arc<dyn PriceSource>,
        slots: Arc<dyn SlotStore>,
        baseline: Arc<dyn BaselineStore>,
    ) -> Self {
        Self {
            config,
            reader,
            prices,
            slots,
            baseline,
            last_signal: None,
        }
    }

    pub fn config(&self) -> &MeteringConfig {
        &self.config
    }

    /// Run one metering step at `now` (whole seconds, metering timezone).
    ///
    /// Never fails: degraded reads mean "no data" and store failures are
    /// logged and retried on the next tick.
    pub async fn tick(&mut self, now: DateTime<FixedOffset>) -> TickReport {
        let timeslot = slot_start(&now);
        let mode = read_mode(self.reader.as_ref(), &self.config.entities.mode).await;
        let signal = self.config.modes.resolve(mode.as_deref());
        self.log_transition(signal, now);

        let action = match signal {
            Some(signal) => self.record_activity(now, signal).await,
            None => SlotAction::Idle,
        };

        let nordpool_prices_set = match self.enrich_nordpool_prices(&timeslot).await {
            Ok(count) => count,
            Err(e) => {
                warn!(slot = %timeslot, "Day-ahead price enrichment skipped: {e}");
                0
            }
        };

        TickReport {
            timeslot,
            signal,
            action,
            nordpool_prices_set,
        }
    }

    fn log_transition(&mut self, signal: Option<Signal>, now: DateTime<FixedOffset>) {
        if self.last_signal == Some(signal) {
            return;
        }
        match signal {
            Some(signal) => info!(signal = %signal, at = %now, "Signal became active"),
            None => info!(at = %now, "Signal cleared"),
        }
        self.last_signal = Some(signal);
    }

    async fn record_activity(&self, now: DateTime<FixedOffset>, signal: Signal) -> SlotAction {
        let entities = &self.config.entities;
        let directional_w = match &entities.mffr_power {
            Some(entity) => read_power(self.reader.as_ref(), entity).await,
            None => None,
        };
        let grid_w = read_power(self.reader.as_ref(), &entities.grid_power).await;
        let interval = std::time::Duration::from_secs(self.config.sample_interval_secs);
        let energy = TickEnergy::from_readings(directional_w, grid_w, interval.as_secs_f64());

        match self.apply(now, signal, energy) {
            Ok(action) => action,
            Err(e) if e.is_contention() => {
                warn!("Slot store busy, dropping tick: {e}");
                SlotAction::Failed
            }
            Err(e) => {
                error!("Failed to record slot activity: {e}");
                SlotAction::Failed
            }
        }
    }

    fn apply(
        &self,
        now: DateTime<FixedOffset>,
        signal: Signal,
        energy: TickEnergy,
    ) -> StoreResult<SlotAction> {
        let timeslot = slot_start(&now);
        let current = self.slots.get(&timeslot)?;
        let needs_previous = current.as_ref().is_none_or(|row| row.signal != signal);
        let previous = if needs_previous {
            self.slots.get(&(timeslot - Duration::minutes(15)))?
        } else {
            None
        };
        let baseline_w = self.snapshot_baseline(current.as_ref());

        match plan_slot(
            now,
            signal,
            energy,
            baseline_w,
            current.as_ref(),
            previous.as_ref(),
        ) {
            SlotPlan::Extend(slot) => {
                self.slots.update_metering(&slot)?;
                debug!(
                    slot = %slot.key(),
                    energy_kwh = slot.energy_kwh,
                    grid_kwh = slot.grid_kwh,
                    duration_min = slot.duration_min,
                    "Extended slot"
                );
                Ok(SlotAction::Extended)
            }
            SlotPlan::Create(slot) => {
                self.slots.insert(&slot)?;
                info!(slot = %slot.key(), signal = %signal, "Opened slot");
                Ok(SlotAction::Created)
            }
            SlotPlan::Replace { superseded, slot } => {
                self.slots.update_metering(&slot)?;
                warn!(
                    slot = %slot.key(),
                    from = %superseded,
                    to = %signal,
                    "Signal flipped inside slot, restarting its metering"
                );
                Ok(SlotAction::Replaced)
            }
            SlotPlan::SkipJitter => {
                debug!(slot = %timeslot, "Skipped opening slot due to boundary jitter");
                Ok(SlotAction::SkippedJitter)
            }
            SlotPlan::SuppressDuplicate => {
                info!(slot = %timeslot, "Suppressed duplicate slot after full previous slot");
                Ok(SlotAction::SuppressedDuplicate)
            }
        }
    }

    /// Latest idle baseline, only looked up while the slot still lacks one
    fn snapshot_baseline(&self, current: Option<&Slot>) -> Option<f64> {
        if current.is_some_and(|slot| slot.baseline_w.is_some()) {
            return None;
        }
        match self.baseline.latest_baseline() {
            Ok(state) => state.map(|s| s.baseline_w),
            Err(e) => {
                warn!("Baseline snapshot unavailable: {e}");
                None
            }
        }
    }

    /// Stamp the day-ahead price on today's slots that still have none,
    /// including slots whose activity already ended.
    async fn enrich_nordpool_prices(
        &self,
        timeslot: &DateTime<FixedOffset>,
    ) -> StoreResult<usize> {
        let day = timeslot.date_naive();
        let day_start = day
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| {
                self.config
                    .timezone
                    .from_local_datetime(&midnight)
                    .earliest()
            })
            .map_or(*timeslot, |dt| dt.fixed_offset());
        let pending: Vec<Slot> = self
            .slots
            .query(&SlotQuery::new(Some(day_start), Some(*timeslot), None))?
            .into_iter()
            .filter(|slot| slot.nordpool_price.is_none())
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        // The series for a day already carries both published days from the sensor
        let series = match self.prices.fetch_price_series(day).await {
            Ok(series) => series,
            Err(e) => {
                warn!(
                    source = self.prices.name(),
                    day = %day,
                    "Price fetch failed: {e:#}"
                );
                return Ok(0);
            }
        };

        let mut priced = 0;
        for slot in pending {
            let Some(point) = find_price(&series, &slot.timeslot) else {
                debug!(slot = %slot.key(), "No day-ahead price covers slot yet");
                continue;
            };
            let price = round_to(point.value, 5);
            if self.slots.set_nordpool_price_if_null(&slot.timeslot, price)? {
                info!(slot = %slot.key(), price_eur_kwh = price, "Set day-ahead price");
                priced += 1;
            }
        }
        Ok(priced)
    }
}
