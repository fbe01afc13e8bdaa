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

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use mffr_types::{BaselineState, Settlement, Slot, SlotQuery};
use parking_lot::RwLock;

use crate::errors::{StoreError, StoreResult};
use crate::traits::{BaselineStore, SlotStore};

/// In-process storage gateway, ordered by slot instant.
///
/// Used by tests and dry runs; follows the same column-group rules as the
/// SQLite gateway.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: RwLock<BTreeMap<i64, Slot>>,
    baseline: RwLock<Option<BaselineState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Snapshot of every stored slot, oldest first
    pub fn all(&self) -> Vec<Slot> {
        self.slots.read().values().cloned().collect()
    }
}

fn instant(timeslot: &DateTime<FixedOffset>) -> i64 {
    timeslot.timestamp()
}

impl SlotStore for MemoryStore {
    fn get(&self, timeslot: &DateTime<FixedOffset>) -> StoreResult<Option<Slot>> {
        Ok(self.slots.read().get(&instant(timeslot)).cloned())
    }

    fn insert(&self, slot: &Slot) -> StoreResult<()> {
        let mut slots = self.slots.write();
        let key = instant(&slot.timeslot);
        if slots.contains_key(&key) {
            return Err(StoreError::Conflict(slot.key()));
        }
        slots.insert(key, slot.clone());
        Ok(())
    }

    fn update_metering(&self, slot: &Slot) -> StoreResult<()> {
        let mut slots = self.slots.write();
        let Some(stored) = slots.get_mut(&instant(&slot.timeslot)) else {
            return Err(StoreError::Backend(format!("no slot {}", slot.key())));
        };
        stored.signal = slot.signal;
        stored.start = slot.start;
        stored.end = slot.end;
        stored.slot_end = slot.slot_end;
        stored.energy_kwh = slot.energy_kwh;
        stored.grid_kwh = slot.grid_kwh;
        stored.duration_min = slot.duration_min;
        stored.cancelled = slot.cancelled;
        stored.was_backup = slot.was_backup;
        if stored.baseline_w.is_none() {
            stored.baseline_w = slot.baseline_w;
        }
        Ok(())
    }

    fn set_nordpool_price_if_null(
        &self,
        timeslot: &DateTime<FixedOffset>,
        price_eur_kwh: f64,
    ) -> StoreResult<bool> {
        let mut slots = self.slots.write();
        match slots.get_mut(&instant(timeslot)) {
            Some(slot) if slot.nordpool_price.is_none() => {
                slot.nordpool_price = Some(price_eur_kwh);
                Ok(true)
            }
            Some(_) | None => Ok(false),
        }
    }

    fn set_mffr_price_if_null(
        &self,
        timeslot: &DateTime<FixedOffset>,
        price_eur_mwh: f64,
    ) -> StoreResult<bool> {
        let mut slots = self.slots.write();
        match slots.get_mut(&instant(timeslot)) {
            Some(slot) if slot.mffr_price.is_none() => {
                slot.mffr_price = Some(price_eur_mwh);
                Ok(true)
            }
            Some(_) | None => Ok(false),
        }
    }

    fn write_settlement(
        &self,
        timeslot: &DateTime<FixedOffset>,
        settlement: &Settlement,
    ) -> StoreResult<bool> {
        let mut slots = self.slots.write();
        match slots.get_mut(&instant(timeslot)) {
            Some(slot) if slot.settlement.is_none() => {
                slot.settlement = Some(*settlement);
                Ok(true)
            }
            Some(_) | None => Ok(false),
        }
    }

    fn unsettled_slots(&self) -> StoreResult<Vec<Slot>> {
        Ok(self
            .slots
            .read()
            .values()
            .filter(|slot| !slot.is_settled())
            .cloned()
            .collect())
    }

    fn slots_missing_activation_price(&self) -> StoreResult<Vec<Slot>> {
        Ok(self
            .slots
            .read()
            .values()
            .filter(|slot| slot.mffr_price.is_none())
            .cloned()
            .collect())
    }

    fn delete_stale_zero_duration(&self, cutoff: &DateTime<FixedOffset>) -> StoreResult<usize> {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| !(slot.duration_min == 0 && slot.end < *cutoff));
        Ok(before - slots.len())
    }

    fn query(&self, query: &SlotQuery) -> StoreResult<Vec<Slot>> {
        let slots = self.slots.read();
        let matching = slots
            .values()
            .rev()
            .filter(|slot| query.matches(&slot.timeslot))
            .cloned();
        Ok(match query.row_limit() {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

impl BaselineStore for MemoryStore {
    fn latest_baseline(&self) -> StoreResult<Option<BaselineState>> {
        Ok(self.baseline.read().clone())
    }

    fn publish_baseline(&self, state: &BaselineState) -> StoreResult<()> {
        *self.baseline.write() = Some(state.clone());
        Ok(())
    }

    fn reset_baseline(&self) -> StoreResult<()> {
        *self.baseline.write() = None;
        Ok(())
    }
}
