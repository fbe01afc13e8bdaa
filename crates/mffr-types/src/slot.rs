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

use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, TimeZone, Timelike};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

use crate::signal::Signal;

/// Length of one accounting slot
pub const SLOT_LENGTH_MINUTES: i64 = 15;

/// Truncate a timestamp to the enclosing 15-minute boundary in its own timezone
pub fn slot_start<Tz: TimeZone>(at: &DateTime<Tz>) -> DateTime<Tz> {
    let into_slot = i64::from(at.minute() % 15) * 60 + i64::from(at.second());
    at.clone() - Duration::seconds(into_slot) - Duration::nanoseconds(i64::from(at.nanosecond()))
}

/// Natural end of the slot starting at `timeslot`
pub fn slot_end<Tz: TimeZone>(timeslot: &DateTime<Tz>) -> DateTime<Tz> {
    timeslot.clone() + Duration::minutes(SLOT_LENGTH_MINUTES)
}

/// Canonical storage key for a slot: RFC 3339 with whole seconds and a numeric offset
pub fn slot_key(timeslot: &DateTime<FixedOffset>) -> String {
    timeslot.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Derived financial breakdown of a closed, priced slot (EUR)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Legacy column, mirrors `ffr_income`
    pub profit: f64,
    /// Activation income after the platform share
    pub ffr_income: f64,
    /// Platform share of the activation income (informational, not subtracted)
    pub fusebox_fee: f64,
    /// DOWN: cost of imported grid energy. UP: negated export income.
    pub grid_cost: f64,
    pub net_total: f64,
    pub price_per_kwh: Option<f64>,
}

/// One 15-minute accounting interval during which a directional signal was active.
///
/// Serializes as one flat record; settlement columns are `null` until settled.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Slot boundary, always aligned to :00/:15/:30/:45
    pub timeslot: DateTime<FixedOffset>,
    /// First tick the signal was seen in this slot
    pub start: DateTime<FixedOffset>,
    /// Last tick the signal was seen in this slot
    pub end: DateTime<FixedOffset>,
    /// `timeslot + 15 min`
    pub slot_end: DateTime<FixedOffset>,
    pub signal: Signal,
    /// Absolute directional energy
    pub energy_kwh: f64,
    /// Signed grid energy (+import / -export)
    pub grid_kwh: f64,
    /// Idle baseline power snapshot, set once
    pub baseline_w: Option<f64>,
    pub duration_min: i64,
    pub cancelled: bool,
    pub was_backup: bool,
    /// Reserve-activation price (EUR/MWh), set once
    pub mffr_price: Option<f64>,
    /// Day-ahead market price (EUR/kWh), set once
    pub nordpool_price: Option<f64>,
    pub settlement: Option<Settlement>,
}

impl Slot {
    /// Fresh slot for a signal first seen at `now`
    pub fn open(
        timeslot: DateTime<FixedOffset>,
        now: DateTime<FixedOffset>,
        signal: Signal,
        energy_kwh: f64,
        grid_kwh: f64,
        baseline_w: Option<f64>,
    ) -> Self {
        Self {
            slot_end: slot_end(&timeslot),
            timeslot,
            start: now,
            end: now,
            signal,
            energy_kwh,
            grid_kwh,
            baseline_w,
            duration_min: 0,
            cancelled: false,
            was_backup: false,
            mffr_price: None,
            nordpool_price: None,
            settlement: None,
        }
    }

    pub fn key(&self) -> String {
        slot_key(&self.timeslot)
    }

    /// A slot accepts extensions until activity reaches its natural end
    pub fn is_open(&self) -> bool {
        self.end < self.slot_end
    }

    pub fn has_ended(&self, now: &DateTime<FixedOffset>) -> bool {
        self.slot_end <= *now
    }

    pub fn is_settled(&self) -> bool {
        self.settlement.is_some()
    }
}

impl Serialize for Slot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let settlement = self.settlement.as_ref();
        let mut row = serializer.serialize_struct("Slot", 19)?;
        row.serialize_field("timeslot", &self.timeslot)?;
        row.serialize_field("start", &self.start)?;
        row.serialize_field("end", &self.end)?;
        row.serialize_field("slot_end", &self.slot_end)?;
        row.serialize_field("signal", &self.signal)?;
        row.serialize_field("energy_kwh", &self.energy_kwh)?;
        row.serialize_field("grid_kwh", &self.grid_kwh)?;
        row.serialize_field("baseline_w", &self.baseline_w)?;
        row.serialize_field("duration_min", &self.duration_min)?;
        row.serialize_field("cancelled", &self.cancelled)?;
        row.serialize_field("was_backup", &self.was_backup)?;
        row.serialize_field("mffr_price", &self.mffr_price)?;
        row.serialize_field("nordpool_price", &self.nordpool_price)?;
        row.serialize_field("profit", &settlement.map(|s| s.profit))?;
        row.serialize_field("ffr_income", &settlement.map(|s| s.ffr_income))?;
        row.serialize_field("fusebox_fee", &settlement.map(|s| s.fusebox_fee))?;
        row.serialize_field("grid_cost", &settlement.map(|s| s.grid_cost))?;
        row.serialize_field("net_total", &settlement.map(|s| s.net_total))?;
        row.serialize_field(
            "price_per_kwh",
            &settlement.and_then(|s| s.price_per_kwh),
        )?;
        row.end()
    }
}
