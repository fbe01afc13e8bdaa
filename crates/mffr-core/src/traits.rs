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

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use mffr_types::{ActivationPrice, BaselineState, PricePoint, Settlement, Slot, SlotQuery};
use tracing::{debug, warn};

use crate::errors::StoreResult;

// ============= Data Source Traits =============

/// Reads the latest state of a named signal on the automation platform.
/// Business logic uses this trait and never knows about transport details.
#[async_trait]
pub trait SignalReader: Send + Sync {
    /// Latest raw state, `Ok(None)` when the platform reports it unavailable
    async fn read(&self, signal_id: &str) -> Result<Option<String>>;

    /// Get source name for logging
    fn name(&self) -> &str;
}

/// Day-ahead reference market prices
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Ordered price blocks that start on `day` in the metering timezone
    async fn fetch_price_series(&self, day: NaiveDate) -> Result<Vec<PricePoint>>;

    fn name(&self) -> &str;
}

/// Reserve-activation clearing prices
#[async_trait]
pub trait ActivationPriceSource: Send + Sync {
    async fn fetch_activation_prices(&self) -> Result<Vec<ActivationPrice>>;

    fn name(&self) -> &str;
}

/// Read a mode string, degrading any failure to "no reading"
pub async fn read_mode(reader: &dyn SignalReader, signal_id: &str) -> Option<String> {
    match reader.read(signal_id).await {
        Ok(state) => state,
        Err(e) => {
            warn!(source = reader.name(), signal = signal_id, "Signal read failed: {e:#}");
            None
        }
    }
}

/// Read a power value in watts, degrading failures and non-numeric states to "no reading"
pub async fn read_power(reader: &dyn SignalReader, signal_id: &str) -> Option<f64> {
    let raw = read_mode(reader, signal_id).await?;
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        Ok(_) | Err(_) => {
            debug!(signal = signal_id, state = %raw, "Ignoring non-numeric power reading");
            None
        }
    }
}

// ============= Storage Gateway =============

/// Row store for slots keyed by their timeslot.
///
/// Every mutation is an atomic read-modify-write over one column group:
/// metering columns (owned by the metering engine), the two price columns
/// (write-once), and the settlement columns (written once by the sweep).
pub trait SlotStore: Send + Sync {
    fn get(&self, timeslot: &DateTime<FixedOffset>) -> StoreResult<Option<Slot>>;

    /// Insert a new slot, failing with `Conflict` if the key is taken
    fn insert(&self, slot: &Slot) -> StoreResult<()>;

    /// Write the signal and metering columns of an existing slot in place.
    /// Price and settlement columns are left alone; `baseline_w` is only
    /// written when the stored value is still null.
    fn update_metering(&self, slot: &Slot) -> StoreResult<()>;

    /// Returns true when the price was written, false when already set or no row exists
    fn set_nordpool_price_if_null(
        &self,
        timeslot: &DateTime<FixedOffset>,
        price_eur_kwh: f64,
    ) -> StoreResult<bool>;

    fn set_mffr_price_if_null(
        &self,
        timeslot: &DateTime<FixedOffset>,
        price_eur_mwh: f64,
    ) -> StoreResult<bool>;

    /// Write settlement columns of a slot that has none yet
    fn write_settlement(
        &self,
        timeslot: &DateTime<FixedOffset>,
        settlement: &Settlement,
    ) -> StoreResult<bool>;

    /// Slots whose settlement columns are still null
    fn unsettled_slots(&self) -> StoreResult<Vec<Slot>>;

    /// Slots whose activation price is still null
    fn slots_missing_activation_price(&self) -> StoreResult<Vec<Slot>>;

    /// Delete zero-duration slots whose last activity is older than `cutoff`
    fn delete_stale_zero_duration(&self, cutoff: &DateTime<FixedOffset>) -> StoreResult<usize>;

    /// Slots matching the query, newest timeslot first
    fn query(&self, query: &SlotQuery) -> StoreResult<Vec<Slot>>;
}

/// Singleton store for the published idle baseline
pub trait BaselineStore: Send + Sync {
    fn latest_baseline(&self) -> StoreResult<Option<BaselineState>>;

    fn publish_baseline(&self, state: &BaselineState) -> StoreResult<()>;

    fn reset_baseline(&self) -> StoreResult<()>;
}
