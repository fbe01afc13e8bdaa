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

//! Directional settlement of closed, priced slots.
//!
//! DOWN slots absorb energy: activation income is the spread of the market
//! price over the activation price, and imported grid energy is a cost.
//! UP slots deliver energy: income is the spread of the activation price over
//! the market price, and exported grid energy earns the market price.

use chrono::{DateTime, FixedOffset};
use mffr_types::{Settlement, SettlementConfig, Signal, Slot};
use tracing::{debug, error, info, warn};

use crate::integrator::round_to;
use crate::traits::SlotStore;

const MONEY_DECIMALS: i32 = 5;

/// Why a slot was not settled in this sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementSkip {
    AlreadySettled,
    /// `slot_end` is still in the future
    NotEnded,
    BelowMinimumEnergy,
    MissingActivationPrice,
    MissingMarketPrice,
}

/// Compute the financial breakdown for a slot.
///
/// `activation_price_eur_mwh` is the reserve clearing price, `market_price_eur_kwh`
/// the day-ahead price.
pub fn calculate(
    signal: Signal,
    energy_kwh: f64,
    grid_kwh: f64,
    activation_price_eur_mwh: f64,
    market_price_eur_kwh: f64,
    config: &SettlementConfig,
) -> Settlement {
    let activation_eur_kwh = activation_price_eur_mwh / 1000.0;
    let fee_share = config.platform_fee_share;
    let your_share = config.your_share();

    let (activation_income, grid_cost, net_total, price_per_kwh) = match signal {
        Signal::Down => {
            let income = (market_price_eur_kwh - activation_eur_kwh) * energy_kwh * your_share;
            let grid_import_kwh = grid_kwh.max(0.0);
            let grid_cost = market_price_eur_kwh * config.grid_import_multiplier * grid_import_kwh;
            let net = income - grid_cost;
            let per_kwh = (grid_import_kwh > 0.0).then(|| net / grid_import_kwh);
            (income, grid_cost, net, per_kwh)
        }
        Signal::Up => {
            let income = (activation_eur_kwh - market_price_eur_kwh) * energy_kwh * your_share;
            let export_income = market_price_eur_kwh * (-grid_kwh).max(0.0);
            let net = income + export_income;
            let per_kwh = (energy_kwh > 0.0).then(|| net / energy_kwh);
            // Negative cost carries the export income
            (income, -export_income, net, per_kwh)
        }
    };

    let fusebox_fee = if your_share > 0.0 {
        activation_income * fee_share / your_share
    } else {
        0.0
    };

    let income = round_to(activation_income, MONEY_DECIMALS);
    Settlement {
        profit: income,
        ffr_income: income,
        fusebox_fee: round_to(fusebox_fee, MONEY_DECIMALS),
        grid_cost: round_to(grid_cost, MONEY_DECIMALS),
        net_total: round_to(net_total, MONEY_DECIMALS),
        price_per_kwh: price_per_kwh.map(|p| round_to(p, MONEY_DECIMALS)),
    }
}

/// Settle one slot if it is closed and fully priced
pub fn settle(
    slot: &Slot,
    config: &SettlementConfig,
    now: &DateTime<FixedOffset>,
) -> Result<Settlement, SettlementSkip> {
    if slot.is_settled() {
        return Err(SettlementSkip::AlreadySettled);
    }
    if !slot.has_ended(now) {
        return Err(SettlementSkip::NotEnded);
    }
    if slot.energy_kwh < config.min_energy_kwh {
        return Err(SettlementSkip::BelowMinimumEnergy);
    }
    let Some(activation_price) = slot.mffr_price else {
        return Err(SettlementSkip::MissingActivationPrice);
    };
    let Some(market_price) = slot.nordpool_price else {
        return Err(SettlementSkip::MissingMarketPrice);
    };

    Ok(calculate(
        slot.signal,
        slot.energy_kwh,
        slot.grid_kwh,
        activation_price,
        market_price,
        config,
    ))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub settled: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Settle every unsettled slot that is ready. Failures never escape the sweep.
pub fn run_settlement_sweep(
    store: &dyn SlotStore,
    config: &SettlementConfig,
    now: &DateTime<FixedOffset>,
) -> SweepSummary {
    let mut summary = SweepSummary::default();
    let slots = match store.unsettled_slots() {
        Ok(slots) => slots,
        Err(e) => {
            warn!("Settlement sweep skipped: {e}");
            return summary;
        }
    };

    for slot in &slots {
        summary.examined += 1;
        let settlement = match settle(slot, config, now) {
            Ok(settlement) => settlement,
            Err(reason) => {
                debug!(slot = %slot.key(), ?reason, "Slot not settled");
                summary.skipped += 1;
                continue;
            }
        };

        match store.write_settlement(&slot.timeslot, &settlement) {
            Ok(true) => {
                summary.settled += 1;
                info!(
                    slot = %slot.key(),
                    signal = %slot.signal,
                    ffr_income = settlement.ffr_income,
                    grid_cost = settlement.grid_cost,
                    net_total = settlement.net_total,
                    "Settled slot"
                );
            }
            Ok(false) => summary.skipped += 1,
            Err(e) if e.is_contention() => {
                warn!("Slot store busy, deferring remaining settlements: {e}");
                summary.failed += 1;
                break;
            }
            Err(e) => {
                error!(slot = %slot.key(), "Failed to write settlement: {e}");
                summary.failed += 1;
            }
        }
    }

    if summary.settled > 0 {
        info!(settled = summary.settled, "Financial breakdown updated");
    }
    summary
}
