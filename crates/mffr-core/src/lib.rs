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

pub mod activation;
pub mod baseline;
pub mod cleanup;
pub mod errors;
pub mod integrator;
pub mod memory;
pub mod metering;
pub mod settlement;
pub mod traits;

use chrono::{DateTime, FixedOffset, SubsecRound, Utc};
use chrono_tz::Tz;

pub use activation::{EnrichmentSummary, enrich_activation_prices};
pub use baseline::{BaselineEstimator, BaselineTask};
pub use cleanup::{CLEANUP_GRACE_MINUTES, cleanup_zero_duration_slots};
pub use errors::{StoreError, StoreResult};
pub use integrator::{PowerIntegrator, hold_energy_wh, round_to};
pub use memory::MemoryStore;
pub use metering::{MeteringEngine, SlotAction, SlotPlan, TickEnergy, TickReport, plan_slot};
pub use settlement::{SettlementSkip, SweepSummary, calculate, run_settlement_sweep, settle};
pub use traits::{ActivationPriceSource, BaselineStore, PriceSource, SignalReader, SlotStore};

/// Current wall-clock time in `tz`, truncated to whole seconds
pub fn local_now(tz: Tz) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&tz).fixed_offset().trunc_subsecs(0)
}
