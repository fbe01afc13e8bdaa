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

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Idle baseline published for the most recently completed quiet window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineState {
    /// Average idle power over the window (W)
    pub baseline_w: f64,
    /// End of the quiet window the baseline was computed over
    pub computed_for_slot: DateTime<FixedOffset>,
    /// Energy accumulated over the window (Wh)
    #[serde(rename = "energy_Wh")]
    pub energy_wh: f64,
    pub updated_at: DateTime<FixedOffset>,
}
