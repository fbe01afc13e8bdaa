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

//! Zero-order-hold integration of power samples into energy.

use chrono::{DateTime, FixedOffset};

/// Energy (Wh) of `power_w` held for `seconds`. Non-positive intervals yield nothing.
pub fn hold_energy_wh(power_w: f64, seconds: f64) -> f64 {
    if seconds > 0.0 {
        power_w * seconds / 3600.0
    } else {
        0.0
    }
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Accumulates energy from power samples arriving at an irregular cadence.
///
/// Each sample's power is assumed to hold until the next sample arrives
/// (left-rectangle rule). The first sample only sets the reference point.
#[derive(Debug, Clone, Default)]
pub struct PowerIntegrator {
    last: Option<(DateTime<FixedOffset>, f64)>,
    accumulated_wh: f64,
}

impl PowerIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a sample and return the energy (Wh) it contributed.
    ///
    /// A missing reading keeps the previous reference point untouched.
    pub fn add_sample(&mut self, at: DateTime<FixedOffset>, power_w: Option<f64>) -> f64 {
        let Some(power_w) = power_w else {
            return 0.0;
        };

        let delta_wh = self.last.map_or(0.0, |(prev_at, prev_power)| {
            // Clock steps backwards convert to zero elapsed time
            let elapsed = (at - prev_at).to_std().map_or(0.0, |d| d.as_secs_f64());
            hold_energy_wh(prev_power, elapsed)
        });

        self.last = Some((at, power_w));
        self.accumulated_wh += delta_wh;
        delta_wh
    }

    pub fn accumulated_wh(&self) -> f64 {
        self.accumulated_wh
    }

    pub fn has_reference(&self) -> bool {
        self.last.is_some()
    }

    /// Forget the reference point and the accumulated energy
    pub fn reset(&mut self) {
        self.last = None;
        self.accumulated_wh = 0.0;
    }
}
