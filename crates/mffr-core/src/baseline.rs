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

use chrono::{DateTime, FixedOffset};
use mffr_types::{BaselineState, MeteringConfig, Signal, slot_end, slot_start};
use tracing::{debug, error, info};

use crate::integrator::{PowerIntegrator, round_to};
use crate::traits::{BaselineStore, SignalReader, read_mode, read_power};

/// Accumulations at or below this magnitude are treated as "no data"
const NEGLIGIBLE_WH: f64 = 1e-6;

const WINDOW_SECONDS: f64 = 900.0;

/// Idle power estimator over rolling 15-minute windows.
///
/// A window publishes a baseline only if it accumulated energy and no
/// directional signal was seen at any point inside it.
#[derive(Debug, Clone, Default)]
pub struct BaselineEstimator {
    window: Option<DateTime<FixedOffset>>,
    integrator: PowerIntegrator,
    saw_signal: bool,
}

impl BaselineEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start of the window currently being accumulated
    pub fn window(&self) -> Option<DateTime<FixedOffset>> {
        self.window
    }

    pub fn saw_signal(&self) -> bool {
        self.saw_signal
    }

    pub fn accumulated_wh(&self) -> f64 {
        self.integrator.accumulated_wh()
    }

    /// Close the tracked window if `now` has crossed into a later one.
    ///
    /// Returns the baseline to publish for the closed window, if it qualified.
    /// State is reset on every crossing whether or not anything is published.
    pub fn roll_window(&mut self, now: DateTime<FixedOffset>) -> Option<BaselineState> {
        let current = slot_start(&now);
        let Some(tracked) = self.window else {
            self.window = Some(current);
            return None;
        };
        if current <= tracked {
            return None;
        }

        let accum_wh = self.integrator.accumulated_wh();
        let published = (accum_wh.abs() > NEGLIGIBLE_WH && !self.saw_signal).then(|| {
            BaselineState {
                baseline_w: round_to(accum_wh * 3600.0 / WINDOW_SECONDS, 2),
                computed_for_slot: slot_end(&tracked),
                energy_wh: round_to(accum_wh, 3),
                updated_at: now,
            }
        });
        if published.is_none() && self.saw_signal {
            debug!(window = %tracked, "Discarding baseline window with directional activity");
        }

        self.window = Some(current);
        self.integrator.reset();
        self.saw_signal = false;
        published
    }

    /// Feed one sample pair into the current window
    pub fn observe(
        &mut self,
        now: DateTime<FixedOffset>,
        power_w: Option<f64>,
        signal: Option<Signal>,
    ) {
        if signal.is_some() {
            self.saw_signal = true;
        }
        self.integrator.add_sample(now, power_w);
    }

    /// Roll the window and then observe, as one synchronous step
    pub fn tick(
        &mut self,
        now: DateTime<FixedOffset>,
        power_w: Option<f64>,
        signal: Option<Signal>,
    ) -> Option<BaselineState> {
        let published = self.roll_window(now);
        self.observe(now, power_w, signal);
        published
    }
}

/// Periodic baseline task: samples sensors and publishes finished windows
pub struct BaselineTask {
    estimator: BaselineEstimator,
    config: MeteringConfig,
    reader: Arc<dyn SignalReader>,
    store: Arc<dyn BaselineStore>,
}

impl std::fmt::Debug for BaselineTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaselineTask")
            .field("estimator", &self.estimator)
            .field("reader", &self.reader.name())
            .finish_non_exhaustive()
    }
}

impl BaselineTask {
    pub fn new(
        config: MeteringConfig,
        reader: Arc<dyn SignalReader>,
        store: Arc<dyn BaselineStore>,
    ) -> Self {
        Self {
            estimator: BaselineEstimator::new(),
            config,
            reader,
            store,
        }
    }

    pub fn estimator(&self) -> &BaselineEstimator {
        &self.estimator
    }

    /// One sampling step. Publishing is best-effort: failures are logged only.
    pub async fn tick(&mut self, now: DateTime<FixedOffset>) -> Option<BaselineState> {
        let published = self.estimator.roll_window(now);
        if let Some(state) = &published {
            match self.store.publish_baseline(state) {
                Ok(()) => info!(
                    baseline_w = state.baseline_w,
                    energy_wh = state.energy_wh,
                    window_end = %state.computed_for_slot,
                    "Updated idle baseline"
                ),
                Err(e) => error!("Failed to publish baseline: {e}"),
            }
        }

        let entities = &self.config.entities;
        let power_w = read_power(self.reader.as_ref(), &entities.baseline_power).await;
        let mode = read_mode(self.reader.as_ref(), &entities.mode).await;
        let signal = self.config.modes.resolve(mode.as_deref());

        self.estimator.observe(now, power_w, signal);
        published
    }
}
