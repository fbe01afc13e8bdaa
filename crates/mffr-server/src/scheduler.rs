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

//! Periodic task loops.
//!
//! Every task owns its state and awaits its own run before the next tick, so
//! a slow run delays (and coalesces) only its own schedule.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use mffr_core::{
    ActivationPriceSource, BaselineTask, MeteringEngine, SlotAction, SlotStore,
    cleanup_zero_duration_slots, enrich_activation_prices, local_now, run_settlement_sweep,
};
use mffr_types::SettlementConfig;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

pub fn spawn_metering(mut engine: MeteringEngine, period: Duration) -> JoinHandle<()> {
    let tz = engine.config().timezone;
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            let report = engine.tick(local_now(tz)).await;
            if report.action != SlotAction::Idle {
                debug!(
                    slot = %report.timeslot,
                    action = ?report.action,
                    "Metering tick"
                );
            }
        }
    })
}

pub fn spawn_baseline(mut task: BaselineTask, tz: Tz, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            task.tick(local_now(tz)).await;
        }
    })
}

pub fn spawn_settlement(
    store: Arc<dyn SlotStore>,
    config: SettlementConfig,
    tz: Tz,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            let summary = run_settlement_sweep(store.as_ref(), &config, &local_now(tz));
            if summary.settled > 0 || summary.failed > 0 {
                info!(
                    settled = summary.settled,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "Settlement sweep"
                );
            }
        }
    })
}

pub fn spawn_activation_prices(
    source: Arc<dyn ActivationPriceSource>,
    store: Arc<dyn SlotStore>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            let summary = enrich_activation_prices(source.as_ref(), store.as_ref()).await;
            debug!(
                pending = summary.pending,
                updated = summary.updated,
                "Activation price run"
            );
        }
    })
}

pub fn spawn_cleanup(store: Arc<dyn SlotStore>, tz: Tz, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            cleanup_zero_duration_slots(store.as_ref(), &local_now(tz));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mffr_core::MemoryStore;
    use mffr_types::{Signal, Slot};

    #[tokio::test]
    async fn test_cleanup_loop_prunes_stale_flicker() {
        let store = Arc::new(MemoryStore::new());
        let tz = chrono_tz::Europe::Tallinn;
        let long_ago = local_now(tz) - chrono::Duration::hours(1);
        let timeslot = mffr_types::slot_start(&long_ago);
        store
            .insert(&Slot::open(timeslot, long_ago, Signal::Up, 0.0, 0.0, None))
            .unwrap();

        let handle = spawn_cleanup(store.clone(), tz, Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort();

        assert!(store.is_empty());
    }
}
