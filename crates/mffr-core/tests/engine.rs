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

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use mffr_core::{
    ActivationPriceSource, BaselineStore, BaselineTask, MemoryStore, MeteringEngine, PriceSource,
    SignalReader, SlotAction, SlotStore, StoreError, StoreResult, cleanup_zero_duration_slots,
    enrich_activation_prices, run_settlement_sweep,
};
use mffr_types::{
    ActivationPrice, BaselineState, MeteringConfig, PricePoint, Settlement, SettlementConfig,
    Signal, Slot, SlotQuery,
};
use parking_lot::Mutex;

// ============= Fakes =============

/// Sensor states keyed by entity id; unknown ids read as unavailable
#[derive(Default)]
struct ScriptedReader {
    states: Mutex<HashMap<String, String>>,
    failing: Mutex<Vec<String>>,
}

impl ScriptedReader {
    fn set(&self, entity: &str, state: &str) {
        self.states
            .lock()
            .insert(entity.to_owned(), state.to_owned());
    }

    fn clear(&self, entity: &str) {
        self.states.lock().remove(entity);
    }

    fn fail(&self, entity: &str) {
        self.failing.lock().push(entity.to_owned());
    }
}

#[async_trait]
impl SignalReader for ScriptedReader {
    async fn read(&self, signal_id: &str) -> Result<Option<String>> {
        if self.failing.lock().iter().any(|e| e == signal_id) {
            return Err(anyhow!("connection refused"));
        }
        Ok(self.states.lock().get(signal_id).cloned())
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

#[derive(Default)]
struct FixedPrices {
    series: Mutex<HashMap<NaiveDate, Vec<PricePoint>>>,
    calls: AtomicUsize,
}

impl FixedPrices {
    fn hourly(&self, start: &str, value: f64) {
        let start = at(start);
        self.series
            .lock()
            .entry(start.date_naive())
            .or_default()
            .push(PricePoint {
                start,
                end: start + Duration::hours(1),
                value,
            });
    }

    fn replace_all(&self, value: f64) {
        for points in self.series.lock().values_mut() {
            for point in points.iter_mut() {
                point.value = value;
            }
        }
    }
}

#[async_trait]
impl PriceSource for FixedPrices {
    async fn fetch_price_series(&self, day: NaiveDate) -> Result<Vec<PricePoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.series.lock().get(&day).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "Fixed"
    }
}

struct ActivationList(Mutex<Vec<ActivationPrice>>);

#[async_trait]
impl ActivationPriceSource for ActivationList {
    async fn fetch_activation_prices(&self) -> Result<Vec<ActivationPrice>> {
        Ok(self.0.lock().clone())
    }

    fn name(&self) -> &str {
        "ActivationList"
    }
}

/// Store whose writes hit a locked database while `busy` is set
#[derive(Default)]
struct BusyStore {
    inner: MemoryStore,
    busy: AtomicBool,
}

impl BusyStore {
    fn locked() -> Self {
        let store = Self::default();
        store.set_busy(true);
        store
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.busy.load(Ordering::SeqCst) {
            Err(StoreError::Contention("database is locked".to_owned()))
        } else {
            Ok(())
        }
    }
}

impl SlotStore for BusyStore {
    fn get(&self, timeslot: &DateTime<FixedOffset>) -> StoreResult<Option<Slot>> {
        self.inner.get(timeslot)
    }
    fn insert(&self, slot: &Slot) -> StoreResult<()> {
        self.check()?;
        self.inner.insert(slot)
    }
    fn update_metering(&self, slot: &Slot) -> StoreResult<()> {
        self.check()?;
        self.inner.update_metering(slot)
    }
    fn set_nordpool_price_if_null(&self, t: &DateTime<FixedOffset>, p: f64) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_nordpool_price_if_null(t, p)
    }
    fn set_mffr_price_if_null(&self, t: &DateTime<FixedOffset>, p: f64) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_mffr_price_if_null(t, p)
    }
    fn write_settlement(&self, t: &DateTime<FixedOffset>, s: &Settlement) -> StoreResult<bool> {
        self.check()?;
        self.inner.write_settlement(t, s)
    }
    fn unsettled_slots(&self) -> StoreResult<Vec<Slot>> {
        self.inner.unsettled_slots()
    }
    fn slots_missing_activation_price(&self) -> StoreResult<Vec<Slot>> {
        self.inner.slots_missing_activation_price()
    }
    fn delete_stale_zero_duration(&self, cutoff: &DateTime<FixedOffset>) -> StoreResult<usize> {
        self.check()?;
        self.inner.delete_stale_zero_duration(cutoff)
    }
    fn query(&self, query: &SlotQuery) -> StoreResult<Vec<Slot>> {
        self.inner.query(query)
    }
}

impl BaselineStore for BusyStore {
    fn latest_baseline(&self) -> StoreResult<Option<BaselineState>> {
        self.inner.latest_baseline()
    }
    fn publish_baseline(&self, state: &BaselineState) -> StoreResult<()> {
        self.check()?;
        self.inner.publish_baseline(state)
    }
    fn reset_baseline(&self) -> StoreResult<()> {
        self.check()?;
        self.inner.reset_baseline()
    }
}

// ============= Harness =============

const MODE: &str = "input_select.battery_mode_selector";
const GRID: &str = "sensor.ss_grid_power";
const MFFR_POWER: &str = "sensor.mffr_power";
const BATTERY: &str = "sensor.ss_battery_power";

fn at(s: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(s).unwrap()
}

struct Harness {
    reader: Arc<ScriptedReader>,
    prices: Arc<FixedPrices>,
    store: Arc<MemoryStore>,
    engine: MeteringEngine,
}

fn harness() -> Harness {
    let reader = Arc::new(ScriptedReader::default());
    let prices = Arc::new(FixedPrices::default());
    let store = Arc::new(MemoryStore::new());
    let engine = MeteringEngine::new(
        MeteringConfig::default(),
        reader.clone(),
        prices.clone(),
        store.clone(),
        store.clone(),
    );
    Harness {
        reader,
        prices,
        store,
        engine,
    }
}

impl Harness {
    /// Tick every 10 s from `from` while `until` is not reached
    async fn run(&mut self, from: &str, until: &str) -> Vec<SlotAction> {
        let mut actions = Vec::new();
        let mut now = at(from);
        while now < at(until) {
            actions.push(self.engine.tick(now).await.action);
            now += Duration::seconds(10);
        }
        actions
    }
}

fn idle_baseline(baseline_w: f64) -> BaselineState {
    BaselineState {
        baseline_w,
        computed_for_slot: at("2025-10-02T12:00:00+03:00"),
        energy_wh: baseline_w / 4.0,
        updated_at: at("2025-10-02T12:00:00+03:00"),
    }
}

// ============= Metering =============

#[tokio::test]
async fn test_full_activation_produces_single_slot() {
    let mut h = harness();
    h.reader.set(MODE, "Fusebox Sell");
    h.reader.set(MFFR_POWER, "-3600");
    h.reader.set(GRID, "-3000");

    let mut now = at("2025-10-02T10:15:20+03:00");
    let first = h.engine.tick(now).await;
    assert_eq!(first.action, SlotAction::Created);
    assert_eq!(first.signal, Some(Signal::Up));

    let mut last_energy = 0.0;
    while now < at("2025-10-02T10:29:50+03:00") {
        now += Duration::seconds(10);
        assert_eq!(h.engine.tick(now).await.action, SlotAction::Extended);
        let slot = h.store.get(&at("2025-10-02T10:15:00+03:00")).unwrap().unwrap();
        assert!(slot.energy_kwh >= last_energy);
        last_energy = slot.energy_kwh;
    }

    let slots = h.store.all();
    assert_eq!(slots.len(), 1);
    let slot = &slots[0];
    assert_eq!(slot.signal, Signal::Up);
    assert_eq!(slot.end, at("2025-10-02T10:29:50+03:00"));
    assert_eq!(slot.duration_min, 15);
    assert!(!slot.cancelled);
    assert!(slot.was_backup);
    // 89 ticks of 10 Wh each, the opening tick included
    assert!((slot.energy_kwh - 0.89).abs() < 1e-9);
    assert!(slot.grid_kwh < 0.0);
}

#[tokio::test]
async fn test_signal_ending_early_marks_slot_cancelled() {
    let mut h = harness();
    h.reader.set(MODE, "kratt buy");
    h.reader.set(GRID, "2000");
    h.run("2025-10-02T11:00:10+03:00", "2025-10-02T11:05:00+03:00")
        .await;
    h.reader.set(MODE, "Self Use");
    assert_eq!(
        h.engine.tick(at("2025-10-02T11:05:00+03:00")).await.action,
        SlotAction::Idle
    );

    let slot = h.store.get(&at("2025-10-02T11:00:00+03:00")).unwrap().unwrap();
    assert_eq!(slot.signal, Signal::Down);
    assert!(slot.cancelled);
    assert!(!slot.was_backup);
    // No directional sensor reading: grid magnitude stands in
    assert!((slot.energy_kwh - slot.grid_kwh).abs() < 1e-9);
}

#[tokio::test]
async fn test_boundary_flicker_never_persists_a_slot() {
    let mut h = harness();
    h.reader.set(MODE, "Fusebox Buy");
    assert_eq!(
        h.engine.tick(at("2025-10-02T10:30:03+03:00")).await.action,
        SlotAction::SkippedJitter
    );
    h.reader.clear(MODE);
    h.engine.tick(at("2025-10-02T10:30:13+03:00")).await;
    assert!(h.store.is_empty());

    // A blip just before a boundary leaves a zero-minute row that cleanup prunes
    h.reader.set(MODE, "Fusebox Buy");
    assert_eq!(
        h.engine.tick(at("2025-10-02T10:44:57+03:00")).await.action,
        SlotAction::Created
    );
    h.reader.clear(MODE);
    h.engine.tick(at("2025-10-02T10:45:07+03:00")).await;

    assert_eq!(
        cleanup_zero_duration_slots(h.store.as_ref(), &at("2025-10-02T10:46:00+03:00")),
        Some(0)
    );
    assert_eq!(
        cleanup_zero_duration_slots(h.store.as_ref(), &at("2025-10-02T10:47:00+03:00")),
        Some(1)
    );
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_continuation_into_next_window_is_suppressed() {
    let mut h = harness();
    h.reader.set(MODE, "Fusebox Sell");
    h.reader.set(MFFR_POWER, "1000");
    h.engine.tick(at("2025-10-02T10:15:20+03:00")).await;
    h.engine.tick(at("2025-10-02T10:29:59+03:00")).await;

    assert_eq!(
        h.engine.tick(at("2025-10-02T10:30:06+03:00")).await.action,
        SlotAction::SuppressedDuplicate
    );
    assert!(h.store.get(&at("2025-10-02T10:30:00+03:00")).unwrap().is_none());

    // Later in the window the activation is genuine
    assert_eq!(
        h.engine.tick(at("2025-10-02T10:30:16+03:00")).await.action,
        SlotAction::Created
    );
}

#[tokio::test]
async fn test_signal_flip_replaces_slot_row() {
    let mut h = harness();
    h.store.publish_baseline(&idle_baseline(80.0)).unwrap();
    h.reader.set(MODE, "Fusebox Sell");
    h.run("2025-10-02T12:00:10+03:00", "2025-10-02T12:02:00+03:00")
        .await;
    let timeslot = at("2025-10-02T12:00:00+03:00");
    h.store.set_mffr_price_if_null(&timeslot, 210.0).unwrap();

    h.store.publish_baseline(&idle_baseline(300.0)).unwrap();
    h.reader.set(MODE, "Fusebox Buy");
    assert_eq!(
        h.engine.tick(at("2025-10-02T12:02:00+03:00")).await.action,
        SlotAction::Replaced
    );
    let slot = h.store.get(&timeslot).unwrap().unwrap();
    assert_eq!(slot.signal, Signal::Down);
    assert_eq!(slot.start, at("2025-10-02T12:02:00+03:00"));
    assert_eq!(slot.baseline_w, Some(80.0));
    assert_eq!(slot.mffr_price, Some(210.0));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_sensor_failure_degrades_to_no_reading() {
    let mut h = harness();
    h.reader.set(MODE, "Fusebox Sell");
    h.reader.fail(MFFR_POWER);
    h.reader.fail(GRID);

    h.run("2025-10-02T10:15:20+03:00", "2025-10-02T10:16:00+03:00")
        .await;
    let slot = h.store.get(&at("2025-10-02T10:15:00+03:00")).unwrap().unwrap();
    assert_eq!(slot.energy_kwh, 0.0);
    assert_eq!(slot.end, at("2025-10-02T10:15:50+03:00"));

    h.reader.fail(MODE);
    assert_eq!(
        h.engine.tick(at("2025-10-02T10:16:00+03:00")).await.action,
        SlotAction::Idle
    );
}

// ============= Price Enrichment =============

#[tokio::test]
async fn test_day_ahead_price_is_written_once() {
    let mut h = harness();
    h.prices.hourly("2025-10-02T10:00:00+03:00", 0.123456);
    h.reader.set(MODE, "Fusebox Buy");

    let report = h.engine.tick(at("2025-10-02T10:15:20+03:00")).await;
    assert_eq!(report.nordpool_prices_set, 1);

    h.prices.replace_all(0.5);
    let report = h.engine.tick(at("2025-10-02T10:15:30+03:00")).await;
    assert_eq!(report.nordpool_prices_set, 0);
    // Nothing left pending, so the source is not asked again
    assert_eq!(h.prices.calls.load(Ordering::SeqCst), 1);

    let slot = h.store.get(&at("2025-10-02T10:15:00+03:00")).unwrap().unwrap();
    assert_eq!(slot.nordpool_price, Some(0.12346));
}

#[tokio::test]
async fn test_day_ahead_price_backfills_ended_slots() {
    let mut h = harness();
    h.reader.set(MODE, "Fusebox Buy");
    h.run("2025-10-02T10:15:20+03:00", "2025-10-02T10:20:00+03:00")
        .await;
    h.reader.clear(MODE);
    h.run("2025-10-02T10:20:00+03:00", "2025-10-02T10:40:00+03:00")
        .await;
    let ended = at("2025-10-02T10:15:00+03:00");
    assert_eq!(h.store.get(&ended).unwrap().unwrap().nordpool_price, None);

    // Published late, after the activity and its slot are over
    h.prices.hourly("2025-10-02T10:00:00+03:00", 0.07);
    let report = h.engine.tick(at("2025-10-02T10:40:00+03:00")).await;
    assert_eq!(report.action, SlotAction::Idle);
    assert_eq!(report.nordpool_prices_set, 1);
    assert_eq!(h.store.get(&ended).unwrap().unwrap().nordpool_price, Some(0.07));
}

#[tokio::test]
async fn test_day_ahead_price_skips_earlier_days() {
    let mut h = harness();
    h.reader.set(MODE, "Fusebox Buy");
    h.engine.tick(at("2025-10-02T23:45:20+03:00")).await;
    h.reader.clear(MODE);

    h.prices.hourly("2025-10-02T23:00:00+03:00", 0.07);
    let calls = h.prices.calls.load(Ordering::SeqCst);
    let report = h.engine.tick(at("2025-10-03T00:05:00+03:00")).await;
    assert_eq!(report.nordpool_prices_set, 0);
    assert_eq!(h.prices.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_no_price_lookup_without_slot() {
    let mut h = harness();
    h.prices.hourly("2025-10-02T10:00:00+03:00", 0.1);
    h.engine.tick(at("2025-10-02T10:15:20+03:00")).await;
    assert_eq!(h.prices.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_activation_price_matches_exact_start_and_is_write_once() {
    let store = MemoryStore::new();
    let ts = at("2025-10-02T10:15:00+03:00");
    store
        .insert(&Slot::open(ts, ts + Duration::seconds(20), Signal::Up, 0.5, -0.5, None))
        .unwrap();
    let other = at("2025-10-02T10:30:00+03:00");
    store
        .insert(&Slot::open(other, other + Duration::seconds(20), Signal::Up, 0.5, -0.5, None))
        .unwrap();

    let source = ActivationList(Mutex::new(vec![ActivationPrice {
        start: at("2025-10-02T07:15:00Z"),
        price_eur_mwh: 245.7,
    }]));
    let summary = enrich_activation_prices(&source, &store).await;
    assert_eq!(summary.pending, 2);
    assert_eq!(summary.updated, 1);

    source.0.lock()[0].price_eur_mwh = 999.0;
    let summary = enrich_activation_prices(&source, &store).await;
    assert_eq!(summary.updated, 0);
    assert_eq!(store.get(&ts).unwrap().unwrap().mffr_price, Some(245.7));
    assert_eq!(store.get(&other).unwrap().unwrap().mffr_price, None);
}

// ============= Settlement =============

#[tokio::test]
async fn test_settlement_sweep_is_idempotent() {
    let store = MemoryStore::new();
    let ts = at("2025-10-02T10:15:00+03:00");
    let mut slot = Slot::open(ts, ts + Duration::seconds(10), Signal::Down, 2.0, 2.5, None);
    slot.mffr_price = Some(150.0);
    slot.nordpool_price = Some(0.20);
    store.insert(&slot).unwrap();

    let config = SettlementConfig::default();
    let early = run_settlement_sweep(&store, &config, &at("2025-10-02T10:25:00+03:00"));
    assert_eq!(early.settled, 0);
    assert_eq!(early.skipped, 1);

    let summary = run_settlement_sweep(&store, &config, &at("2025-10-02T10:31:00+03:00"));
    assert_eq!(summary.settled, 1);
    let first = store.get(&ts).unwrap().unwrap().settlement.unwrap();
    assert!((first.net_total + 0.54).abs() < 1e-9);

    let again = run_settlement_sweep(&store, &config, &at("2025-10-02T10:45:00+03:00"));
    assert_eq!(again.examined, 0);
    assert_eq!(store.get(&ts).unwrap().unwrap().settlement.unwrap(), first);
}

#[tokio::test]
async fn test_settlement_sweep_resumes_after_contention() {
    let store = BusyStore::locked();
    for ts in ["2025-10-02T10:00:00+03:00", "2025-10-02T10:15:00+03:00"] {
        let ts = at(ts);
        let mut slot = Slot::open(ts, ts + Duration::seconds(10), Signal::Up, 1.0, -1.0, None);
        slot.mffr_price = Some(300.0);
        slot.nordpool_price = Some(0.10);
        store.inner.insert(&slot).unwrap();
    }
    let config = SettlementConfig::default();
    let now = at("2025-10-02T10:31:00+03:00");

    let blocked = run_settlement_sweep(&store, &config, &now);
    assert_eq!(blocked.settled, 0);
    assert_eq!(blocked.failed, 1);
    assert_eq!(blocked.examined, 1);
    assert_eq!(store.unsettled_slots().unwrap().len(), 2);

    store.set_busy(false);
    let summary = run_settlement_sweep(&store, &config, &now);
    assert_eq!(summary.settled, 2);
    let settled = store.get(&at("2025-10-02T10:15:00+03:00")).unwrap().unwrap();
    assert!((settled.settlement.unwrap().net_total - 0.26).abs() < 1e-9);
}

// ============= Baseline =============

#[tokio::test]
async fn test_baseline_is_published_and_snapshotted_into_slots() {
    let reader = Arc::new(ScriptedReader::default());
    let store = Arc::new(MemoryStore::new());
    let mut task = BaselineTask::new(MeteringConfig::default(), reader.clone(), store.clone());
    reader.set(BATTERY, "250");

    let mut now = at("2025-10-02T10:00:00+03:00");
    while now <= at("2025-10-02T10:15:00+03:00") {
        task.tick(now).await;
        now += Duration::seconds(10);
    }
    let baseline = store.latest_baseline().unwrap().unwrap();
    assert_eq!(baseline.computed_for_slot, at("2025-10-02T10:15:00+03:00"));
    assert!(baseline.baseline_w > 240.0 && baseline.baseline_w <= 250.0);

    let prices = Arc::new(FixedPrices::default());
    let mut engine = MeteringEngine::new(
        MeteringConfig::default(),
        reader.clone(),
        prices,
        store.clone(),
        store.clone(),
    );
    reader.set(MODE, "Fusebox Sell");
    engine.tick(at("2025-10-02T10:16:00+03:00")).await;
    let slot = store.get(&at("2025-10-02T10:15:00+03:00")).unwrap().unwrap();
    assert_eq!(slot.baseline_w, Some(baseline.baseline_w));

    store.reset_baseline().unwrap();
    assert!(store.latest_baseline().unwrap().is_none());
}

#[tokio::test]
async fn test_baseline_publish_failure_keeps_sampling() {
    let reader = Arc::new(ScriptedReader::default());
    let store = Arc::new(BusyStore::locked());
    let mut task = BaselineTask::new(MeteringConfig::default(), reader.clone(), store.clone());
    reader.set(BATTERY, "400");

    let mut now = at("2025-10-02T10:00:00+03:00");
    while now < at("2025-10-02T10:15:00+03:00") {
        task.tick(now).await;
        now += Duration::seconds(10);
    }
    let lost = task.tick(now).await;
    assert!(lost.is_some());
    assert!(store.latest_baseline().unwrap().is_none());

    // The next window is still sampled and published once the store recovers
    assert_eq!(task.estimator().window(), Some(at("2025-10-02T10:15:00+03:00")));
    store.set_busy(false);
    now += Duration::seconds(10);
    while now <= at("2025-10-02T10:30:00+03:00") {
        task.tick(now).await;
        now += Duration::seconds(10);
    }
    let published = store.latest_baseline().unwrap().unwrap();
    assert_eq!(published.computed_for_slot, at("2025-10-02T10:30:00+03:00"));
}

// ============= Contention =============

#[tokio::test]
async fn test_metering_drops_tick_when_store_is_busy() {
    let reader = Arc::new(ScriptedReader::default());
    let store = Arc::new(BusyStore::locked());
    let mut engine = MeteringEngine::new(
        MeteringConfig::default(),
        reader.clone(),
        Arc::new(FixedPrices::default()),
        store.clone(),
        store.clone(),
    );
    reader.set(MODE, "Fusebox Sell");
    reader.set(MFFR_POWER, "3600");

    let report = engine.tick(at("2025-10-02T10:15:20+03:00")).await;
    assert_eq!(report.action, SlotAction::Failed);
    assert!(store.inner.is_empty());

    store.set_busy(false);
    let report = engine.tick(at("2025-10-02T10:15:30+03:00")).await;
    assert_eq!(report.action, SlotAction::Created);
    let slot = store.get(&at("2025-10-02T10:15:00+03:00")).unwrap().unwrap();
    assert_eq!(slot.start, at("2025-10-02T10:15:30+03:00"));
}

#[test]
fn test_cleanup_skips_quietly_when_store_is_busy() {
    let store = BusyStore::locked();
    assert_eq!(
        cleanup_zero_duration_slots(&store, &at("2025-10-02T10:47:00+03:00")),
        None
    );
}
