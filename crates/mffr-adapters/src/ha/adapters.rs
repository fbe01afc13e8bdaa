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

use crate::ha::client::HomeAssistantClient;
use crate::ha::types::{HaEntityState, NordpoolRawEntry};
use crate::time::parse_instant;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use mffr_core::{PriceSource, SignalReader};
use mffr_types::PricePoint;
use std::sync::Arc;
use tracing::{debug, warn};

// ============= Signal Reader =============

/// Reads sensor and selector states from Home Assistant
#[derive(Debug, Clone)]
pub struct HaSignalReader {
    client: Arc<HomeAssistantClient>,
}

impl HaSignalReader {
    pub fn new(client: Arc<HomeAssistantClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SignalReader for HaSignalReader {
    async fn read(&self, signal_id: &str) -> Result<Option<String>> {
        let state = self
            .client
            .get_state(signal_id)
            .await
            .with_context(|| format!("Failed to read entity: {signal_id}"))?;
        Ok(state.value().map(str::to_owned))
    }

    fn name(&self) -> &str {
        "HomeAssistant"
    }
}

// ============= Day-ahead Prices =============

/// Day-ahead price series from a Nord Pool integration sensor.
///
/// The sensor exposes `raw_today` and `raw_tomorrow` attributes with
/// `{start, end, value}` entries in EUR/kWh.
#[derive(Debug, Clone)]
pub struct NordpoolPriceAdapter {
    client: Arc<HomeAssistantClient>,
    entity_id: String,
    timezone: Tz,
}

impl NordpoolPriceAdapter {
    pub fn new(
        client: Arc<HomeAssistantClient>,
        entity_id: impl Into<String>,
        timezone: Tz,
    ) -> Self {
        Self {
            client,
            entity_id: entity_id.into(),
            timezone,
        }
    }
}

/// Extract the price blocks starting on `day` (in `timezone`) from a Nord Pool sensor state
pub fn parse_nordpool_series(
    state: &HaEntityState,
    day: NaiveDate,
    timezone: Tz,
) -> Vec<PricePoint> {
    let mut points = Vec::new();
    for attribute in ["raw_today", "raw_tomorrow"] {
        let Some(entries) = state.attributes.get(attribute).and_then(|v| v.as_array()) else {
            continue;
        };

        for raw in entries {
            let entry: NordpoolRawEntry = match serde_json::from_value(raw.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(attribute, "Skipping malformed price entry: {e}");
                    continue;
                }
            };
            let (Some(start), Some(end), Some(value)) = (
                parse_instant(&entry.start),
                parse_instant(&entry.end),
                entry.value,
            ) else {
                debug!(attribute, start = %entry.start, "Skipping incomplete price entry");
                continue;
            };
            if start.with_timezone(&timezone).date_naive() == day {
                points.push(PricePoint { start, end, value });
            }
        }
    }

    points.sort_by_key(|p| p.start);
    points.dedup_by_key(|p| p.start);
    points
}

#[async_trait]
impl PriceSource for NordpoolPriceAdapter {
    async fn fetch_price_series(&self, day: NaiveDate) -> Result<Vec<PricePoint>> {
        let state = self
            .client
            .get_state(&self.entity_id)
            .await
            .with_context(|| format!("Failed to read price entity: {}", self.entity_id))?;

        let points = parse_nordpool_series(&state, day, self.timezone);
        if points.is_empty() {
            warn!(entity = %self.entity_id, %day, "No day-ahead prices published for day");
        } else {
            debug!(
                entity = %self.entity_id,
                %day,
                blocks = points.len(),
                "Parsed day-ahead prices"
            );
        }
        Ok(points)
    }

    fn name(&self) -> &str {
        "NordPool"
    }
}
