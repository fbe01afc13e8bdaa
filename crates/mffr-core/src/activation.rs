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

use mffr_types::ActivationPrice;
use tracing::{debug, info, warn};

use crate::traits::{ActivationPriceSource, SlotStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    /// Slots still waiting for an activation price
    pub pending: usize,
    pub updated: usize,
}

/// Stamp reserve-activation prices on slots that have none yet.
///
/// Prices are matched by exact slot start instant. Already priced slots are
/// never touched.
pub async fn enrich_activation_prices(
    source: &dyn ActivationPriceSource,
    store: &dyn SlotStore,
) -> EnrichmentSummary {
    let mut summary = EnrichmentSummary::default();
    let pending = match store.slots_missing_activation_price() {
        Ok(slots) => slots,
        Err(e) => {
            warn!("Activation price enrichment skipped: {e}");
            return summary;
        }
    };
    summary.pending = pending.len();
    if pending.is_empty() {
        return summary;
    }

    let prices: Vec<ActivationPrice> = match source.fetch_activation_prices().await {
        Ok(prices) => prices,
        Err(e) => {
            warn!(source = source.name(), "Failed to fetch activation prices: {e:#}");
            return summary;
        }
    };

    for slot in &pending {
        let Some(entry) = prices.iter().find(|p| p.start == slot.timeslot) else {
            debug!(slot = %slot.key(), "No activation price published yet");
            continue;
        };
        match store.set_mffr_price_if_null(&slot.timeslot, entry.price_eur_mwh) {
            Ok(true) => {
                summary.updated += 1;
                info!(
                    slot = %slot.key(),
                    price_eur_mwh = entry.price_eur_mwh,
                    "Set activation price"
                );
            }
            Ok(false) => {}
            Err(e) if e.is_contention() => {
                warn!("Slot store busy, deferring activation prices: {e}");
                break;
            }
            Err(e) => warn!(slot = %slot.key(), "Failed to store activation price: {e}"),
        }
    }

    if summary.updated > 0 {
        info!(updated = summary.updated, "Activation prices updated");
    }
    summary
}
