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

use chrono::{DateTime, Duration, FixedOffset};
use tracing::{debug, info, warn};

use crate::traits::SlotStore;

/// Zero-duration slots younger than this may still be extended
pub const CLEANUP_GRACE_MINUTES: i64 = 2;

/// Delete zero-duration slots whose last activity is past the grace period.
///
/// Returns the number of deleted rows, or `None` when the store was busy or
/// failed; the next run retries.
pub fn cleanup_zero_duration_slots(
    store: &dyn SlotStore,
    now: &DateTime<FixedOffset>,
) -> Option<usize> {
    let cutoff = *now - Duration::minutes(CLEANUP_GRACE_MINUTES);
    match store.delete_stale_zero_duration(&cutoff) {
        Ok(0) => {
            debug!("No stale zero-duration slots");
            Some(0)
        }
        Ok(deleted) => {
            info!(deleted, "Pruned zero-duration slots");
            Some(deleted)
        }
        Err(e) if e.is_contention() => {
            debug!("Cleanup skipped (storage busy)");
            None
        }
        Err(e) => {
            warn!("Scheduled cleanup failed: {e}");
            None
        }
    }
}
