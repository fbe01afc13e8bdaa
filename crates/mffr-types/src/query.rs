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

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::slot::Slot;

pub const DEFAULT_LIMIT: usize = 1000;
pub const MAX_LIMIT: usize = 50_000;

/// Read filter over stored slots.
///
/// Both bounds are inclusive. The row limit only applies when neither bound is
/// given; a ranged query returns every matching slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotQuery {
    pub from: Option<DateTime<FixedOffset>>,
    pub to: Option<DateTime<FixedOffset>>,
    limit: usize,
}

impl Default for SlotQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl SlotQuery {
    pub fn new(
        from: Option<DateTime<FixedOffset>>,
        to: Option<DateTime<FixedOffset>>,
        limit: Option<usize>,
    ) -> Self {
        Self {
            from,
            to,
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    /// Build a query from loosely formatted bounds (`Z` suffix, space separator,
    /// naive local time). Unparsable bounds are ignored.
    pub fn parse(from: Option<&str>, to: Option<&str>, limit: Option<usize>, tz: Tz) -> Self {
        Self::new(
            from.and_then(|s| parse_bound(s, tz)),
            to.and_then(|s| parse_bound(s, tz)),
            limit,
        )
    }

    pub fn is_ranged(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// Maximum number of rows to return, `None` for an unbounded ranged query
    pub fn row_limit(&self) -> Option<usize> {
        if self.is_ranged() {
            None
        } else {
            Some(self.limit)
        }
    }

    pub fn matches(&self, timeslot: &DateTime<FixedOffset>) -> bool {
        self.from.is_none_or(|from| *timeslot >= from) && self.to.is_none_or(|to| *timeslot <= to)
    }
}

/// Normalize a user-supplied timestamp into the configured timezone
pub fn parse_bound(raw: &str, tz: Tz) -> Option<DateTime<FixedOffset>> {
    let normalized = raw.trim().replace(' ', "T").replace('Z', "+00:00");
    if normalized.is_empty() {
        return None;
    }

    let parsed = DateTime::parse_from_rfc3339(&normalized)
        .or_else(|_| DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%z"))
        .or_else(|_| DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M%z"));
    if let Ok(dt) = parsed {
        return Some(dt.with_timezone(&tz).fixed_offset());
    }

    let naive = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

/// Slots keyed by their canonical timeslot, in the order they were read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotListing(pub Vec<Slot>);

impl SlotListing {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Slot> {
        self.0.iter().find(|slot| slot.key() == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.0.iter().map(Slot::key)
    }
}

impl Serialize for SlotListing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for slot in &self.0 {
            map.serialize_entry(&slot.key(), slot)?;
        }
        map.end()
    }
}
