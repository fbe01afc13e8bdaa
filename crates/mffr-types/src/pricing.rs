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

/// Day-ahead market price valid over `[start, end)` (EUR/kWh)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub value: f64,
}

impl PricePoint {
    pub fn contains(&self, at: &DateTime<FixedOffset>) -> bool {
        self.start <= *at && *at < self.end
    }
}

/// Reserve-activation clearing price for the slot starting at `start` (EUR/MWh)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationPrice {
    pub start: DateTime<FixedOffset>,
    pub price_eur_mwh: f64,
}

/// Find the price block whose interval contains `at`
pub fn find_price<'a>(
    points: &'a [PricePoint],
    at: &DateTime<FixedOffset>,
) -> Option<&'a PricePoint> {
    points.iter().find(|p| p.contains(at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn hourly(start: &str, end: &str, value: f64) -> PricePoint {
        PricePoint {
            start: at(start),
            end: at(end),
            value,
        }
    }

    #[test]
    fn test_find_price_uses_half_open_interval() {
        let points = vec![
            hourly("2025-10-02T10:00:00+03:00", "2025-10-02T11:00:00+03:00", 0.11),
            hourly("2025-10-02T11:00:00+03:00", "2025-10-02T12:00:00+03:00", 0.22),
        ];

        let price = find_price(&points, &at("2025-10-02T10:45:00+03:00")).unwrap();
        assert!((price.value - 0.11).abs() < f64::EPSILON);

        let price = find_price(&points, &at("2025-10-02T11:00:00+03:00")).unwrap();
        assert!((price.value - 0.22).abs() < f64::EPSILON);

        assert!(find_price(&points, &at("2025-10-02T12:00:00+03:00")).is_none());
    }

    #[test]
    fn test_find_price_compares_instants_across_offsets() {
        let points = vec![hourly(
            "2025-10-02T07:00:00Z",
            "2025-10-02T08:00:00Z",
            0.3,
        )];
        assert!(find_price(&points, &at("2025-10-02T10:15:00+03:00")).is_some());
    }
}
