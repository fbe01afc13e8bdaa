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

use serde::{Deserialize, Serialize};

/// Placeholder states HA reports while an integration has no value
const UNAVAILABLE_STATES: [&str; 2] = ["unknown", "unavailable"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaEntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub last_changed: String,
    #[serde(default)]
    pub last_updated: String,
}

impl HaEntityState {
    /// The state value, or `None` while HA reports it unknown/unavailable
    pub fn value(&self) -> Option<&str> {
        let state = self.state.as_str();
        (!UNAVAILABLE_STATES.contains(&state)).then_some(state)
    }
}

/// One entry of a Nord Pool `raw_today`/`raw_tomorrow` attribute
#[derive(Debug, Clone, Deserialize)]
pub struct NordpoolRawEntry {
    pub start: String,
    pub end: String,
    pub value: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: &str) -> HaEntityState {
        serde_json::from_value(json!({
            "entity_id": "sensor.test",
            "state": value,
            "attributes": {}
        }))
        .unwrap()
    }

    #[test]
    fn test_value_hides_unavailable_states() {
        assert_eq!(state("Fusebox Buy").value(), Some("Fusebox Buy"));
        assert_eq!(state("unknown").value(), None);
        assert_eq!(state("unavailable").value(), None);
    }
}
