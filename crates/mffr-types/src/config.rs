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

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signal::Signal;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ============= Settlement =============

/// Commercial parameters for slot settlement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Share of activation income kept by the aggregator platform
    #[serde(default = "default_platform_fee_share")]
    pub platform_fee_share: f64,
    /// Multiplier applied to the market price for imported energy (tariffs, VAT)
    #[serde(default = "default_grid_import_multiplier")]
    pub grid_import_multiplier: f64,
    /// Slots with less directional energy than this are never settled (kWh)
    #[serde(default = "default_min_energy_kwh")]
    pub min_energy_kwh: f64,
}

fn default_platform_fee_share() -> f64 {
    0.20
}

fn default_grid_import_multiplier() -> f64 {
    1.24
}

fn default_min_energy_kwh() -> f64 {
    0.00001
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            platform_fee_share: default_platform_fee_share(),
            grid_import_multiplier: default_grid_import_multiplier(),
            min_energy_kwh: default_min_energy_kwh(),
        }
    }
}

impl SettlementConfig {
    /// Share of activation income that stays with the plant owner
    pub fn your_share(&self) -> f64 {
        1.0 - self.platform_fee_share
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.platform_fee_share) {
            return Err(ConfigError::Invalid {
                field: "platform_fee_share",
                reason: format!("{} is outside [0, 1)", self.platform_fee_share),
            });
        }
        if self.grid_import_multiplier <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "grid_import_multiplier",
                reason: format!("{} must be positive", self.grid_import_multiplier),
            });
        }
        if self.min_energy_kwh < 0.0 {
            return Err(ConfigError::Invalid {
                field: "min_energy_kwh",
                reason: format!("{} must not be negative", self.min_energy_kwh),
            });
        }
        Ok(())
    }
}

// ============= Metering =============

/// Battery mode names that map to a directional signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeMapping {
    /// Modes that make the plant absorb energy (DOWN)
    #[serde(default = "default_buy_modes")]
    pub buy_modes: Vec<String>,
    /// Modes that make the plant deliver energy (UP)
    #[serde(default = "default_sell_modes")]
    pub sell_modes: Vec<String>,
}

fn default_buy_modes() -> Vec<String> {
    vec!["Fusebox Buy".to_owned(), "Kratt Buy".to_owned()]
}

fn default_sell_modes() -> Vec<String> {
    vec!["Fusebox Sell".to_owned(), "Kratt Sell".to_owned()]
}

impl Default for ModeMapping {
    fn default() -> Self {
        Self {
            buy_modes: default_buy_modes(),
            sell_modes: default_sell_modes(),
        }
    }
}

impl ModeMapping {
    /// Resolve a raw mode reading. Unknown modes and missing readings mean no signal.
    pub fn resolve(&self, mode: Option<&str>) -> Option<Signal> {
        let mode = mode?.trim();
        if mode.is_empty() {
            return None;
        }
        let matches = |candidates: &[String]| {
            candidates
                .iter()
                .any(|candidate| candidate.trim().eq_ignore_ascii_case(mode))
        };

        if matches(&self.buy_modes) {
            Some(Signal::Down)
        } else if matches(&self.sell_modes) {
            Some(Signal::Up)
        } else {
            None
        }
    }
}

/// Home Assistant entities the engine reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Battery mode selector carrying the directional command
    #[serde(default = "default_mode_entity")]
    pub mode: String,
    /// Signed grid power (W, +import / -export)
    #[serde(default = "default_grid_power_entity")]
    pub grid_power: String,
    /// Baseline-corrected directional power (W), preferred for slot energy
    #[serde(default = "default_mffr_power_entity")]
    pub mffr_power: Option<String>,
    /// Battery power sampled for the idle baseline (W)
    #[serde(default = "default_baseline_power_entity")]
    pub baseline_power: String,
    /// Day-ahead price sensor with `raw_today`/`raw_tomorrow` attributes
    #[serde(default = "default_nordpool_entity")]
    pub nordpool: String,
}

fn default_mode_entity() -> String {
    "input_select.battery_mode_selector".to_owned()
}

fn default_grid_power_entity() -> String {
    "sensor.ss_grid_power".to_owned()
}

fn default_mffr_power_entity() -> Option<String> {
    "sensor.mffr_power".to_owned().into()
}

fn default_baseline_power_entity() -> String {
    "sensor.ss_battery_power".to_owned()
}

fn default_nordpool_entity() -> String {
    "sensor.nordpool".to_owned()
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            mode: default_mode_entity(),
            grid_power: default_grid_power_entity(),
            mffr_power: default_mffr_power_entity(),
            baseline_power: default_baseline_power_entity(),
            nordpool: default_nordpool_entity(),
        }
    }
}

/// Sampling parameters shared by the metering and baseline tasks
#[derive(Debug, Clone, PartialEq)]
pub struct MeteringConfig {
    /// Nominal tick cadence; also the hold time used for per-tick energy
    pub sample_interval_secs: u64,
    /// Timezone slot keys and day-ahead days are expressed in
    pub timezone: Tz,
    pub entities: EntityConfig,
    pub modes: ModeMapping,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 10,
            timezone: chrono_tz::Europe::Tallinn,
            entities: EntityConfig::default(),
            modes: ModeMapping::default(),
        }
    }
}

impl MeteringConfig {
    pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
        name.trim()
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(name.to_owned()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sample_interval_secs",
                reason: "must be positive".to_owned(),
            });
        }
        if self.entities.mode.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "entities.mode",
                reason: "mode entity must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_resolution_is_case_insensitive() {
        let modes = ModeMapping::default();
        assert_eq!(modes.resolve(Some("fusebox buy")), Some(Signal::Down));
        assert_eq!(modes.resolve(Some("KRATT SELL")), Some(Signal::Up));
        assert_eq!(modes.resolve(Some(" Kratt Buy ")), Some(Signal::Down));
    }

    #[test]
    fn test_unknown_or_missing_mode_is_no_signal() {
        let modes = ModeMapping::default();
        assert_eq!(modes.resolve(Some("Self Use")), None);
        assert_eq!(modes.resolve(Some("")), None);
        assert_eq!(modes.resolve(None), None);
    }

    #[test]
    fn test_your_share() {
        let cfg = SettlementConfig::default();
        assert!((cfg.your_share() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_settlement_validation() {
        assert!(SettlementConfig::default().validate().is_ok());

        let cfg = SettlementConfig {
            platform_fee_share: 1.0,
            ..SettlementConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "platform_fee_share",
                ..
            })
        ));

        let cfg = SettlementConfig {
            grid_import_multiplier: 0.0,
            ..SettlementConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(
            MeteringConfig::parse_timezone("Europe/Tallinn"),
            Ok(chrono_tz::Europe::Tallinn)
        );
        assert_eq!(
            MeteringConfig::parse_timezone("Mars/Olympus"),
            Err(ConfigError::UnknownTimezone("Mars/Olympus".to_owned()))
        );
    }

    #[test]
    fn test_metering_validation_rejects_zero_interval() {
        let cfg = MeteringConfig {
            sample_interval_secs: 0,
            ..MeteringConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(MeteringConfig::default().validate().is_ok());
    }
}
