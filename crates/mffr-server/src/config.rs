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

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use mffr_adapters::DEFAULT_PRICE_URL;
use mffr_types::{EntityConfig, MeteringConfig, ModeMapping, SettlementConfig};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub home_assistant: HomeAssistantSettings,
    #[serde(default)]
    pub metering: MeteringSettings,
    #[serde(default)]
    pub entities: EntityConfig,
    #[serde(default)]
    pub modes: ModeMapping,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub activation: ActivationSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomeAssistantSettings {
    #[serde(default = "default_ha_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Only ever taken from the environment
    #[serde(skip)]
    pub supervisor_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeteringSettings {
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// Periods of the slower maintenance tasks
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_task_interval_secs")]
    pub settlement_interval_secs: u64,
    #[serde(default = "default_task_interval_secs")]
    pub activation_interval_secs: u64,
    #[serde(default = "default_task_interval_secs")]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivationSettings {
    #[serde(default = "default_price_url")]
    pub price_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_ha_url() -> String {
    "http://homeassistant.local:8123".to_owned()
}

fn default_sample_interval_secs() -> u64 {
    10
}

fn default_timezone() -> String {
    "Europe/Tallinn".to_owned()
}

fn default_task_interval_secs() -> u64 {
    60
}

fn default_price_url() -> String {
    DEFAULT_PRICE_URL.to_owned()
}

fn default_db_path() -> String {
    "./data/mffr.db".to_owned()
}

impl Default for HomeAssistantSettings {
    fn default() -> Self {
        Self {
            base_url: default_ha_url(),
            token: None,
            supervisor_token: None,
        }
    }
}

impl Default for MeteringSettings {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            timezone: default_timezone(),
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            settlement_interval_secs: default_task_interval_secs(),
            activation_interval_secs: default_task_interval_secs(),
            cleanup_interval_secs: default_task_interval_secs(),
        }
    }
}

impl Default for ActivationSettings {
    fn default() -> Self {
        Self {
            price_url: default_price_url(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .with_context(|| format!("Invalid value for {key}: '{raw}'"))
}

impl AppConfig {
    /// File (or defaults when absent), then environment overrides, then validation
    pub fn load(path: &str) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(path: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {path}"))?;
            Self::parse(&content)?
        } else {
            info!(path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse config TOML")
    }

    /// Apply environment-style overrides. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        if let Some(url) = get("HA_BASE_URL").or_else(|| get("HA_URL")) {
            self.home_assistant.base_url = url;
        }
        if let Some(token) = get("HA_TOKEN") {
            self.home_assistant.token = Some(token);
        }
        if let Some(token) = get("SUPERVISOR_TOKEN") {
            self.home_assistant.supervisor_token = Some(token);
        }

        if let Some(entity) = get("SENSOR_MODE") {
            self.entities.mode = entity;
        }
        if let Some(entity) = get("SENSOR_GRID") {
            self.entities.grid_power = entity;
        }
        if let Some(entity) = get("SENSOR_MFFR_POWER") {
            // "none" falls back to grid power for slot energy
            self.entities.mffr_power = (!entity.eq_ignore_ascii_case("none")).then_some(entity);
        }
        if let Some(entity) = get("SENSOR_POWER") {
            self.entities.baseline_power = entity;
        }
        if let Some(entity) = get("SENSOR_NORDPOOL") {
            self.entities.nordpool = entity;
        }

        if let Some(raw) = get("FUSEBOX_SHARE") {
            self.settlement.platform_fee_share = parse_env("FUSEBOX_SHARE", &raw)?;
        }
        if let Some(raw) = get("GRID_IMPORT_MULT") {
            self.settlement.grid_import_multiplier = parse_env("GRID_IMPORT_MULT", &raw)?;
        }
        if let Some(raw) = get("MIN_ENERGY_KWH") {
            self.settlement.min_energy_kwh = parse_env("MIN_ENERGY_KWH", &raw)?;
        }

        if let Some(raw) = get("SAMPLE_INTERVAL_SECS") {
            self.metering.sample_interval_secs = parse_env("SAMPLE_INTERVAL_SECS", &raw)?;
        }
        if let Some(tz) = get("TZ") {
            self.metering.timezone = tz;
        }
        if let Some(path) = get("MFFR_DB_PATH") {
            self.database.path = path;
        }
        if let Some(url) = get("MFRR_PRICE_URL") {
            self.activation.price_url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.settlement.validate()?;
        self.metering_config()?.validate()?;
        if self.schedule.settlement_interval_secs == 0
            || self.schedule.activation_interval_secs == 0
            || self.schedule.cleanup_interval_secs == 0
        {
            bail!("schedule intervals must be positive");
        }
        if self.database.path.trim().is_empty() {
            bail!("database.path must be set");
        }
        if self.activation.price_url.trim().is_empty() {
            bail!("activation.price_url must be set");
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        Ok(MeteringConfig::parse_timezone(&self.metering.timezone)?)
    }

    pub fn metering_config(&self) -> Result<MeteringConfig> {
        Ok(MeteringConfig {
            sample_interval_secs: self.metering.sample_interval_secs,
            timezone: self.timezone()?,
            entities: self.entities.clone(),
            modes: self.modes.clone(),
        })
    }
}
