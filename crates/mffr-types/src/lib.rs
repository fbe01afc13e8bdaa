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

pub mod baseline;
pub mod config;
pub mod pricing;
pub mod query;
pub mod signal;
pub mod slot;

// Re-export common types for convenience
pub use baseline::BaselineState;
pub use config::{ConfigError, EntityConfig, MeteringConfig, ModeMapping, SettlementConfig};
pub use pricing::{ActivationPrice, PricePoint, find_price};
pub use query::{SlotListing, SlotQuery};
pub use signal::{ParseSignalError, Signal};
pub use slot::{SLOT_LENGTH_MINUTES, Settlement, Slot, slot_end, slot_key, slot_start};
