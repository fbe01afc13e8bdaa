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

use thiserror::Error;

/// Failure modes of the slot and baseline storage gateway
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend is locked or busy; the caller drops the work and retries next tick
    #[error("storage contention: {0}")]
    Contention(String),

    /// A row exists under a key an insert expected to be free
    #[error("slot {0} already exists")]
    Conflict(String),

    /// A stored row cannot be decoded into a slot
    #[error("malformed row {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
