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

use crate::ha::errors::{HaError, HaResult};
use crate::ha::types::HaEntityState;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Base URL of the HA core API when running as a Supervisor add-on
pub const SUPERVISOR_URL: &str = "http://supervisor/core";

/// Upper bound for a single sensor read; a slow read only costs one tick
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Home Assistant REST API client
#[derive(Clone)]
pub struct HomeAssistantClient {
    base_url: String,
    token: String,
    client: Client,
}

impl std::fmt::Debug for HomeAssistantClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistantClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HomeAssistantClient {
    /// Create a new HA client. Requests are attempted once and time out after 5 s;
    /// a failed read is retried by the next tick, never inline.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> HaResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| HaError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        let base_url: String = base_url.into();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.into(),
            client,
        })
    }

    /// Create HA client for the Supervisor API (standard for HA add-ons)
    pub fn from_supervisor(supervisor_token: impl Into<String>) -> HaResult<Self> {
        info!("Initializing HA client using Supervisor API");
        Self::new(SUPERVISOR_URL, supervisor_token)
    }

    /// Create HA client from configuration values.
    /// A Supervisor token wins over a direct URL/token pair.
    pub fn from_config(
        base_url: &str,
        token: Option<&str>,
        supervisor_token: Option<&str>,
    ) -> HaResult<Self> {
        if let Some(supervisor_token) = supervisor_token.filter(|t| !t.is_empty()) {
            return Self::from_supervisor(supervisor_token);
        }

        let token = token.filter(|t| !t.is_empty()).ok_or_else(|| {
            HaError::ConfigError(
                "HA token not found in config or HA_TOKEN environment variable".to_owned(),
            )
        })?;

        info!("Initializing HA client from configuration: {}", base_url);
        Self::new(base_url, token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the state of a specific entity
    pub async fn get_state(&self, entity_id: &str) -> HaResult<HaEntityState> {
        let url = format!(
            "{}/api/states/{}",
            self.base_url,
            urlencoding::encode(entity_id)
        );
        trace!("Getting state for entity: {}", entity_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .inspect_err(|e| debug!(entity = entity_id, "HA request failed: {e}"))?;

        match response.status() {
            StatusCode::OK => {
                let state = response.json::<HaEntityState>().await?;
                debug!(entity = entity_id, state = %state.state, "HA state");
                Ok(state)
            }
            StatusCode::NOT_FOUND => {
                warn!("Entity not found: {}", entity_id);
                Err(HaError::EntityNotFound(entity_id.to_owned()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("Authentication failed for entity: {}", entity_id);
                Err(HaError::AuthenticationFailed)
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                warn!("Failed to fetch {}: status {}", entity_id, status);
                Err(HaError::ApiError {
                    status: status.as_u16(),
                    message: error_text,
                })
            }
        }
    }

    /// Health check - ping HA API
    pub async fn ping(&self) -> HaResult<bool> {
        let url = format!("{}/api/", self.base_url);
        debug!("Performing health check");

        match self.client.get(&url).bearer_auth(&self.token).send().await {
            Ok(response) => {
                let is_ok = response.status().is_success();
                if !is_ok {
                    warn!("Health check failed: status {}", response.status());
                }
                Ok(is_ok)
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
                Ok(false)
            }
        }
    }
}
