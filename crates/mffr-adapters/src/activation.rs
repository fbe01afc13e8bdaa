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

//! Reserve-activation price list over HTTP.

use crate::ha::errors::{HaError, HaResult};
use crate::time::parse_instant;
use anyhow::Result;
use async_trait::async_trait;
use mffr_core::ActivationPriceSource;
use mffr_types::ActivationPrice;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_PRICE_URL: &str = "https://tihend.energy/api/v1/frr";

#[derive(Debug, Deserialize)]
struct PriceListResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PriceListEntry {
    start: String,
    mfrr_price: Option<f64>,
}

/// Client for the public mFRR activation price list
#[derive(Debug, Clone)]
pub struct ActivationPriceClient {
    client: Client,
    url: String,
}

impl ActivationPriceClient {
    pub fn new(url: impl Into<String>) -> HaResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HaError::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn fetch(&self) -> HaResult<Vec<ActivationPrice>> {
        let response = self.client.get(&self.url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: PriceListResponse = response.json().await?;
                Ok(parse_price_list(body.data))
            }
            status => Err(HaError::ApiError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// Decode price list rows, dropping entries without a parsable start or price
fn parse_price_list(rows: Vec<serde_json::Value>) -> Vec<ActivationPrice> {
    let total = rows.len();
    let prices: Vec<ActivationPrice> = rows
        .into_iter()
        .filter_map(|row| {
            let entry: PriceListEntry = serde_json::from_value(row).ok()?;
            let start = parse_instant(&entry.start)?;
            Some(ActivationPrice {
                start,
                price_eur_mwh: entry.mfrr_price?,
            })
        })
        .collect();

    if prices.len() < total {
        debug!(
            skipped = total - prices.len(),
            "Ignored activation price rows without start or price"
        );
    }
    prices
}

#[async_trait]
impl ActivationPriceSource for ActivationPriceClient {
    async fn fetch_activation_prices(&self) -> Result<Vec<ActivationPrice>> {
        match self.fetch().await {
            Ok(prices) => Ok(prices),
            Err(e) => {
                warn!(url = %self.url, "Activation price fetch failed: {e}");
                Err(e.into())
            }
        }
    }

    fn name(&self) -> &str {
        "ActivationPriceList"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use mockito::Server;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_parses_compact_offsets_and_skips_bad_rows() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/frr")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "data": [
                        {"start": "2025-10-02T10:15:00+0300", "mfrr_price": 245.7},
                        {"start": "2025-10-02T10:30:00+0300", "mfrr_price": null},
                        {"start": "not a time", "mfrr_price": 12.0},
                        {"mfrr_price": 1.0}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ActivationPriceClient::new(format!("{}/api/v1/frr", server.url())).unwrap();
        let prices = client.fetch_activation_prices().await.unwrap();

        assert_eq!(prices.len(), 1);
        assert_eq!(
            prices[0].start,
            DateTime::parse_from_rfc3339("2025-10-02T10:15:00+03:00").unwrap()
        );
        assert!((prices[0].price_eur_mwh - 245.7).abs() < f64::EPSILON);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/frr")
            .with_status(503)
            .create_async()
            .await;

        let client = ActivationPriceClient::new(format!("{}/api/v1/frr", server.url())).unwrap();
        let err = client.fetch().await.unwrap_err();
        assert!(matches!(err, HaError::ApiError { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_missing_data_key_is_empty_list() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/frr")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = ActivationPriceClient::new(format!("{}/api/v1/frr", server.url())).unwrap();
        assert!(client.fetch().await.unwrap().is_empty());
    }
}
