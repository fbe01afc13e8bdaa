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

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mffr_adapters::{
    ActivationPriceClient, HaSignalReader, HomeAssistantClient, NordpoolPriceAdapter,
};
use mffr_core::{
    ActivationPriceSource, BaselineStore, BaselineTask, MeteringEngine, PriceSource,
    SignalReader, SlotStore,
};
use mffr_server::config::AppConfig;
use mffr_server::db::Database;
use mffr_server::scheduler;
use mffr_types::{SlotListing, SlotQuery};

/// The binary logs under its own crate name, next to the library crates
const DEFAULT_LOG_FILTER: &str =
    "mffr_meter=info,mffr_server=info,mffr_core=info,mffr_adapters=info";

#[derive(Debug, Parser)]
#[command(name = "mffr-meter")]
#[command(about = "Meter mFRR activations into 15-minute slots and settle them", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (missing file means defaults)
    #[arg(short, long, global = true, default_value = "mffr_config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run metering, baseline, pricing, settlement and cleanup tasks (default)
    Run,

    /// Print stored slots as JSON keyed by slot start, newest first
    Slots {
        /// Inclusive lower bound; naive times are read in the configured timezone
        #[arg(long)]
        from: Option<String>,

        /// Inclusive upper bound
        #[arg(long)]
        to: Option<String>,

        /// Row limit for unbounded listings
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    info!(path = %cli.config, "Loading configuration");
    let config = AppConfig::load(&cli.config)?;

    let db = Arc::new(Database::open(&config.database.path)?);
    info!(path = %config.database.path, "Database opened");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, db).await,
        Command::Slots { from, to, limit } => {
            let tz = config.timezone()?;
            let query = SlotQuery::parse(from.as_deref(), to.as_deref(), limit, tz);
            let listing = SlotListing(db.query(&query)?);
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(())
        }
    }
}

async fn run(config: AppConfig, db: Arc<Database>) -> Result<()> {
    let metering = config.metering_config()?;
    let tz = metering.timezone;

    let ha = &config.home_assistant;
    let client = Arc::new(HomeAssistantClient::from_config(
        &ha.base_url,
        ha.token.as_deref(),
        ha.supervisor_token.as_deref(),
    )?);
    if matches!(client.ping().await, Ok(true)) {
        info!(url = client.base_url(), "Home Assistant reachable");
    } else {
        warn!(
            url = client.base_url(),
            "Home Assistant not reachable yet, readings degrade to no data"
        );
    }

    let reader: Arc<dyn SignalReader> = Arc::new(HaSignalReader::new(Arc::clone(&client)));
    let prices: Arc<dyn PriceSource> = Arc::new(NordpoolPriceAdapter::new(
        Arc::clone(&client),
        metering.entities.nordpool.clone(),
        tz,
    ));
    let activation: Arc<dyn ActivationPriceSource> =
        Arc::new(ActivationPriceClient::new(config.activation.price_url.clone())?);
    let slots: Arc<dyn SlotStore> = db.clone();
    let baseline: Arc<dyn BaselineStore> = db;

    // A baseline from a previous run describes a window we did not observe
    match baseline.reset_baseline() {
        Ok(()) => info!("Baseline state reset"),
        Err(e) => warn!("Failed to reset baseline state: {e}"),
    }

    let sample = Duration::from_secs(metering.sample_interval_secs);
    let schedule = &config.schedule;
    let handles = vec![
        scheduler::spawn_baseline(
            BaselineTask::new(metering.clone(), Arc::clone(&reader), Arc::clone(&baseline)),
            tz,
            sample,
        ),
        scheduler::spawn_metering(
            MeteringEngine::new(metering, reader, prices, Arc::clone(&slots), baseline),
            sample,
        ),
        scheduler::spawn_settlement(
            Arc::clone(&slots),
            config.settlement,
            tz,
            Duration::from_secs(schedule.settlement_interval_secs),
        ),
        scheduler::spawn_activation_prices(
            activation,
            Arc::clone(&slots),
            Duration::from_secs(schedule.activation_interval_secs),
        ),
        scheduler::spawn_cleanup(
            slots,
            tz,
            Duration::from_secs(schedule.cleanup_interval_secs),
        ),
    ];
    info!(
        timezone = %tz,
        sample_secs = sample.as_secs(),
        "mFRR metering started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
