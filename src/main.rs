//! ==============================================================================
//! main.rs - device beacon entry point
//! ==============================================================================
//!
//! purpose:
//!     a device agent that keeps an up-to-date picture of where the device is,
//!     how much battery it has and who it is assigned to, and reports that
//!     picture to a remote endpoint once a minute.
//!
//! responsibilities:
//!     - load agent.toml and set up logging
//!     - read the device id and the persisted terms flag
//!     - start the telemetry sources and the aggregator
//!     - run the periodic reporter
//!     - serve the local status dashboard
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                     agent (this file)                        │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ gpsd        │  │ battery     │  │ managed config      │  │
//!     │  │ (stream)    │  │ (sysfs)     │  │ (notify + recheck)  │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         └────────────────┼────────────────────┘             │
//!     │                    ┌─────┴─────┐                            │
//!     │                    │aggregator │ <- aggregator.rs           │
//!     │                    └─────┬─────┘                            │
//!     │              watch<DeviceTelemetry>                          │
//!     │         ┌────────────────┴────────────────┐                 │
//!     │   ┌─────┴─────┐                    ┌──────┴──────┐          │
//!     │   │ reporter  │ (60s, POST json)   │ dashboard   │ (:3000)  │
//!     │   └───────────┘                    └─────────────┘          │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod aggregator;
mod config;
mod consent;
mod dashboard;
mod device;
mod domain;
mod managed;
mod reporter;
mod sources;

use anyhow::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt::writer::MakeWriterExt, layer::SubscriberExt, util::SubscriberInitExt};

use aggregator::Aggregator;
use config::AgentConfig;
use consent::ConsentStore;
use reporter::{HttpUplink, Reporter};
use sources::Sources;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration, then logging at the configured level
    let explicit = std::env::args().nth(1).map(PathBuf::from);
    let (config, origin) = AgentConfig::load_or_default(explicit);
    setup_tracing(&config.logging.level);

    info!("Device Beacon {}", env!("CARGO_PKG_VERSION"));
    config.log_summary(&origin);

    // step 2: identity and the persisted terms flag
    let device_id = device::read_device_id(&config.device.id_paths);
    info!(device_id = %device_id, "device identified");

    let consent = ConsentStore::load(&config.consent.path);
    if !consent.accepted() {
        info!("terms not yet accepted, notice shown on the dashboard");
    }

    // step 3: aggregator and sources
    let mut aggregator = Aggregator::new(device_id);
    aggregator.initialize(Sources::from_config(&config));
    for subscription in aggregator.subscriptions() {
        info!(
            source = subscription.name(),
            active = subscription.is_active(),
            "source subscribed"
        );
    }
    info!(sync = aggregator.state().is_sync_on, "telemetry initialized");
    let telemetry = aggregator.subscribe();
    let aggregator_task = tokio::spawn(aggregator.run());

    // step 4: the dashboard in background
    if config.dashboard.enabled {
        let state = dashboard::DashboardState {
            telemetry: telemetry.clone(),
            consent: Arc::new(RwLock::new(consent)),
            title: Arc::from(config.dashboard.title.as_str()),
        };
        let bind = config.dashboard.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::run_server(&bind, state).await {
                error!("dashboard error: {:#}", e);
            }
        });
    }

    // step 5: periodic reporting
    let uplink = HttpUplink::new(config.reporting.endpoint.clone())?;
    let period = Duration::from_secs(config.reporting.interval_seconds.max(1));
    let reporter = Reporter::new(uplink, telemetry, period).show_telemetry(config.logging.show_telemetry);
    let reporter_task = tokio::spawn(reporter.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        res = aggregator_task => warn!("aggregator stopped: {:?}", res),
        res = reporter_task => warn!("reporter stopped: {:?}", res),
    }

    Ok(())
}

fn setup_tracing(level: &str) {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::Layer::new()
                .with_writer(std::io::stdout.with_max_level(level))
                .compact(),
        )
        .init();
}
