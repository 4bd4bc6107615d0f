//! ==============================================================================
//! reporter.rs - periodic upload of the telemetry snapshot
//! ==============================================================================
//!
//! purpose:
//!     every interval (60s by default) read the latest telemetry, build a flat
//!     record and POST it as json. each tick is independent:
//!     - the snapshot is read when the request is built, never captured early
//!     - every request runs in its own task, overlapping requests are fine
//!     - outcomes are logged and nothing else; no retry, no backoff
//!
//! wire format:
//!
//!     POST <endpoint>
//!     Content-Type: application/json
//!
//!     {"device_id":"D1","latitude":12.9,"longitude":77.6,"battery_level":55,
//!      "accuracy_meters":50,"serial_number":"S1","email":"e@x.com","full_name":"A B"}
//!
//! relationships:
//!     - reads: aggregator.rs (watch channel)
//!     - used by: main.rs
//!
//! ==============================================================================

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::DeviceTelemetry;

/// reported with every fix; positions are not more precise than this
pub const ACCURACY_METERS: u32 = 50;

/// the upload body
#[derive(Debug, Serialize)]
pub struct LocationReport<'a> {
    pub device_id: &'a str,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_level: u8,
    pub accuracy_meters: u32,
    pub serial_number: &'a str,
    pub email: &'a str,
    pub full_name: &'a str,
}

impl<'a> LocationReport<'a> {
    pub fn from_snapshot(snapshot: &'a DeviceTelemetry) -> Self {
        Self {
            device_id: &snapshot.device_id,
            latitude: snapshot.latitude,
            longitude: snapshot.longitude,
            battery_level: snapshot.battery_level,
            accuracy_meters: ACCURACY_METERS,
            serial_number: &snapshot.serial_number,
            email: &snapshot.email,
            full_name: &snapshot.full_name,
        }
    }
}

// ==============================================================================
// uplink - the transport seam
// ==============================================================================

/// a response the endpoint accepted (2xx)
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint answered {status}")]
    Status { status: u16, body: String },
}

pub trait Uplink: Clone + Send + Sync + 'static {
    /// send one json body
    fn post_json(&self, body: Vec<u8>) -> impl Future<Output = Result<Delivery, UplinkError>> + Send;
}

#[derive(Clone)]
pub struct HttpUplink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUplink {
    /// no request timeout is set; the client default applies
    pub fn new(endpoint: impl Into<String>) -> Result<Self, UplinkError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl Uplink for HttpUplink {
    async fn post_json(&self, body: Vec<u8>) -> Result<Delivery, UplinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            Ok(Delivery {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(UplinkError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

// ==============================================================================
// reporter
// ==============================================================================

/// how one tick ended
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Delivered { tick: u64, status: u16 },
    Failed { tick: u64, reason: String },
}

impl TickOutcome {
    pub fn tick(&self) -> u64 {
        match self {
            TickOutcome::Delivered { tick, .. } | TickOutcome::Failed { tick, .. } => *tick,
        }
    }

    /// one line per tick: info when delivered, warn when not
    fn log(&self) {
        match self {
            TickOutcome::Delivered { .. } => info!(tick = self.tick(), "{}", self),
            TickOutcome::Failed { .. } => warn!(tick = self.tick(), "{}", self),
        }
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::Delivered { status, .. } => {
                write!(f, "location report delivered (status {})", status)
            }
            TickOutcome::Failed { reason, .. } => write!(f, "location report failed: {}", reason),
        }
    }
}

pub struct Reporter<U: Uplink> {
    uplink: U,
    telemetry: watch::Receiver<DeviceTelemetry>,
    period: Duration,
    show_telemetry: bool,
    ticks: u64,
}

impl<U: Uplink> Reporter<U> {
    pub fn new(uplink: U, telemetry: watch::Receiver<DeviceTelemetry>, period: Duration) -> Self {
        Self {
            uplink,
            telemetry,
            period,
            show_telemetry: false,
            ticks: 0,
        }
    }

    /// log every snapshot as it is sent
    pub fn show_telemetry(mut self, show: bool) -> Self {
        self.show_telemetry = show;
        self
    }

    /// snapshot, encode and send; returns the in-flight request
    ///
    /// returns None when the record could not be encoded.
    pub fn tick(&mut self) -> Option<JoinHandle<TickOutcome>> {
        self.ticks += 1;
        let tick = self.ticks;

        let snapshot = self.telemetry.borrow().clone();
        let report = LocationReport::from_snapshot(&snapshot);
        if self.show_telemetry {
            info!(
                tick,
                latitude = report.latitude,
                longitude = report.longitude,
                battery_level = report.battery_level,
                "reporting"
            );
        }

        let body = match serde_json::to_vec(&report) {
            Ok(body) => body,
            Err(e) => {
                error!(tick, "failed to encode location report: {}", e);
                return None;
            }
        };

        let uplink = self.uplink.clone();
        Some(tokio::spawn(async move {
            let outcome = match uplink.post_json(body).await {
                Ok(delivery) => {
                    debug!(tick, "response: {}", delivery.body);
                    TickOutcome::Delivered {
                        tick,
                        status: delivery.status,
                    }
                }
                Err(e) => {
                    if let UplinkError::Status { body, .. } = &e {
                        debug!(tick, "response: {}", body);
                    }
                    TickOutcome::Failed {
                        tick,
                        reason: e.to_string(),
                    }
                }
            };
            outcome.log();
            outcome
        }))
    }

    /// tick forever, first one period after start
    pub async fn run(mut self) {
        info!("reporting every {}s", self.period.as_secs());
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            // fire and forget: the request task outlives this tick
            let _ = self.tick();
        }
    }
}
