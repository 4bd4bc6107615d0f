//! ==============================================================================
//! sources.rs - telemetry sources and their subscriptions
//! ==============================================================================
//!
//! purpose:
//!     each signal the aggregator tracks comes from a source behind a trait:
//!     - LocationSource       gpsd, a fixed position, or disabled
//!     - BatterySource        linux power-supply sysfs
//!     - ConfigurationSource  the managed configuration document
//!
//!     subscribing hands the source a sender into the aggregator's event
//!     channel and returns a Subscription. dropping or cancelling the
//!     subscription stops the source's task.
//!
//! design:
//!     sources never touch telemetry state. they only send TelemetryEvents;
//!     the aggregator task is the single consumer, so every mutation is
//!     ordered by arrival on that channel.
//!
//! relationships:
//!     - used by: aggregator.rs (initialize subscribes to every source)
//!     - used by: main.rs (Sources::from_config)
//!     - uses: device.rs (battery readings), managed.rs (document parsing)
//!
//! ==============================================================================

use notify::{EventKind, RecursiveMode, Watcher};
use serde::Deserialize;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, LocationProvider};
use crate::device::{self, BATTERY_UNAVAILABLE};
use crate::domain::{Fix, TelemetryEvent};
use crate::managed::{ManagedConfig, ManagedConfigError};

/// sending half of the aggregator's event channel
pub type EventSender = mpsc::UnboundedSender<TelemetryEvent>;

// ==============================================================================
// subscription handle
// ==============================================================================

/// a running source, stopped on cancel() or drop
pub struct Subscription {
    name: &'static str,
    task: Option<AbortHandle>,
}

impl Subscription {
    /// run `future` as the body of this subscription
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(future).abort_handle();
        Self {
            name,
            task: Some(task),
        }
    }

    /// a subscription with nothing left running
    pub fn inactive(name: &'static str) -> Self {
        Self { name, task: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(source = self.name, "subscription cancelled");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ==============================================================================
// source traits
// ==============================================================================

pub trait LocationSource: Send {
    /// ask for access to positioning; false means updates will never arrive
    fn request_permission(&mut self) -> bool {
        true
    }

    /// begin continuous updates
    fn start_updates(&self, events: EventSender) -> Subscription;
}

pub trait BatterySource: Send {
    /// enable monitoring and deliver BatteryLevelChanged on every change
    fn subscribe(&self, events: EventSender) -> Subscription;
}

pub trait ConfigurationSource: Send {
    /// read the configuration as it is right now
    fn current(&self) -> Result<ManagedConfig, ManagedConfigError>;

    /// deliver ConfigurationChanged whenever the configuration may have changed
    fn subscribe(&self, events: EventSender) -> Subscription;
}

/// the full set of sources the aggregator starts with
pub struct Sources {
    pub location: Box<dyn LocationSource>,
    pub battery: Box<dyn BatterySource>,
    pub configuration: Box<dyn ConfigurationSource>,
}

impl Sources {
    pub fn from_config(config: &AgentConfig) -> Self {
        let location: Box<dyn LocationSource> = match config.location.provider {
            LocationProvider::Gpsd => Box::new(GpsdLocation {
                address: config.location.gpsd_address.clone(),
                reconnect: Duration::from_secs(config.location.gpsd_reconnect_seconds.max(1)),
            }),
            LocationProvider::Fixed => Box::new(FixedLocation {
                fix: Fix {
                    latitude: config.location.latitude,
                    longitude: config.location.longitude,
                },
            }),
            LocationProvider::Disabled => Box::new(DisabledLocation),
        };

        Self {
            location,
            battery: Box::new(SysfsBattery {
                root: config.battery.power_supply_path.clone(),
                poll: Duration::from_secs(config.battery.poll_seconds.max(1)),
            }),
            configuration: Box::new(ManagedConfigWatcher {
                path: config.managed.path.clone(),
                namespace_key: config.managed.namespace_key.clone(),
                recheck: Duration::from_secs(config.managed.recheck_seconds.max(1)),
            }),
        }
    }
}

// ==============================================================================
// location: disabled / fixed
// ==============================================================================

/// positioning not available; coordinates stay at their defaults
pub struct DisabledLocation;

impl LocationSource for DisabledLocation {
    fn request_permission(&mut self) -> bool {
        false
    }

    fn start_updates(&self, _events: EventSender) -> Subscription {
        Subscription::inactive("location")
    }
}

/// a stationary device with a configured position
pub struct FixedLocation {
    pub fix: Fix,
}

impl LocationSource for FixedLocation {
    fn start_updates(&self, events: EventSender) -> Subscription {
        let _ = events.send(TelemetryEvent::LocationUpdate(vec![self.fix]));
        Subscription::inactive("location")
    }
}

// ==============================================================================
// location: gpsd
// ==============================================================================
//
// protocol: line-delimited json over tcp (default port 2947).
//     -> ?WATCH={"enable":true,"json":true}
//     <- {"class":"VERSION",...}
//     <- {"class":"TPV","mode":3,"lat":52.37,"lon":4.89,...}
//
// every TPV fix that arrives in one read becomes one LocationUpdate batch.
// a refused connect, a read error or gpsd hanging up is one LocationError,
// then the source reconnects after `reconnect` until cancelled.

const GPSD_WATCH: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

/// a partial line longer than this is garbage, not a report
const GPSD_MAX_PENDING: usize = 64 * 1024;

pub struct GpsdLocation {
    pub address: String,
    pub reconnect: Duration,
}

impl LocationSource for GpsdLocation {
    fn start_updates(&self, events: EventSender) -> Subscription {
        let address = self.address.clone();
        let reconnect = self.reconnect;
        Subscription::spawn("location", async move {
            loop {
                match stream_gpsd(&address, &events).await {
                    // aggregator is gone
                    Ok(()) => break,
                    Err(message) => {
                        if events.send(TelemetryEvent::LocationError(message)).is_err() {
                            break;
                        }
                    }
                }
                tokio::time::sleep(reconnect).await;
                debug!(address = %address, "reconnecting to gpsd");
            }
        })
    }
}

async fn stream_gpsd(address: &str, events: &EventSender) -> Result<(), String> {
    let mut stream = TcpStream::connect(address)
        .await
        .map_err(|e| format!("gpsd unavailable at {}: {}", address, e))?;
    stream
        .write_all(GPSD_WATCH)
        .await
        .map_err(|e| format!("gpsd watch request failed: {}", e))?;
    info!(address, "streaming positions from gpsd");

    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| format!("gpsd read failed: {}", e))?;
        if n == 0 {
            return Err("gpsd closed the connection".to_string());
        }
        pending.extend_from_slice(&buf[..n]);

        // decode whole lines only, a utf-8 sequence may straddle two reads
        let lines = drain_lines(&mut pending);
        if pending.len() > GPSD_MAX_PENDING {
            debug!(bytes = pending.len(), "discarding oversized gpsd line");
            pending.clear();
        }
        let batch = parse_batch(&String::from_utf8_lossy(&lines));
        for message in batch.errors {
            if events.send(TelemetryEvent::LocationError(message)).is_err() {
                return Ok(());
            }
        }
        if !batch.fixes.is_empty()
            && events
                .send(TelemetryEvent::LocationUpdate(batch.fixes))
                .is_err()
        {
            return Ok(());
        }
    }
}

#[derive(Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    message: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
struct GpsdBatch {
    fixes: Vec<Fix>,
    errors: Vec<String>,
}

/// split off every complete line, leaving a trailing partial line in place
fn drain_lines(pending: &mut Vec<u8>) -> Vec<u8> {
    match pending.iter().rposition(|&b| b == b'\n') {
        Some(end) => {
            let rest = pending.split_off(end + 1);
            std::mem::replace(pending, rest)
        }
        None => Vec::new(),
    }
}

fn parse_batch(lines: &str) -> GpsdBatch {
    let mut batch = GpsdBatch::default();
    for line in lines.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let report: GpsdReport = match serde_json::from_str(line) {
            Ok(report) => report,
            Err(e) => {
                debug!("skipping gpsd line: {}", e);
                continue;
            }
        };
        match report.class.as_str() {
            // mode 2 = 2d fix, 3 = 3d fix
            "TPV" if report.mode >= 2 => {
                if let (Some(latitude), Some(longitude)) = (report.lat, report.lon) {
                    batch.fixes.push(Fix { latitude, longitude });
                }
            }
            "ERROR" => batch
                .errors
                .push(report.message.unwrap_or_else(|| "gpsd error".to_string())),
            _ => {}
        }
    }
    batch
}

// ==============================================================================
// battery: linux power supply
// ==============================================================================

pub struct SysfsBattery {
    pub root: PathBuf,
    pub poll: Duration,
}

impl BatterySource for SysfsBattery {
    fn subscribe(&self, events: EventSender) -> Subscription {
        let root = self.root.clone();
        let poll = self.poll;
        Subscription::spawn("battery", async move {
            let mut ticker = interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<f32> = None;
            loop {
                ticker.tick().await;
                let root = root.clone();
                // offload blocking io to dedicated thread
                let raw = tokio::task::spawn_blocking(move || device::read_battery_raw(&root))
                    .await
                    .unwrap_or(BATTERY_UNAVAILABLE);
                if last == Some(raw) {
                    continue;
                }
                last = Some(raw);
                if events.send(TelemetryEvent::BatteryLevelChanged(raw)).is_err() {
                    break;
                }
            }
        })
    }
}

// ==============================================================================
// managed configuration: file watch + periodic re-check
// ==============================================================================

pub struct ManagedConfigWatcher {
    pub path: PathBuf,
    pub namespace_key: String,
    pub recheck: Duration,
}

impl ConfigurationSource for ManagedConfigWatcher {
    fn current(&self) -> Result<ManagedConfig, ManagedConfigError> {
        ManagedConfig::read_from(&self.path, &self.namespace_key)
    }

    fn subscribe(&self, events: EventSender) -> Subscription {
        let (poke_tx, mut poke_rx) = mpsc::unbounded_channel::<()>();

        // watch the directory, the document itself is usually replaced on update
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let ours = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if ours {
                let _ = poke_tx.send(());
            }
        });
        let watcher = match watcher {
            Ok(mut watcher) => {
                let dir = self
                    .path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."));
                match watcher.watch(&dir, RecursiveMode::NonRecursive) {
                    Ok(()) => Some(watcher),
                    Err(e) => {
                        warn!("cannot watch {}: {} (periodic re-check only)", dir.display(), e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("file watcher unavailable: {} (periodic re-check only)", e);
                None
            }
        };

        let path = self.path.clone();
        let namespace_key = self.namespace_key.clone();
        let recheck = self.recheck;
        Subscription::spawn("configuration", async move {
            // dropped with the task
            let _watcher = watcher;
            let mut ticker = interval_at(Instant::now() + recheck, recheck);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    Some(()) = poke_rx.recv() => {
                        // one re-read per burst of file events
                        while poke_rx.try_recv().is_ok() {}
                    }
                    _ = ticker.tick() => {}
                }
                match ManagedConfig::read_from(&path, &namespace_key) {
                    Ok(config) => {
                        if events
                            .send(TelemetryEvent::ConfigurationChanged(config))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => warn!("managed configuration skipped: {}", e),
                }
            }
        })
    }
}
