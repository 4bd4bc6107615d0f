//! ==============================================================================
//! aggregator.rs - owner of the live telemetry record
//! ==============================================================================
//!
//! purpose:
//!     keeps the current best-known DeviceTelemetry and republishes it on every
//!     change. sources feed events into one channel; this task is its only
//!     consumer, so mutations are totally ordered and never torn.
//!
//! flow:
//!
//!     location ─┐
//!     battery  ─┼─> mpsc<TelemetryEvent> ─> Aggregator::handle ─> watch<DeviceTelemetry>
//!     config   ─┘                          (state.apply(event))      │
//!                                                                    ├─> reporter.rs
//!                                                                    └─> dashboard.rs
//!
//! relationships:
//!     - uses: domain.rs (transitions), sources.rs (subscriptions)
//!     - used by: main.rs
//!
//! ==============================================================================

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::{DeviceTelemetry, TelemetryEvent};
use crate::sources::{EventSender, Sources, Subscription};

pub struct Aggregator {
    state: DeviceTelemetry,
    publisher: watch::Sender<DeviceTelemetry>,
    sender: EventSender,
    events: mpsc::UnboundedReceiver<TelemetryEvent>,
    subscriptions: Vec<Subscription>,
}

impl Aggregator {
    pub fn new(device_id: impl Into<String>) -> Self {
        let state = DeviceTelemetry::new(device_id);
        let (publisher, _) = watch::channel(state.clone());
        let (sender, events) = mpsc::unbounded_channel();
        Self {
            state,
            publisher,
            sender,
            events,
            subscriptions: Vec::new(),
        }
    }

    /// latest state, updated after every change
    pub fn subscribe(&self) -> watch::Receiver<DeviceTelemetry> {
        self.publisher.subscribe()
    }

    /// a sender into the event channel
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn state(&self) -> &DeviceTelemetry {
        &self.state
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// start every source and mark collection as on
    ///
    /// nothing here fails: a denied location permission or an unreadable
    /// configuration document only leaves the defaults in place.
    pub fn initialize(&mut self, sources: Sources) {
        let Sources {
            mut location,
            battery,
            configuration,
        } = sources;

        self.subscriptions.push(battery.subscribe(self.sender()));

        if location.request_permission() {
            self.subscriptions.push(location.start_updates(self.sender()));
        } else {
            info!("location permission denied, coordinates stay at defaults");
        }

        match configuration.current() {
            Ok(config) => {
                self.handle(TelemetryEvent::ConfigurationChanged(config));
            }
            Err(e) => warn!("initial managed configuration read failed: {}", e),
        }
        self.subscriptions.push(configuration.subscribe(self.sender()));

        self.handle(TelemetryEvent::SyncStarted);
    }

    /// apply one event; returns true when the published state changed
    pub fn handle(&mut self, event: TelemetryEvent) -> bool {
        let next = self.state.clone().apply(&event);

        match &event {
            TelemetryEvent::SyncStarted => info!("telemetry sync on"),
            TelemetryEvent::LocationError(message) => warn!("location error: {}", message),
            TelemetryEvent::LocationUpdate(_) if next != self.state => {
                debug!(latitude = next.latitude, longitude = next.longitude, "position updated")
            }
            TelemetryEvent::BatteryLevelChanged(_) if next != self.state => {
                debug!(battery_level = next.battery_level, "battery level updated")
            }
            TelemetryEvent::ConfigurationChanged(_) => {
                for field in self.state.changed_identity_fields(&next) {
                    info!(field, "managed configuration updated");
                }
            }
            _ => {}
        }

        if next == self.state {
            return false;
        }
        self.state = next;
        self.publisher.send_replace(self.state.clone());
        true
    }

    /// consume events until the task is dropped
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.handle(event);
        }
    }
}
