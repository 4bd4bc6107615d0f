//! ==============================================================================
//! domain.rs - telemetry state and its transitions
//! ==============================================================================
//!
//! purpose:
//!     the single telemetry record this agent maintains, the events that change
//!     it, and the pure `(state, event) -> state` transition between them.
//!
//! relationships:
//!     - used by: aggregator.rs (applies events, publishes the result)
//!     - used by: reporter.rs (builds the upload record from a snapshot)
//!     - used by: dashboard.rs (renders and serves the snapshot)
//!     - uses: managed.rs (ManagedConfig carried by ConfigurationChanged)
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};

use crate::managed::ManagedConfig;

/// device id used when no stable identifier can be read
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

/// shown on the dashboard; nothing writes a different value yet
pub const DEFAULT_ALERT_MESSAGE: &str = "No Alerts";

/// current best-known device telemetry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    /// stable per-install identifier, fixed at startup
    pub device_id: String,
    /// last known latitude (0.0 until the first fix)
    pub latitude: f64,
    /// last known longitude (0.0 until the first fix)
    pub longitude: f64,
    /// battery percent 0-100, 0 when unknown
    pub battery_level: u8,
    /// true once collection has been initialized, never reset
    pub is_sync_on: bool,
    pub alert_message: String,
    pub serial_number: String,
    pub email: String,
    pub full_name: String,
}

/// a single position fix delivered by a location source
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

/// everything that can change the telemetry record
#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryEvent {
    /// collection initialized
    SyncStarted,
    /// a batch of fixes, oldest first
    LocationUpdate(Vec<Fix>),
    /// the location source reported a failure
    LocationError(String),
    /// a fresh read of managed configuration
    ConfigurationChanged(ManagedConfig),
    /// raw battery fraction in [0, 1], negative when unavailable
    BatteryLevelChanged(f32),
}

impl DeviceTelemetry {
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            device_id: if device_id.trim().is_empty() {
                UNKNOWN_DEVICE_ID.to_string()
            } else {
                device_id
            },
            latitude: 0.0,
            longitude: 0.0,
            battery_level: 0,
            is_sync_on: false,
            alert_message: DEFAULT_ALERT_MESSAGE.to_string(),
            serial_number: String::new(),
            email: String::new(),
            full_name: String::new(),
        }
    }

    /// apply one event and return the resulting state
    ///
    /// pure: the caller decides what to do with the old and new values.
    pub fn apply(mut self, event: &TelemetryEvent) -> Self {
        match event {
            TelemetryEvent::SyncStarted => {
                self.is_sync_on = true;
            }
            TelemetryEvent::LocationUpdate(fixes) => {
                // earlier fixes in the same batch are stale
                if let Some(fix) = fixes.last() {
                    self.latitude = fix.latitude;
                    self.longitude = fix.longitude;
                }
            }
            TelemetryEvent::LocationError(_) => {}
            TelemetryEvent::ConfigurationChanged(config) => {
                if self.serial_number != config.serial_number {
                    self.serial_number = config.serial_number.clone();
                }
                if self.email != config.email {
                    self.email = config.email.clone();
                }
                if self.full_name != config.full_name {
                    self.full_name = config.full_name.clone();
                }
            }
            TelemetryEvent::BatteryLevelChanged(raw) => {
                self.battery_level = battery_percent(*raw);
            }
        }
        self
    }

    /// names of the identity fields that differ between two states
    pub fn changed_identity_fields(&self, next: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.serial_number != next.serial_number {
            changed.push("serial_number");
        }
        if self.email != next.email {
            changed.push("email");
        }
        if self.full_name != next.full_name {
            changed.push("full_name");
        }
        changed
    }
}

/// convert a raw battery reading into a whole percent
///
/// negative (or NaN) readings mean the sensor is unavailable and map to 0.
/// the fraction is truncated, not rounded. a reading within float error of a
/// whole percent counts as that percent (0.53f32 is 0.52999997...).
pub fn battery_percent(raw: f32) -> u8 {
    if raw.is_nan() || raw < 0.0 {
        return 0;
    }
    let percent = (f64::from(raw.min(1.0)) * 100.0 + PERCENT_SNAP).floor();
    percent.min(100.0) as u8
}

// well above f32 rounding error at 100x, well below a real 0.01% step
const PERCENT_SNAP: f64 = 1e-4;

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn fix(latitude: f64, longitude: f64) -> Fix {
        Fix { latitude, longitude }
    }

    #[test]
    fn test_defaults() {
        let state = DeviceTelemetry::new("D1");
        assert_eq!(state.device_id, "D1");
        assert_eq!(state.latitude, 0.0);
        assert_eq!(state.longitude, 0.0);
        assert_eq!(state.battery_level, 0);
        assert!(!state.is_sync_on);
        assert_eq!(state.alert_message, "No Alerts");
        assert!(state.serial_number.is_empty());
        assert!(state.email.is_empty());
        assert!(state.full_name.is_empty());
    }

    #[test]
    fn test_blank_device_id_becomes_unknown() {
        assert_eq!(DeviceTelemetry::new("  ").device_id, UNKNOWN_DEVICE_ID);
    }

    #[test]
    fn test_last_fix_in_batch_wins() {
        let batch = vec![fix(1.0, 2.0), fix(3.0, 4.0), fix(12.9, 77.6)];
        let state = DeviceTelemetry::new("D1").apply(&TelemetryEvent::LocationUpdate(batch));
        assert_eq!(state.latitude, 12.9);
        assert_eq!(state.longitude, 77.6);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let before = DeviceTelemetry::new("D1")
            .apply(&TelemetryEvent::LocationUpdate(vec![fix(5.0, 6.0)]));
        let after = before
            .clone()
            .apply(&TelemetryEvent::LocationUpdate(Vec::new()));
        assert_eq!(before, after);
    }

    #[test]
    fn test_location_error_leaves_state() {
        let before = DeviceTelemetry::new("D1")
            .apply(&TelemetryEvent::LocationUpdate(vec![fix(5.0, 6.0)]));
        let after = before
            .clone()
            .apply(&TelemetryEvent::LocationError("gps lost".into()));
        assert_eq!(before, after);
    }

    #[test]
    fn test_sync_started_sticks() {
        let state = DeviceTelemetry::new("D1").apply(&TelemetryEvent::SyncStarted);
        assert!(state.is_sync_on);
        let state = state.apply(&TelemetryEvent::BatteryLevelChanged(-1.0));
        assert!(state.is_sync_on);
    }

    #[test]
    fn test_battery_mapping() {
        assert_eq!(battery_percent(-1.0), 0);
        assert_eq!(battery_percent(f32::NAN), 0);
        assert_eq!(battery_percent(0.0), 0);
        assert_eq!(battery_percent(0.55), 55);
        assert_eq!(battery_percent(0.999), 99);
        assert_eq!(battery_percent(1.0), 100);
        assert_eq!(battery_percent(1.5), 100);
        assert_eq!(battery_percent(0.5299), 52);
    }

    #[test]
    fn test_whole_percent_fractions_map_back() {
        for percent in 0..=100u8 {
            let raw = percent as f32 / 100.0;
            assert_eq!(battery_percent(raw), percent, "raw {}", raw);
        }
    }

    #[test]
    fn test_battery_mapping_is_monotonic() {
        let mut previous = 0;
        for step in 0..=1000 {
            let percent = battery_percent(step as f32 / 1000.0);
            assert!(percent <= 100);
            assert!(percent >= previous, "dropped at step {}", step);
            previous = percent;
        }
        assert_eq!(previous, 100);
    }

    #[test]
    fn test_configuration_is_idempotent() {
        let config = ManagedConfig {
            serial_number: "S1".into(),
            email: "e@x.com".into(),
            full_name: "A B".into(),
        };
        let event = TelemetryEvent::ConfigurationChanged(config);

        let once = DeviceTelemetry::new("D1").apply(&event);
        let twice = once.clone().apply(&event);
        assert_eq!(once, twice);
        assert!(once.changed_identity_fields(&twice).is_empty());
        assert_eq!(once.full_name, "A B");
    }

    #[test]
    fn test_changed_identity_fields() {
        let before = DeviceTelemetry::new("D1");
        let after = before.clone().apply(&TelemetryEvent::ConfigurationChanged(ManagedConfig {
            serial_number: String::new(),
            email: "e@x.com".into(),
            full_name: String::new(),
        }));
        assert_eq!(before.changed_identity_fields(&after), vec!["email"]);
    }
}
