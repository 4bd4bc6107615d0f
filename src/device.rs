//! ==============================================================================
//! device.rs - host-side readers for device identity and power supply
//! ==============================================================================
//!
//! purpose:
//!     reads what the operating system already knows about this device:
//!     - a stable per-install identifier (machine-id)
//!     - the raw battery level from the linux power-supply class
//!
//! relationships:
//!     - used by: main.rs (device id, once at startup)
//!     - used by: sources.rs (SysfsBattery polls read_battery_raw)
//!
//! ==============================================================================

use std::path::{Path, PathBuf};

use crate::domain::UNKNOWN_DEVICE_ID;

/// raw reading reported when no battery can be found
pub const BATTERY_UNAVAILABLE: f32 = -1.0;

/// read the first non-empty identifier among `paths`
///
/// falls back to "unknown" so the record always carries a device id.
pub fn read_device_id(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|s| s.trim().to_string())
        .find(|id| !id.is_empty())
        .unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_string())
}

/// read the battery level as a fraction in [0, 1]
///
/// scans `root` (normally /sys/class/power_supply) for the first supply whose
/// `type` is "Battery" and reads, in order of preference:
///     capacity                    (percent)
///     energy_now / energy_full    (uWh)
///     charge_now / charge_full    (uAh)
/// returns BATTERY_UNAVAILABLE when nothing usable is present.
pub fn read_battery_raw(root: &Path) -> f32 {
    let Ok(entries) = std::fs::read_dir(root) else {
        return BATTERY_UNAVAILABLE;
    };

    let mut supplies: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    // BAT0 before BAT1
    supplies.sort();

    supplies
        .iter()
        .filter(|dir| read_trimmed(&dir.join("type")).as_deref() == Some("Battery"))
        .find_map(|dir| battery_fraction(dir))
        .unwrap_or(BATTERY_UNAVAILABLE)
}

fn battery_fraction(dir: &Path) -> Option<f32> {
    if let Some(capacity) = read_number(&dir.join("capacity")) {
        return Some((capacity / 100.0) as f32);
    }

    [("energy_now", "energy_full"), ("charge_now", "charge_full")]
        .iter()
        .find_map(|(now, full)| {
            let now = read_number(&dir.join(now))?;
            let full = read_number(&dir.join(full))?;
            (full > 0.0).then(|| (now / full) as f32)
        })
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

fn read_number(path: &Path) -> Option<f64> {
    read_trimmed(path)?.parse::<f64>().ok()
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::battery_percent;
    use std::fs;

    fn supply(root: &Path, name: &str, files: &[(&str, &str)]) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for (file, content) in files {
            fs::write(dir.join(file), format!("{}\n", content)).unwrap();
        }
    }

    #[test]
    fn test_device_id_first_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        let real = dir.path().join("machine-id");
        fs::write(&empty, "  \n").unwrap();
        fs::write(&real, "4c4c4544004a\n").unwrap();

        let id = read_device_id(&[dir.path().join("missing"), empty, real]);
        assert_eq!(id, "4c4c4544004a");
    }

    #[test]
    fn test_device_id_falls_back_to_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_device_id(&[dir.path().join("missing")]), "unknown");
        assert_eq!(read_device_id(&[]), "unknown");
    }

    #[test]
    fn test_battery_capacity() {
        let dir = tempfile::tempdir().unwrap();
        supply(dir.path(), "AC", &[("type", "Mains"), ("online", "1")]);
        supply(dir.path(), "BAT0", &[("type", "Battery"), ("capacity", "87")]);
        assert!((read_battery_raw(dir.path()) - 0.87).abs() < 1e-6);
    }

    #[test]
    fn test_battery_capacity_sweep_reports_same_percent() {
        let dir = tempfile::tempdir().unwrap();
        supply(dir.path(), "BAT0", &[("type", "Battery")]);
        let mut mismatches = Vec::new();
        for capacity in 0..=100u8 {
            fs::write(dir.path().join("BAT0").join("capacity"), format!("{}\n", capacity)).unwrap();
            let reported = battery_percent(read_battery_raw(dir.path()));
            if reported != capacity {
                mismatches.push((capacity, reported));
            }
        }
        assert!(mismatches.is_empty(), "capacity -> percent mismatches: {:?}", mismatches);
    }

    #[test]
    fn test_battery_energy_ratio() {
        let dir = tempfile::tempdir().unwrap();
        supply(
            dir.path(),
            "BAT1",
            &[("type", "Battery"), ("energy_now", "25000000"), ("energy_full", "50000000")],
        );
        assert!((read_battery_raw(dir.path()) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_no_battery_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        supply(dir.path(), "AC", &[("type", "Mains")]);
        assert_eq!(read_battery_raw(dir.path()), BATTERY_UNAVAILABLE);
        assert_eq!(
            read_battery_raw(&dir.path().join("nope")),
            BATTERY_UNAVAILABLE
        );
    }
}
