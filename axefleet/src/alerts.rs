//! Operator alerts derived from registry snapshots.
//!
//! Alerts are edge-triggered: an overheating device is reported once,
//! then held off for [`OVERHEAT_COOLDOWN`] even if it stays hot. A new
//! best difficulty is reported when it jumps past the value seen on the
//! previous observation by more than [`BEST_DIFF_STEP`].

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use strum::Display;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::registry::Snapshot;
use crate::tracing::prelude::*;
use crate::types::{DeviceStatus, format_difficulty};

pub const DEFAULT_TEMP_THRESHOLD_C: f64 = 70.0;
pub const OVERHEAT_COOLDOWN: Duration = Duration::from_secs(5 * 60);
pub const BEST_DIFF_STEP: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AlertKind {
    Overheat,
    NewBestDifficulty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub address: Ipv4Addr,
    pub label: String,
    /// Temperature in °C or difficulty, depending on `kind`.
    pub value: f64,
}

#[derive(Debug, Default)]
struct DeviceMemory {
    last_overheat: Option<Instant>,
    best_diff: f64,
}

#[derive(Debug)]
pub struct AlertMonitor {
    threshold_c: f64,
    devices: HashMap<Ipv4Addr, DeviceMemory>,
}

impl Default for AlertMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_TEMP_THRESHOLD_C)
    }
}

impl AlertMonitor {
    pub fn new(threshold_c: f64) -> Self {
        Self {
            threshold_c,
            devices: HashMap::new(),
        }
    }

    /// Compare a snapshot against what was seen before.
    ///
    /// Inactive devices are skipped; their zeroed metrics say nothing
    /// about the hardware. Devices no longer in the snapshot are
    /// forgotten.
    pub fn observe(&mut self, devices: &[DeviceStatus], now: Instant) -> Vec<Alert> {
        self.devices
            .retain(|addr, _| devices.iter().any(|d| d.address == *addr));

        let mut alerts = Vec::new();
        for device in devices.iter().filter(|d| d.is_active) {
            let memory = self.devices.entry(device.address).or_default();

            if device.temperature_c >= self.threshold_c {
                let cooled_down = memory
                    .last_overheat
                    .is_none_or(|last| now.duration_since(last) >= OVERHEAT_COOLDOWN);
                if cooled_down {
                    memory.last_overheat = Some(now);
                    alerts.push(Alert {
                        kind: AlertKind::Overheat,
                        address: device.address,
                        label: device.label(),
                        value: device.temperature_c,
                    });
                }
            }

            let previous = memory.best_diff;
            if previous > 0.0 && device.best_diff - previous > BEST_DIFF_STEP {
                alerts.push(Alert {
                    kind: AlertKind::NewBestDifficulty,
                    address: device.address,
                    label: device.label(),
                    value: device.best_diff,
                });
            }
            // Tracks the current session, so a reboot resets the baseline.
            memory.best_diff = device.best_diff;
        }
        alerts
    }

    /// Log alerts for every snapshot published until cancelled.
    pub async fn run(
        mut self,
        mut snapshots: watch::Receiver<Snapshot>,
        cancellation: CancellationToken,
    ) {
        loop {
            let devices = snapshots.borrow_and_update().clone();
            for alert in self.observe(&devices, Instant::now()) {
                log_alert(&alert);
            }

            tokio::select! {
                _ = cancellation.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Alert monitor stopped");
    }
}

fn log_alert(alert: &Alert) {
    match alert.kind {
        AlertKind::Overheat => warn!(
            kind = %alert.kind,
            device = %alert.label,
            address = %alert.address,
            temperature_c = alert.value,
            "Device running hot"
        ),
        AlertKind::NewBestDifficulty => info!(
            kind = %alert.kind,
            device = %alert.label,
            address = %alert.address,
            best_diff = %format_difficulty(alert.value),
            "New best difficulty"
        ),
    }
}
