use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Placeholder for text fields a device did not report.
pub const UNKNOWN: &str = "Unknown";

/// Cumulative share counters as reported by the device.
///
/// Counters restart from zero when the device reboots; nothing here
/// corrects for that.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct Shares {
    pub accepted: u64,
    pub rejected: u64,
}

/// Latest known state of one miner on the network.
///
/// Every probe produces a complete record. An inactive record carries only
/// defaults for the metric fields, never values left over from an earlier
/// successful probe. `display_name` is owned by the user and is carried
/// across probes by the registry, not by the prober.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    #[schema(value_type = String, example = "192.168.1.100")]
    pub address: Ipv4Addr,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Hashrate in GH/s.
    #[serde(default)]
    pub hash_rate: f64,
    #[serde(default)]
    pub temperature_c: f64,
    #[serde(default)]
    pub power_w: f64,
    #[serde(default)]
    pub core_voltage_mv: f64,
    #[serde(default)]
    pub uptime_seconds: u64,
    #[serde(default)]
    pub shares: Shares,
    #[serde(default = "unknown")]
    pub model: String,
    #[serde(default = "unknown")]
    pub firmware_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Best share difficulty since the device booted.
    #[serde(default)]
    pub best_diff: f64,
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

impl DeviceStatus {
    /// Record for an address that did not answer (or answered garbage).
    pub fn inactive(address: Ipv4Addr) -> Self {
        Self {
            address,
            is_active: false,
            display_name: None,
            hash_rate: 0.0,
            temperature_c: 0.0,
            power_w: 0.0,
            core_voltage_mv: 0.0,
            uptime_seconds: 0,
            shares: Shares::default(),
            model: unknown(),
            firmware_version: unknown(),
            hostname: None,
            best_diff: 0.0,
        }
    }

    /// Copy of this record with every probe-derived field reset.
    ///
    /// Used for records restored from disk: until the device answers again
    /// nothing but its address and label is known.
    pub fn forget_metrics(&self) -> Self {
        Self {
            display_name: self.display_name.clone(),
            ..Self::inactive(self.address)
        }
    }

    /// The user's label if set, else the device hostname, else the address.
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.hostname.clone())
            .unwrap_or_else(|| self.address.to_string())
    }
}
