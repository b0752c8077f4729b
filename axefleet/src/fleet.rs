//! Fleet-wide figures derived from a registry snapshot.
//!
//! Everything here is a pure function of the device list and is
//! recomputed on demand; nothing is cached.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::DeviceStatus;

/// Aggregate metrics over the devices that answered their last probe.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    /// Sum of active hashrates, GH/s.
    pub total_hash_rate: f64,
    /// Sum of active power draw, W.
    pub total_power: f64,
    pub active_count: usize,
    pub total_count: usize,
    /// Watts per TH/s; 0 when nothing is hashing.
    pub efficiency: f64,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    /// Hottest active device, or 0 when none are active.
    pub max_temperature_c: f64,
}

impl FleetSummary {
    pub fn from_devices(devices: &[DeviceStatus]) -> Self {
        let active = || devices.iter().filter(|d| d.is_active);

        let total_hash_rate: f64 = active().map(|d| d.hash_rate).sum();
        let total_power: f64 = active().map(|d| d.power_w).sum();

        Self {
            total_hash_rate,
            total_power,
            active_count: active().count(),
            total_count: devices.len(),
            efficiency: efficiency(total_power, total_hash_rate),
            shares_accepted: active().map(|d| d.shares.accepted).sum(),
            shares_rejected: active().map(|d| d.shares.rejected).sum(),
            max_temperature_c: active().map(|d| d.temperature_c).fold(0.0, f64::max),
        }
    }
}

/// Power per terahash, given watts and GH/s.
pub fn efficiency(power_w: f64, hash_rate_ghs: f64) -> f64 {
    if hash_rate_ghs > 0.0 {
        power_w / (hash_rate_ghs / 1000.0)
    } else {
        0.0
    }
}
