//! Mapping of firmware status payloads onto [`DeviceStatus`].
//!
//! The two firmware families name the same metric differently. Rather than
//! detecting the family, every canonical field has an ordered list of
//! source keys and takes the first one present. Supporting a new family is
//! an edit to [`ALIASES`].

use std::net::Ipv4Addr;

use serde_json::{Map, Value};

use crate::types::{DeviceStatus, Shares, UNKNOWN, parse_difficulty};

/// Source keys for each canonical field, highest priority first.
pub struct AliasTable {
    pub hash_rate: &'static [&'static str],
    pub temperature_c: &'static [&'static str],
    pub power_w: &'static [&'static str],
    pub core_voltage_mv: &'static [&'static str],
    pub uptime_seconds: &'static [&'static str],
    pub shares_accepted: &'static [&'static str],
    pub shares_rejected: &'static [&'static str],
    pub model: &'static [&'static str],
    pub firmware_version: &'static [&'static str],
    pub hostname: &'static [&'static str],
    pub best_diff: &'static [&'static str],
}

pub const ALIASES: AliasTable = AliasTable {
    hash_rate: &["hashRate", "hashRate_10m", "hashrate", "hr"],
    temperature_c: &["temp", "asicTemp", "chipTemp", "temperature"],
    power_w: &["power", "powerW", "wattage"],
    core_voltage_mv: &["coreVoltageActual", "coreVoltage", "voltage"],
    uptime_seconds: &["uptimeSeconds", "uptime"],
    shares_accepted: &["sharesAccepted", "accepted"],
    shares_rejected: &["sharesRejected", "rejected"],
    model: &["ASICModel", "asicModel", "deviceModel", "model"],
    firmware_version: &["version", "firmwareVersion", "fwVersion"],
    hostname: &["hostname", "deviceName"],
    best_diff: &["bestDiff", "bestSessionDiff"],
};

/// Build an active [`DeviceStatus`] from a decoded status payload.
///
/// Returns `None` if the payload is not a JSON object; the caller treats
/// that like any other failed probe.
pub fn normalize(address: Ipv4Addr, payload: &Value) -> Option<DeviceStatus> {
    let obj = payload.as_object()?;
    let table = &ALIASES;

    Some(DeviceStatus {
        address,
        is_active: true,
        display_name: None,
        hash_rate: resolve(obj, table.hash_rate, as_f64).unwrap_or(0.0),
        temperature_c: resolve(obj, table.temperature_c, as_f64).unwrap_or(0.0),
        power_w: resolve(obj, table.power_w, as_f64).unwrap_or(0.0),
        core_voltage_mv: resolve(obj, table.core_voltage_mv, as_f64).unwrap_or(0.0),
        uptime_seconds: resolve(obj, table.uptime_seconds, as_u64).unwrap_or(0),
        shares: Shares {
            accepted: resolve(obj, table.shares_accepted, as_u64).unwrap_or(0),
            rejected: resolve(obj, table.shares_rejected, as_u64).unwrap_or(0),
        },
        model: resolve(obj, table.model, as_text).unwrap_or_else(|| UNKNOWN.to_string()),
        firmware_version: resolve(obj, table.firmware_version, as_text)
            .unwrap_or_else(|| UNKNOWN.to_string()),
        hostname: resolve(obj, table.hostname, as_text),
        best_diff: resolve(obj, table.best_diff, as_difficulty).unwrap_or(0.0),
    })
}

/// First alias whose value is present, non-null, and converts.
fn resolve<T>(
    obj: &Map<String, Value>,
    aliases: &[&str],
    convert: fn(&Value) -> Option<T>,
) -> Option<T> {
    aliases
        .iter()
        .filter_map(|key| obj.get(*key))
        .filter(|value| !value.is_null())
        .find_map(convert)
}

fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn as_u64(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    as_f64(value)
        .filter(|n| *n >= 0.0)
        .map(|n| n.round() as u64)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_difficulty(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => parse_difficulty(s),
        other => as_f64(other).filter(|n| *n >= 0.0),
    }
}
