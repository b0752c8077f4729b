//! Daemon configuration.
//!
//! Everything has a working default; `AXEFLEET_*` environment variables
//! override individual settings.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::alerts::DEFAULT_TEMP_THRESHOLD_C;
use crate::refresh::DEFAULT_REFRESH_INTERVAL;
use crate::scanner::DEFAULT_BATCH_SIZE;

pub const DEFAULT_API_ADDR: &str = "127.0.0.1:7786";

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {var}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the HTTP API listens on.
    pub api_addr: SocketAddr,

    /// Directory holding the persisted device list.
    pub data_dir: PathBuf,

    pub refresh_interval: Duration,

    /// Maximum number of concurrent probes during a scan.
    pub scan_batch_size: usize,

    /// Port the miners serve their HTTP API on.
    pub device_port: u16,

    /// Base URL of a pool statistics service, if one is deployed.
    pub pool_api_url: Option<String>,

    pub temp_threshold_c: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([127, 0, 0, 1], 7786)),
            data_dir: default_data_dir(|name| env::var(name).ok()),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            scan_batch_size: DEFAULT_BATCH_SIZE,
            device_port: 80,
            pool_api_url: None,
            temp_threshold_c: DEFAULT_TEMP_THRESHOLD_C,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self {
            data_dir: default_data_dir(&lookup),
            ..Self::default()
        };

        if let Some(addr) = parse_var(&lookup, "AXEFLEET_API_ADDR")? {
            config.api_addr = addr;
        }
        if let Some(dir) = lookup("AXEFLEET_DATA_DIR").filter(|v| !v.is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "AXEFLEET_REFRESH_SECS")? {
            if secs == 0 {
                return Err(invalid("AXEFLEET_REFRESH_SECS", secs));
            }
            config.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(batch) = parse_var::<usize>(&lookup, "AXEFLEET_SCAN_BATCH")? {
            if batch == 0 {
                return Err(invalid("AXEFLEET_SCAN_BATCH", batch));
            }
            config.scan_batch_size = batch;
        }
        if let Some(port) = parse_var(&lookup, "AXEFLEET_DEVICE_PORT")? {
            config.device_port = port;
        }
        config.pool_api_url = lookup("AXEFLEET_POOL_API_URL").filter(|v| !v.trim().is_empty());
        if let Some(threshold) = parse_var(&lookup, "AXEFLEET_TEMP_THRESHOLD_C")? {
            config.temp_threshold_c = threshold;
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
    }
}

fn invalid(var: &'static str, value: impl ToString) -> ConfigError {
    ConfigError {
        var,
        value: value.to_string(),
    }
}

fn default_data_dir(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(xdg) = lookup("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join("axefleet");
    }
    if let Some(home) = lookup("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".local/share/axefleet");
    }
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_addr.to_string(), DEFAULT_API_ADDR);
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.scan_batch_size, 20);
        assert_eq!(config.device_port, 80);
        assert_eq!(config.pool_api_url, None);
        assert_eq!(config.temp_threshold_c, 70.0);
    }

    #[test_case(&[("XDG_DATA_HOME", "/xdg"), ("HOME", "/home/me")], "/xdg/axefleet" ; "xdg wins")]
    #[test_case(&[("HOME", "/home/me")], "/home/me/.local/share/axefleet" ; "home fallback")]
    #[test_case(&[("HOME", "/home/me"), ("AXEFLEET_DATA_DIR", "/srv/fleet")], "/srv/fleet" ; "explicit")]
    fn data_dir_resolution(vars: &[(&str, &str)], expected: &str) {
        let config = Config::from_lookup(lookup(vars)).unwrap();
        assert_eq!(config.data_dir, PathBuf::from(expected));
    }

    #[test]
    fn overrides_from_environment() {
        let config = Config::from_lookup(lookup(&[
            ("AXEFLEET_API_ADDR", "0.0.0.0:9000"),
            ("AXEFLEET_REFRESH_SECS", "30"),
            ("AXEFLEET_SCAN_BATCH", "8"),
            ("AXEFLEET_DEVICE_PORT", "8080"),
            ("AXEFLEET_POOL_API_URL", "http://umbrel.local:3334"),
            ("AXEFLEET_TEMP_THRESHOLD_C", "65.5"),
        ]))
        .unwrap();

        assert_eq!(config.api_addr, SocketAddr::from(([0, 0, 0, 0], 9000)));
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.scan_batch_size, 8);
        assert_eq!(config.device_port, 8080);
        assert_eq!(config.pool_api_url.as_deref(), Some("http://umbrel.local:3334"));
        assert_eq!(config.temp_threshold_c, 65.5);
    }

    #[test_case("AXEFLEET_API_ADDR", "localhost" ; "unparsable address")]
    #[test_case("AXEFLEET_REFRESH_SECS", "0" ; "zero interval")]
    #[test_case("AXEFLEET_SCAN_BATCH", "0" ; "zero batch")]
    #[test_case("AXEFLEET_DEVICE_PORT", "70000" ; "port out of range")]
    fn rejects_bad_values(var: &str, value: &str) {
        let err = Config::from_lookup(lookup(&[(var, value)])).unwrap_err();
        assert_eq!(err.var, var);
    }

    #[test]
    fn blank_pool_url_means_none() {
        let config = Config::from_lookup(lookup(&[("AXEFLEET_POOL_API_URL", "  ")])).unwrap();
        assert_eq!(config.pool_api_url, None);
    }
}
