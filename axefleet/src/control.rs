//! Commands sent to a miner's own HTTP API.

use std::net::Ipv4Addr;
use std::time::Duration;

use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use utoipa::ToSchema;

use crate::probe::USER_AGENT;
use crate::tracing::prelude::*;

pub const RESTART_PATH: &str = "/api/system/restart";
pub const SETTINGS_PATH: &str = "/api/system";

const RESTART_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings writes make the firmware touch flash, which is slow.
const SETTINGS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("request to {address} failed: {source}")]
    Request {
        address: Ipv4Addr,
        source: reqwest::Error,
    },

    #[error("{address} rejected the request with HTTP {status}: {body}")]
    Rejected {
        address: Ipv4Addr,
        status: u16,
        body: String,
    },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Partial update of a miner's configuration. Only the fields that are
/// set are sent.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MinerSettings {
    pub stratum_url: Option<String>,
    pub stratum_port: Option<u16>,
    pub stratum_user: Option<String>,
    pub stratum_password: Option<String>,
    /// Fan duty cycle, 0--100.
    pub fan_speed: Option<u8>,
    /// ASIC frequency in MHz.
    pub frequency: Option<u16>,
    /// Core voltage in mV.
    pub core_voltage: Option<u16>,
}

impl MinerSettings {
    /// Firmware request body, using the firmware's own key names.
    pub fn to_payload(&self) -> Result<Map<String, Value>, ControlError> {
        if let Some(speed) = self.fan_speed.filter(|s| *s > 100) {
            return Err(ControlError::InvalidSetting(format!(
                "fan speed {speed} is above 100%"
            )));
        }

        let fields = [
            ("stratumURL", self.stratum_url.as_ref().map(|v| json!(v))),
            ("stratumPort", self.stratum_port.map(|v| json!(v))),
            ("stratumUser", self.stratum_user.as_ref().map(|v| json!(v))),
            (
                "stratumPassword",
                self.stratum_password.as_ref().map(|v| json!(v)),
            ),
            ("fanspeed", self.fan_speed.map(|v| json!(v))),
            ("frequency", self.frequency.map(|v| json!(v))),
            ("coreVoltage", self.core_voltage.map(|v| json!(v))),
        ];

        let payload: Map<String, Value> = fields
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
            .collect();

        if payload.is_empty() {
            return Err(ControlError::InvalidSetting("no settings given".into()));
        }
        Ok(payload)
    }
}

/// Client for miner control endpoints.
#[derive(Clone, Debug)]
pub struct DeviceControl {
    restart_client: reqwest::Client,
    settings_client: reqwest::Client,
    port: u16,
}

impl DeviceControl {
    pub fn new() -> Result<Self, reqwest::Error> {
        let build = |timeout| {
            reqwest::Client::builder()
                .timeout(timeout)
                .redirect(reqwest::redirect::Policy::none())
                .user_agent(USER_AGENT)
                .build()
        };

        Ok(Self {
            restart_client: build(RESTART_TIMEOUT)?,
            settings_client: build(SETTINGS_TIMEOUT)?,
            port: 80,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn url(&self, address: Ipv4Addr, path: &str) -> String {
        if self.port == 80 {
            format!("http://{address}{path}")
        } else {
            format!("http://{address}:{}{path}", self.port)
        }
    }

    /// Ask a miner to reboot.
    ///
    /// Success means the device accepted the request. Whether it actually
    /// comes back shows up in later probes.
    pub async fn restart(&self, address: Ipv4Addr) -> Result<(), ControlError> {
        self.restart_client
            .post(self.url(address, RESTART_PATH))
            .send()
            .await
            .map_err(|source| ControlError::Request { address, source })?;

        info!(%address, "Restart command sent");
        Ok(())
    }

    /// Apply a partial settings update.
    pub async fn update_settings(
        &self,
        address: Ipv4Addr,
        settings: &MinerSettings,
    ) -> Result<(), ControlError> {
        let payload = settings.to_payload()?;
        debug!(%address, keys = ?payload.keys().collect::<Vec<_>>(), "Updating miner settings");

        let response = self
            .settings_client
            .patch(self.url(address, SETTINGS_PATH))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&Value::Object(payload))
            .send()
            .await
            .map_err(|source| ControlError::Request { address, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControlError::Rejected {
                address,
                status: status.as_u16(),
                body,
            });
        }

        info!(%address, "Miner settings updated");
        Ok(())
    }
}
