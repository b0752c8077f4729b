//! HTTP client for the daemon's API.

pub mod types;

use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use types::{
    AddDeviceRequest, DevicePatchRequest, DeviceStatus, ErrorResponse, FleetOverview,
    ScanProgress, ScanRequest,
};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7786";

pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(url: impl Into<String>) -> Self {
        Self {
            base_url: url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn fleet(&self) -> Result<FleetOverview> {
        self.json(self.request(Method::GET, "/fleet")).await
    }

    pub async fn devices(&self) -> Result<Vec<DeviceStatus>> {
        self.json(self.request(Method::GET, "/devices")).await
    }

    /// Register a device. Returns `None` if it was already registered.
    pub async fn add_device(&self, address: &str) -> Result<Option<DeviceStatus>> {
        let response = self
            .request(Method::POST, "/devices")
            .json(&AddDeviceRequest {
                address: address.to_string(),
            })
            .send()
            .await
            .context("failed to reach axefleetd")?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(None);
        }
        Ok(Some(decode(response).await?))
    }

    pub async fn remove_device(&self, address: Ipv4Addr) -> Result<()> {
        let path = format!("/devices/{address}");
        self.send(self.request(Method::DELETE, &path)).await
    }

    pub async fn rename_device(&self, address: Ipv4Addr, name: &str) -> Result<DeviceStatus> {
        let path = format!("/devices/{address}");
        let body = DevicePatchRequest {
            display_name: Some(name.to_string()),
        };
        self.json(self.request(Method::PATCH, &path).json(&body))
            .await
    }

    pub async fn restart_device(&self, address: Ipv4Addr) -> Result<()> {
        let path = format!("/devices/{address}/restart");
        self.send(self.request(Method::POST, &path)).await
    }

    pub async fn start_scan(&self, prefix: Option<&str>) -> Result<ScanProgress> {
        let body = ScanRequest {
            prefix: prefix.map(str::to_string),
        };
        self.json(self.request(Method::POST, "/scan").json(&body))
            .await
    }

    pub async fn scan_progress(&self) -> Result<ScanProgress> {
        self.json(self.request(Method::GET, "/scan")).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/api/v0{}", self.base_url, path))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("failed to reach axefleetd")?;
        decode(response).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await.context("failed to reach axefleetd")?;
        check(response).await.map(drop)
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    bail!("{message} (HTTP {})", status.as_u16())
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    check(response)
        .await?
        .json()
        .await
        .context("unexpected response from axefleetd")
}
