//! Device liveness and metrics probing.
//!
//! A probe is one bounded HTTP exchange with a miner's status endpoint. It
//! never fails from the caller's point of view: anything short of a JSON
//! object from the device yields an inactive record.

mod normalize;

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde_json::Value;

use crate::tracing::prelude::*;
use crate::types::DeviceStatus;

pub use normalize::{ALIASES, AliasTable, normalize};

/// Upper bound on one probe, fallback path included.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Status paths in the order they are tried. The second one only exists
/// on some firmware and is tried when the device answers the first with
/// something unusable.
pub const STATUS_PATHS: [&str; 2] = ["/api/system/info", "/api/system/statistics"];

pub(crate) const USER_AGENT: &str = concat!("axefleet/", env!("CARGO_PKG_VERSION"));

/// Something that can report the state of a device by address.
///
/// The scanner and the refresh loop depend on this trait rather than on
/// HTTP so tests can substitute scripted devices.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: Ipv4Addr) -> DeviceStatus;
}

/// Why a single request produced nothing usable.
#[derive(Debug)]
enum Failure {
    /// Nothing answered (refused, unreachable, timed out).
    Unreachable(reqwest::Error),
    /// Something answered, but not with a status object.
    BadResponse(String),
}

/// HTTP prober for BitAxe/NerdAxe style firmware.
#[derive(Clone, Debug)]
pub struct HttpProber {
    client: reqwest::Client,
    port: u16,
    timeout: Duration,
}

impl HttpProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    /// Build a prober with a non-default per-probe budget.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            port: 80,
            timeout,
        })
    }

    /// Probe devices on a port other than 80.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    async fn fetch(&self, address: Ipv4Addr, path: &str) -> Result<Value, Failure> {
        let url = if self.port == 80 {
            format!("http://{address}{path}")
        } else {
            format!("http://{address}:{}{path}", self.port)
        };

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(Failure::Unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::BadResponse(format!("HTTP {status}")));
        }

        match response.json::<Value>().await {
            Ok(body) if body.is_object() => Ok(body),
            Ok(_) => Err(Failure::BadResponse("body is not an object".into())),
            Err(e) if e.is_timeout() => Err(Failure::Unreachable(e)),
            Err(e) => Err(Failure::BadResponse(format!("malformed JSON: {e}"))),
        }
    }

    async fn probe_paths(&self, address: Ipv4Addr) -> Option<DeviceStatus> {
        for path in STATUS_PATHS {
            match self.fetch(address, path).await {
                Ok(body) => {
                    trace!(%address, path, "Probe succeeded");
                    return normalize(address, &body);
                }
                Err(Failure::Unreachable(e)) => {
                    trace!(%address, path, error = %e, "Device unreachable");
                    return None;
                }
                Err(Failure::BadResponse(reason)) => {
                    debug!(%address, path, %reason, "Unusable status response");
                }
            }
        }
        None
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, address: Ipv4Addr) -> DeviceStatus {
        match tokio::time::timeout(self.timeout, self.probe_paths(address)).await {
            Ok(Some(status)) => status,
            Ok(None) => DeviceStatus::inactive(address),
            Err(_) => {
                trace!(%address, "Probe timed out");
                DeviceStatus::inactive(address)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{Json, Router, http::StatusCode, routing::get};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    const LOCALHOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    /// A port nothing listens on.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn normalizes_info_endpoint() {
        let router = Router::new().route(
            "/api/system/info",
            get(|| async {
                Json(json!({
                    "hashRate": 550.0,
                    "power": 16.0,
                    "temp": 55,
                    "ASICModel": "BM1366"
                }))
            }),
        );
        let addr = serve(router).await;
        let prober = HttpProber::new().unwrap().with_port(addr.port());

        let status = prober.probe(LOCALHOST).await;

        assert!(status.is_active);
        assert_eq!(status.address, LOCALHOST);
        assert_eq!(status.hash_rate, 550.0);
        assert_eq!(status.power_w, 16.0);
        assert_eq!(status.model, "BM1366");
    }

    #[tokio::test]
    async fn falls_back_to_statistics_endpoint() {
        let router = Router::new()
            .route("/api/system/info", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/api/system/statistics",
                get(|| async { Json(json!({"hashrate": 480, "asicTemp": 49})) }),
            );
        let addr = serve(router).await;
        let prober = HttpProber::new().unwrap().with_port(addr.port());

        let status = prober.probe(LOCALHOST).await;

        assert!(status.is_active);
        assert_eq!(status.hash_rate, 480.0);
        assert_eq!(status.temperature_c, 49.0);
    }

    #[tokio::test]
    async fn malformed_json_is_inactive() {
        let router = Router::new()
            .route("/api/system/info", get(|| async { "{not json" }))
            .route("/api/system/statistics", get(|| async { "[]" }));
        let addr = serve(router).await;
        let prober = HttpProber::new().unwrap().with_port(addr.port());

        let status = prober.probe(LOCALHOST).await;

        assert_eq!(status, DeviceStatus::inactive(LOCALHOST));
    }

    #[tokio::test]
    async fn error_status_is_inactive() {
        let router = Router::new().fallback(|| async { StatusCode::INTERNAL_SERVER_ERROR });
        let addr = serve(router).await;
        let prober = HttpProber::new().unwrap().with_port(addr.port());

        assert!(!prober.probe(LOCALHOST).await.is_active);
    }

    #[tokio::test]
    async fn unreachable_address_is_inactive_every_time() {
        let prober = HttpProber::new().unwrap().with_port(closed_port().await);

        for _ in 0..3 {
            assert_eq!(
                prober.probe(LOCALHOST).await,
                DeviceStatus::inactive(LOCALHOST)
            );
        }
    }

    #[tokio::test]
    async fn slow_device_times_out() {
        let router = Router::new().route(
            "/api/system/info",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"hashRate": 1.0}))
            }),
        );
        let addr = serve(router).await;
        let prober = HttpProber::with_timeout(Duration::from_millis(200))
            .unwrap()
            .with_port(addr.port());

        let started = std::time::Instant::now();
        let status = prober.probe(LOCALHOST).await;

        assert!(!status.is_active);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
