//! Client for an optional pool statistics service.
//!
//! When a pool service is configured and healthy, its view of the fleet
//! takes precedence over the sum of device-reported figures. When it is
//! absent or unreachable, the device-derived figures stand on their own.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use strum::Display;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::fleet::FleetSummary;
use crate::tracing::prelude::*;
use crate::types::DeviceStatus;

/// Budget for the liveness check that gates all other requests.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PoolApiError {
    #[error("pool API request to {path} failed: {source}")]
    Request {
        path: &'static str,
        source: reqwest::Error,
    },

    #[error("pool API returned HTTP {status} for {path}")]
    Status { path: &'static str, status: u16 },
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolInfo {
    pub name: String,
    pub version: String,
    pub uptime: u64,
    pub stratum_port: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolTotals {
    pub total_hashrate: f64,
    pub active_miners: u32,
    pub total_shares: u64,
    pub blocks_found: u32,
    pub last_block_time: Option<String>,
    pub difficulty: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolMiner {
    pub id: String,
    pub address: String,
    pub name: String,
    /// GH/s.
    pub hashrate: f64,
    pub shares: u64,
    pub last_seen: Option<String>,
    pub active: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub struct PoolStats {
    pub pool: PoolInfo,
    pub stats: PoolTotals,
    pub miners: Vec<PoolMiner>,
}

impl PoolStats {
    /// Pool-side hashrate of active miners in GH/s.
    ///
    /// Summed from the per-miner list, which the service reports in GH/s;
    /// its top-level total mixes units depending on where a miner was
    /// seen.
    pub fn active_hash_rate(&self) -> f64 {
        self.miners
            .iter()
            .filter(|m| m.active)
            .map(|m| m.hashrate)
            .sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub struct HashratePoint {
    pub time: String,
    pub hashrate: f64,
    pub shares: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub struct SharesPoint {
    pub time: String,
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub struct PoolBlock {
    pub height: u64,
    pub hash: String,
    pub reward: f64,
    pub finder: String,
    pub time: String,
}

#[derive(Deserialize)]
struct History<T> {
    #[serde(default = "Vec::new")]
    history: Vec<T>,
}

#[derive(Deserialize)]
struct Blocks {
    #[serde(default)]
    blocks: Vec<PoolBlock>,
}

/// Everything fetched from the pool in one poll.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub stats: PoolStats,
    pub hashrate_history: Vec<HashratePoint>,
    pub shares_history: Vec<SharesPoint>,
    pub blocks: Vec<PoolBlock>,
}

#[derive(Clone, Debug)]
pub struct PoolApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl PoolApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the service answers its health check within 3 s.
    pub async fn health(&self) -> bool {
        let url = format!("{}/api/health", self.base_url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Pool API health check failed");
                false
            }
        }
    }

    pub async fn stats(&self) -> Result<PoolStats, PoolApiError> {
        self.get("/api/pool/stats").await
    }

    pub async fn hashrate_history(&self) -> Result<Vec<HashratePoint>, PoolApiError> {
        let body: History<HashratePoint> = self.get("/api/pool/hashrate").await?;
        Ok(body.history)
    }

    pub async fn shares_history(&self) -> Result<Vec<SharesPoint>, PoolApiError> {
        let body: History<SharesPoint> = self.get("/api/pool/shares").await?;
        Ok(body.history)
    }

    pub async fn blocks(&self) -> Result<Vec<PoolBlock>, PoolApiError> {
        let body: Blocks = self.get("/api/pool/blocks").await?;
        Ok(body.blocks)
    }

    /// Health-check the service and, if it is up, fetch everything.
    ///
    /// Stats are required; the history and block lists fall back to empty
    /// when their requests fail.
    pub async fn snapshot(&self) -> Option<PoolSnapshot> {
        if !self.health().await {
            return None;
        }

        let (stats, hashrate_history, shares_history, blocks) = tokio::join!(
            self.stats(),
            self.hashrate_history(),
            self.shares_history(),
            self.blocks()
        );

        let stats = match stats {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Failed to fetch pool stats");
                return None;
            }
        };

        Some(PoolSnapshot {
            stats,
            hashrate_history: hashrate_history.unwrap_or_else(log_and_default),
            shares_history: shares_history.unwrap_or_else(log_and_default),
            blocks: blocks.unwrap_or_else(log_and_default),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &'static str) -> Result<T, PoolApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| PoolApiError::Request { path, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PoolApiError::Status {
                path,
                status: status.as_u16(),
            });
        }

        response
            .json()
            .await
            .map_err(|source| PoolApiError::Request { path, source })
    }
}

fn log_and_default<T: Default>(e: PoolApiError) -> T {
    debug!(error = %e, "Pool API request failed");
    T::default()
}

/// Poll the pool service and publish the latest snapshot.
///
/// Publishes `None` whenever the service is unreachable, so readers fall
/// back to device-derived figures.
pub async fn monitor(
    client: PoolApiClient,
    tx: watch::Sender<Option<PoolSnapshot>>,
    cancellation: CancellationToken,
) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut was_available: Option<bool> = None;

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = client.snapshot().await;
                let available = snapshot.is_some();
                if was_available != Some(available) {
                    if available {
                        info!(url = client.base_url(), "Pool API available");
                    } else {
                        info!(url = client.base_url(), "Pool API unavailable, using device figures");
                    }
                    was_available = Some(available);
                }
                tx.send_replace(snapshot);
            }
        }
    }
}

/// Which source the fleet hashrate came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HashRateSource {
    Devices,
    Pool,
}

/// Fleet view combining device figures with the pool, when available.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FleetOverview {
    pub summary: FleetSummary,
    /// Headline hashrate in GH/s, from `hash_rate_source`.
    pub hash_rate: f64,
    pub hash_rate_source: HashRateSource,
    pub pool: Option<PoolSnapshot>,
}

impl FleetOverview {
    pub fn new(devices: &[DeviceStatus], pool: Option<PoolSnapshot>) -> Self {
        let summary = FleetSummary::from_devices(devices);
        let (hash_rate, hash_rate_source) = match &pool {
            Some(snapshot) => (snapshot.stats.active_hash_rate(), HashRateSource::Pool),
            None => (summary.total_hash_rate, HashRateSource::Devices),
        };
        Self {
            summary,
            hash_rate,
            hash_rate_source,
            pool,
        }
    }
}
