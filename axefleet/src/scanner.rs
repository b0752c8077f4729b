//! Subnet sweep for miners.
//!
//! A scan walks one /24 in fixed-size batches. The addresses miners most
//! often get from home routers go first so results show up early; the
//! rest of the subnet follows. Each batch is probed concurrently and must
//! settle completely before the next one starts, which caps the number of
//! outstanding requests at the batch size.
//!
//! Found devices are merged into the registry after every batch, and
//! progress is published on a watch channel for anyone displaying it.
//!
//! A scan cannot be cancelled once started. With a 5 s probe timeout a
//! full sweep of 254 hosts in batches of 20 takes at most about a minute.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::probe::Prober;
use crate::registry::{RegistryError, RegistryHandle};
use crate::tracing::prelude::*;
use crate::types::DeviceStatus;

/// Probes issued together per batch.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Subnet used when none is given and none can be detected.
pub const DEFAULT_PREFIX: SubnetPrefix = SubnetPrefix([192, 168, 1]);

/// Host numbers checked before the full sweep.
const LIKELY_HOSTS: [u8; 12] = [100, 101, 102, 103, 104, 105, 110, 111, 112, 113, 114, 115];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid subnet prefix {0:?}, expected three octets like 192.168.1")]
    InvalidPrefix(String),

    #[error("a scan is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// First three octets of a /24.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubnetPrefix([u8; 3]);

impl SubnetPrefix {
    pub const fn new(a: u8, b: u8, c: u8) -> Self {
        Self([a, b, c])
    }

    /// Prefix of the /24 containing `address`.
    pub fn containing(address: Ipv4Addr) -> Self {
        let [a, b, c, _] = address.octets();
        Self([a, b, c])
    }

    /// Prefix of this machine's first private IPv4 interface.
    pub fn detect() -> Option<Self> {
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!(error = %e, "Could not enumerate interfaces");
                return None;
            }
        };

        interfaces
            .iter()
            .filter(|iface| !iface.is_loopback())
            .find_map(|iface| match iface.ip() {
                IpAddr::V4(v4) if v4.is_private() => Some(Self::containing(v4)),
                _ => None,
            })
    }

    pub fn host(&self, last: u8) -> Ipv4Addr {
        let [a, b, c] = self.0;
        Ipv4Addr::new(a, b, c, last)
    }

    /// Every host in the subnet, likely miner addresses first.
    pub fn candidates(&self) -> Vec<Ipv4Addr> {
        let mut hosts: Vec<u8> = Vec::with_capacity(254);
        for last in LIKELY_HOSTS.into_iter().chain(1..=254) {
            if !hosts.contains(&last) {
                hosts.push(last);
            }
        }
        hosts.into_iter().map(|last| self.host(last)).collect()
    }
}

impl FromStr for SubnetPrefix {
    type Err = ScanError;

    /// Accepts "a.b.c", "a.b.c." or a full address "a.b.c.d" (whose
    /// last octet is ignored).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScanError::InvalidPrefix(s.to_string());
        let trimmed = s.trim().trim_end_matches('.');

        let octets = trimmed
            .split('.')
            .map(|part| {
                if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                part.parse::<u8>().ok()
            })
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(invalid)?;

        match octets[..] {
            [a, b, c] | [a, b, c, _] => Ok(Self([a, b, c])),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for SubnetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}

/// Resolve an optional user prefix: explicit, detected, or the default.
pub fn resolve_prefix(prefix: Option<&str>) -> Result<SubnetPrefix, ScanError> {
    match prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => p.parse(),
        None => Ok(SubnetPrefix::detect().unwrap_or(DEFAULT_PREFIX)),
    }
}

/// Live view of the current (or last) scan.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub running: bool,
    pub prefix: Option<String>,
    pub scanned: usize,
    pub total: usize,
    pub found: usize,
    /// Completion, 0--100.
    pub percent: u8,
    /// Addresses of the batch being probed.
    #[schema(value_type = Vec<String>)]
    pub in_flight: Vec<Ipv4Addr>,
}

/// Outcome of a completed scan.
///
/// An empty `found` list is a successful scan of a subnet without miners.
#[derive(Clone, Debug)]
pub struct ScanReport {
    pub prefix: SubnetPrefix,
    pub scanned: usize,
    pub found: Vec<DeviceStatus>,
}

pub struct Scanner {
    prober: Arc<dyn Prober>,
    registry: RegistryHandle,
    batch_size: usize,
    progress_tx: watch::Sender<ScanProgress>,
    running: Arc<Mutex<()>>,
}

impl Scanner {
    pub fn new(prober: Arc<dyn Prober>, registry: RegistryHandle) -> Self {
        Self {
            prober,
            registry,
            batch_size: DEFAULT_BATCH_SIZE,
            progress_tx: watch::Sender::new(ScanProgress::default()),
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn progress(&self) -> watch::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Scan a subnet and wait for it to finish.
    pub async fn scan(&self, prefix: Option<&str>) -> Result<ScanReport, ScanError> {
        let prefix = resolve_prefix(prefix)?;
        let guard = self.claim()?;
        self.sweep(prefix, guard).await
    }

    /// Start a scan in the background.
    ///
    /// Validation and the one-scan-at-a-time check happen before this
    /// returns, so callers can report those errors synchronously.
    pub fn spawn(
        self: &Arc<Self>,
        prefix: Option<&str>,
    ) -> Result<JoinHandle<Result<ScanReport, ScanError>>, ScanError> {
        let prefix = resolve_prefix(prefix)?;
        let guard = self.claim()?;
        let scanner = Arc::clone(self);
        Ok(tokio::spawn(
            async move { scanner.sweep(prefix, guard).await },
        ))
    }

    fn claim(&self) -> Result<OwnedMutexGuard<()>, ScanError> {
        Arc::clone(&self.running)
            .try_lock_owned()
            .map_err(|_| ScanError::AlreadyRunning)
    }

    async fn sweep(
        &self,
        prefix: SubnetPrefix,
        _guard: OwnedMutexGuard<()>,
    ) -> Result<ScanReport, ScanError> {
        let candidates = prefix.candidates();
        let total = candidates.len();
        let mut found: Vec<DeviceStatus> = Vec::new();
        let mut scanned = 0;

        info!(%prefix, total, batch_size = self.batch_size, "Network scan started");
        self.publish(prefix, scanned, total, 0, Vec::new(), true);

        for batch in candidates.chunks(self.batch_size) {
            self.publish(prefix, scanned, total, found.len(), batch.to_vec(), true);

            let results = join_all(batch.iter().map(|address| self.prober.probe(*address))).await;
            scanned += batch.len();

            let active: Vec<DeviceStatus> = results.into_iter().filter(|s| s.is_active).collect();
            if !active.is_empty() {
                for device in &active {
                    info!(address = %device.address, model = %device.model, "Found miner");
                }
                if let Err(e) = self.registry.upsert(active.clone()).await {
                    self.publish(prefix, scanned, total, found.len(), Vec::new(), false);
                    return Err(e.into());
                }
                found.extend(active);
            }
        }

        self.publish(prefix, scanned, total, found.len(), Vec::new(), false);
        if found.is_empty() {
            warn!(%prefix, "Network scan complete, no miners found");
        } else {
            info!(%prefix, found = found.len(), "Network scan complete");
        }

        Ok(ScanReport {
            prefix,
            scanned,
            found,
        })
    }

    fn publish(
        &self,
        prefix: SubnetPrefix,
        scanned: usize,
        total: usize,
        found: usize,
        in_flight: Vec<Ipv4Addr>,
        running: bool,
    ) {
        let percent = if total == 0 {
            100
        } else {
            (scanned * 100 / total) as u8
        };
        self.progress_tx.send_replace(ScanProgress {
            running,
            prefix: Some(prefix.to_string()),
            scanned,
            total,
            found,
            percent,
            in_flight,
        });
    }
}
