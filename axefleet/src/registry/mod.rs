//! The device registry.
//!
//! One actor task owns the device list. Everything else talks to it through
//! a cloneable [`RegistryHandle`]: mutations travel as commands over an
//! mpsc channel and are applied one at a time, and every committed list is
//! published on a watch channel so readers never wait on writers.
//!
//! ```text
//!   scanner ──┐                                 ┌──> list() / subscribe()
//!   refresh ──┼── Command ──> [ registry actor ]┤
//!   API     ──┘     (mpsc)        │   owns Vec  └──> DeviceStore::save()
//!                                 └── watch<Arc<[DeviceStatus]>>
//! ```

pub mod store;

use std::net::Ipv4Addr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::probe::Prober;
use crate::tracing::prelude::*;
use crate::types::DeviceStatus;

use store::DeviceStore;

/// Commands buffered ahead of the actor before senders wait.
const COMMAND_BUFFER: usize = 32;

/// A committed, immutable view of the registry.
pub type Snapshot = Arc<[DeviceStatus]>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid device address {0:?}")]
    InvalidAddress(String),

    #[error("no device registered at {0}")]
    NotFound(Ipv4Addr),

    #[error("registry is shut down")]
    Closed,
}

/// Result of [`RegistryHandle::add`].
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// The device was stored. `status.is_active` tells whether it answered.
    Added(DeviceStatus),
    /// The address was already registered; nothing changed.
    AlreadyExists,
}

/// Parse a user-supplied address.
///
/// Accepts a dotted-quad IPv4 host address. The unspecified and broadcast
/// addresses are rejected since no miner can live there.
pub fn parse_address(input: &str) -> Result<Ipv4Addr, RegistryError> {
    let invalid = || RegistryError::InvalidAddress(input.to_string());
    let address: Ipv4Addr = input.trim().parse().map_err(|_| invalid())?;
    if address.is_unspecified() || address.is_broadcast() {
        return Err(invalid());
    }
    Ok(address)
}

enum Command {
    Insert {
        status: DeviceStatus,
        reply: oneshot::Sender<AddOutcome>,
    },
    Remove {
        address: Ipv4Addr,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Rename {
        address: Ipv4Addr,
        name: Option<String>,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    ReplaceAll {
        statuses: Vec<DeviceStatus>,
        reply: oneshot::Sender<()>,
    },
    Upsert {
        statuses: Vec<DeviceStatus>,
        reply: oneshot::Sender<usize>,
    },
}

/// Start the registry actor, seeded from `store`.
///
/// Restored devices are marked inactive with their metrics cleared; the
/// refresh loop fills them in on its first pass. A store that cannot be
/// read is logged and treated as empty.
pub async fn start(store: Arc<dyn DeviceStore>, prober: Arc<dyn Prober>) -> RegistryHandle {
    let devices = match store.load().await {
        Ok(saved) => dedup_by_address(saved.iter().map(DeviceStatus::forget_metrics)),
        Err(e) => {
            error!(error = %e, "Failed to load saved devices, starting empty");
            Vec::new()
        }
    };
    info!(count = devices.len(), "Device registry loaded");

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::from(devices.clone()));

    let actor = Registry {
        devices,
        store,
        snapshot_tx,
        cmd_rx,
    };
    tokio::spawn(actor.run());

    RegistryHandle {
        cmd_tx,
        snapshot_rx,
        prober,
    }
}

fn dedup_by_address(devices: impl Iterator<Item = DeviceStatus>) -> Vec<DeviceStatus> {
    let mut out: Vec<DeviceStatus> = Vec::new();
    for device in devices {
        if !out.iter().any(|d| d.address == device.address) {
            out.push(device);
        }
    }
    out
}

/// Handle to the registry actor.
///
/// The actor stops once every handle has been dropped.
#[derive(Clone)]
pub struct RegistryHandle {
    cmd_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<Snapshot>,
    prober: Arc<dyn Prober>,
}

impl RegistryHandle {
    /// Latest committed device list, in registration order.
    pub fn list(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn get(&self, address: Ipv4Addr) -> Option<DeviceStatus> {
        self.snapshot_rx
            .borrow()
            .iter()
            .find(|d| d.address == address)
            .cloned()
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.snapshot_rx
            .borrow()
            .iter()
            .any(|d| d.address == address)
    }

    /// Receiver that is notified on every committed change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Register a device by address and probe it once.
    ///
    /// The address is validated before anything touches the network. The
    /// device is stored whether or not it answers.
    pub async fn add(&self, address: &str) -> Result<AddOutcome, RegistryError> {
        let address = parse_address(address)?;
        if self.contains(address) {
            return Ok(AddOutcome::AlreadyExists);
        }

        let status = self.prober.probe(address).await;
        if status.is_active {
            info!(%address, model = %status.model, "Device added");
        } else {
            warn!(%address, "Device added but not responding");
        }

        self.request(|reply| Command::Insert { status, reply })
            .await
    }

    pub async fn remove(&self, address: Ipv4Addr) -> Result<(), RegistryError> {
        self.request(|reply| Command::Remove { address, reply })
            .await?
    }

    /// Set or clear (empty `name`) the user label of a device.
    pub async fn rename(&self, address: Ipv4Addr, name: &str) -> Result<(), RegistryError> {
        let name = Some(name.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        self.request(|reply| Command::Rename {
            address,
            name,
            reply,
        })
        .await?
    }

    /// Apply a full refresh pass.
    ///
    /// Records replace the stored ones by address and keep their labels.
    /// Addresses that are no longer registered are ignored, so a device
    /// removed while its probe was in flight stays removed.
    pub async fn replace_all(&self, statuses: Vec<DeviceStatus>) -> Result<(), RegistryError> {
        self.request(|reply| Command::ReplaceAll { statuses, reply })
            .await
    }

    /// Merge scan results, adding unknown addresses. Returns how many
    /// devices were new.
    pub async fn upsert(&self, statuses: Vec<DeviceStatus>) -> Result<usize, RegistryError> {
        self.request(|reply| Command::Upsert { statuses, reply })
            .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RegistryError::Closed)?;
        rx.await.map_err(|_| RegistryError::Closed)
    }
}

/// Reply to a command, held back until its change is published.
enum Reply {
    Added(oneshot::Sender<AddOutcome>, AddOutcome),
    Done(
        oneshot::Sender<Result<(), RegistryError>>,
        Result<(), RegistryError>,
    ),
    Applied(oneshot::Sender<()>),
    Upserted(oneshot::Sender<usize>, usize),
}

impl Reply {
    fn send(self) {
        // A caller that gave up waiting is not an error.
        let _ = match self {
            Reply::Added(tx, outcome) => tx.send(outcome).map_err(drop),
            Reply::Done(tx, result) => tx.send(result).map_err(drop),
            Reply::Applied(tx) => tx.send(()).map_err(drop),
            Reply::Upserted(tx, added) => tx.send(added).map_err(drop),
        };
    }
}

struct Registry {
    devices: Vec<DeviceStatus>,
    store: Arc<dyn DeviceStore>,
    snapshot_tx: watch::Sender<Snapshot>,
    cmd_rx: mpsc::Receiver<Command>,
}

impl Registry {
    async fn run(mut self) {
        trace!("Registry task started.");

        while let Some(cmd) = self.cmd_rx.recv().await {
            let (changed, reply) = self.apply(cmd);
            if changed {
                self.publish();
            }
            // Callers must see their own change once they hear back.
            reply.send();
            if changed {
                self.persist().await;
            }
        }

        trace!("Registry task stopped.");
    }

    /// Apply one command to the in-memory list. Returns whether the list
    /// changed, and the reply to send once the change is published. Never
    /// suspends, so commands are atomic with respect to each other.
    fn apply(&mut self, cmd: Command) -> (bool, Reply) {
        match cmd {
            Command::Insert { status, reply } => {
                let outcome = if self.position(status.address).is_some() {
                    AddOutcome::AlreadyExists
                } else {
                    self.devices.push(status.clone());
                    AddOutcome::Added(status)
                };
                let changed = matches!(outcome, AddOutcome::Added(_));
                (changed, Reply::Added(reply, outcome))
            }

            Command::Remove { address, reply } => {
                let result = match self.position(address) {
                    Some(i) => {
                        self.devices.remove(i);
                        info!(%address, "Device removed");
                        Ok(())
                    }
                    None => Err(RegistryError::NotFound(address)),
                };
                (result.is_ok(), Reply::Done(reply, result))
            }

            Command::Rename {
                address,
                name,
                reply,
            } => {
                let result = match self.position(address) {
                    Some(i) => {
                        debug!(%address, name = ?name, "Device renamed");
                        self.devices[i].display_name = name;
                        Ok(())
                    }
                    None => Err(RegistryError::NotFound(address)),
                };
                (result.is_ok(), Reply::Done(reply, result))
            }

            Command::ReplaceAll { statuses, reply } => {
                let mut changed = false;
                for fresh in statuses {
                    if let Some(i) = self.position(fresh.address) {
                        self.replace_at(i, fresh);
                        changed = true;
                    }
                }
                (changed, Reply::Applied(reply))
            }

            Command::Upsert { statuses, reply } => {
                let mut added = 0;
                let changed = !statuses.is_empty();
                for fresh in statuses {
                    match self.position(fresh.address) {
                        Some(i) => self.replace_at(i, fresh),
                        None => {
                            info!(address = %fresh.address, "Discovered new device");
                            self.devices.push(fresh);
                            added += 1;
                        }
                    }
                }
                (changed, Reply::Upserted(reply, added))
            }
        }
    }

    fn position(&self, address: Ipv4Addr) -> Option<usize> {
        self.devices.iter().position(|d| d.address == address)
    }

    /// Replace a record wholesale, carrying the user's label over.
    fn replace_at(&mut self, index: usize, fresh: DeviceStatus) {
        let slot = &mut self.devices[index];
        let display_name = fresh.display_name.or_else(|| slot.display_name.take());
        *slot = DeviceStatus {
            display_name,
            ..fresh
        };
    }

    fn publish(&self) {
        self.snapshot_tx
            .send_replace(Snapshot::from(self.devices.clone()));
    }

    /// Write the list out. A failed write is logged; the in-memory list
    /// stays authoritative.
    async fn persist(&self) {
        if let Err(e) = self.store.save(&self.devices).await {
            error!(error = %e, "Failed to persist device list");
        }
    }
}
