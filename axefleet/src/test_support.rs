//! Scripted devices for exercising the engine without a network.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::probe::Prober;
use crate::types::DeviceStatus;

/// Prober that answers from a table and records how it was called.
///
/// Addresses not in the table are inactive. With a delay set, each probe
/// sleeps first, which makes concurrency observable under a paused clock.
#[derive(Default)]
pub struct ScriptedProber {
    responses: Mutex<HashMap<Ipv4Addr, DeviceStatus>>,
    probed: Mutex<Vec<Ipv4Addr>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedProber {
    pub fn with_delay(delay: Duration) -> Self {
        let prober = Self::default();
        *prober.delay.lock() = delay;
        prober
    }

    pub fn set_online(&self, address: Ipv4Addr, hash_rate: f64, power_w: f64) {
        let mut status = DeviceStatus::inactive(address);
        status.is_active = true;
        status.hash_rate = hash_rate;
        status.power_w = power_w;
        status.model = "BM1366".into();
        self.set_response(status);
    }

    pub fn set_response(&self, status: DeviceStatus) {
        self.responses.lock().insert(status.address, status);
    }

    pub fn set_offline(&self, address: Ipv4Addr) {
        self.responses.lock().remove(&address);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Addresses in the order their probes started.
    pub fn probed(&self) -> Vec<Ipv4Addr> {
        self.probed.lock().clone()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, address: Ipv4Addr) -> DeviceStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.probed.lock().push(address);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.responses
            .lock()
            .get(&address)
            .cloned()
            .unwrap_or_else(|| DeviceStatus::inactive(address))
    }
}
