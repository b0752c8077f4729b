//! Periodic re-probe of every registered device.
//!
//! The loop idles while the registry is empty. Once a device is registered
//! it starts a ticker; each tick probes every registered address at once
//! and hands the whole pass to the registry as a single update. When the
//! registry empties again the ticker is dropped.
//!
//! A pass is awaited inside the loop, so two passes never overlap. Ticks
//! that come due while a pass is still running are skipped.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::probe::Prober;
use crate::registry::{RegistryError, RegistryHandle, Snapshot};
use crate::tracing::prelude::*;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

pub struct RefreshLoop {
    prober: Arc<dyn Prober>,
    registry: RegistryHandle,
    interval: Duration,
}

impl RefreshLoop {
    pub fn new(prober: Arc<dyn Prober>, registry: RegistryHandle) -> Self {
        Self {
            prober,
            registry,
            interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(self, cancellation: CancellationToken) {
        let mut devices = self.registry.subscribe();
        trace!("Refresh task started.");

        loop {
            // Idle until there is something to refresh.
            tokio::select! {
                _ = cancellation.cancelled() => break,
                open = async { devices.wait_for(|list| !list.is_empty()).await.is_ok() } => {
                    if !open {
                        break;
                    }
                }
            }
            debug!("Registry non-empty, refresh ticker started");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        trace!("Refresh task stopped.");
                        return;
                    }
                    open = async { devices.wait_for(|list| list.is_empty()).await.is_ok() } => {
                        if !open {
                            trace!("Refresh task stopped.");
                            return;
                        }
                        debug!("Registry empty, refresh ticker stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh_once().await {
                            warn!(error = %e, "Refresh pass could not be applied");
                            return;
                        }
                    }
                }
            }
        }

        trace!("Refresh task stopped.");
    }

    /// Probe every registered device once and apply the results.
    ///
    /// A device that fails its probe comes back inactive; it is never
    /// dropped from the registry.
    #[instrument(level = "debug", skip_all)]
    pub async fn refresh_once(&self) -> Result<(), RegistryError> {
        let snapshot: Snapshot = self.registry.list();
        if snapshot.is_empty() {
            return Ok(());
        }

        let statuses = join_all(snapshot.iter().map(|d| self.prober.probe(d.address))).await;
        let online = statuses.iter().filter(|s| s.is_active).count();
        debug!(
            devices = statuses.len(),
            online,
            offline = statuses.len() - online,
            "Refresh pass complete"
        );

        self.registry.replace_all(statuses).await
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::registry::{self, store::MemoryStore};
    use crate::test_support::ScriptedProber;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    async fn setup(prober: Arc<ScriptedProber>) -> (RefreshLoop, RegistryHandle) {
        let registry = registry::start(Arc::new(MemoryStore::default()), prober.clone()).await;
        let refresh = RefreshLoop::new(prober, registry.clone());
        (refresh, registry)
    }

    #[tokio::test]
    async fn failed_probe_marks_inactive_without_removing() {
        let prober = Arc::new(ScriptedProber::default());
        prober.set_online(ip(5), 550.0, 16.0);
        prober.set_online(ip(6), 400.0, 12.0);
        let (refresh, registry) = setup(prober.clone()).await;
        registry.add("10.0.0.5").await.unwrap();
        registry.add("10.0.0.6").await.unwrap();

        prober.set_offline(ip(6));
        refresh.refresh_once().await.unwrap();

        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert!(list[0].is_active);
        assert!(!list[1].is_active);
        assert_eq!(list[1].hash_rate, 0.0);
    }

    #[tokio::test]
    async fn refresh_keeps_user_labels() {
        let prober = Arc::new(ScriptedProber::default());
        prober.set_online(ip(5), 550.0, 16.0);
        let (refresh, registry) = setup(prober).await;
        registry.add("10.0.0.5").await.unwrap();
        registry.rename(ip(5), "garage").await.unwrap();

        refresh.refresh_once().await.unwrap();

        assert_eq!(
            registry.get(ip(5)).unwrap().display_name.as_deref(),
            Some("garage")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_registry_does_no_work() {
        let prober = Arc::new(ScriptedProber::default());
        let (refresh, _registry) = setup(prober.clone()).await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(refresh.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(prober.calls(), 0);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_while_devices_exist() {
        let prober = Arc::new(ScriptedProber::default());
        let (refresh, registry) = setup(prober.clone()).await;
        registry.add("10.0.0.5").await.unwrap();
        assert_eq!(prober.calls(), 1);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(refresh.run(cancel.clone()));

        // First tick is immediate, then one per interval.
        tokio::time::sleep(DEFAULT_REFRESH_INTERVAL * 2 + Duration::from_millis(10)).await;
        assert_eq!(prober.calls(), 1 + 3);

        registry.remove(ip(5)).await.unwrap();
        tokio::time::sleep(DEFAULT_REFRESH_INTERVAL * 4).await;
        assert_eq!(prober.calls(), 4);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_passes_never_overlap() {
        let prober = Arc::new(ScriptedProber::with_delay(Duration::from_secs(12)));
        let (refresh, registry) = setup(prober.clone()).await;
        registry.add("10.0.0.5").await.unwrap();
        registry.add("10.0.0.6").await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(refresh.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(60)).await;
        cancel.cancel();
        task.await.unwrap();

        // One pass probes both devices at once; passes themselves are serial.
        assert_eq!(prober.peak_in_flight(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_on_a_worker_thread() {
        let prober = Arc::new(ScriptedProber::default());
        let (refresh, registry) = setup(prober.clone()).await;
        registry.add("10.0.0.5").await.unwrap();

        let cancel = CancellationToken::new();
        let refresh = refresh.with_interval(Duration::from_millis(20));
        let task = tokio::spawn(refresh.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while prober.calls() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        registry.remove(ip(5)).await.unwrap();
        cancel.cancel();
        task.await.unwrap();
    }
}
