//! Daemon assembly.
//!
//! Wires the prober, registry, background tasks, and API server together
//! from a [`Config`], and runs them until cancelled.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::alerts::AlertMonitor;
use crate::api::{self, SharedState};
use crate::config::Config;
use crate::control::DeviceControl;
use crate::error::Result;
use crate::pool_api::{self, PoolApiClient};
use crate::probe::HttpProber;
use crate::refresh::RefreshLoop;
use crate::registry::{self, store::JsonFileStore};
use crate::scanner::Scanner;
use crate::tracing::prelude::*;

pub struct Daemon {
    config: Config,
    prober: Arc<HttpProber>,
    control: DeviceControl,
    pool: Option<PoolApiClient>,
}

impl Daemon {
    /// Build a daemon from `AXEFLEET_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env()?)
    }

    pub fn new(config: Config) -> Result<Self> {
        let prober = Arc::new(HttpProber::new()?.with_port(config.device_port));
        let control = DeviceControl::new()?.with_port(config.device_port);
        let pool = config
            .pool_api_url
            .as_deref()
            .map(PoolApiClient::new)
            .transpose()?;

        Ok(Self {
            config,
            prober,
            control,
            pool,
        })
    }

    /// Run until `cancellation` fires or the API server fails.
    pub async fn run(self, cancellation: CancellationToken) -> Result<()> {
        let config = self.config;
        info!(
            api = %config.api_addr,
            data_dir = %config.data_dir.display(),
            refresh = ?config.refresh_interval,
            pool = config.pool_api_url.as_deref().unwrap_or("none"),
            "Starting axefleetd"
        );

        let store = Arc::new(JsonFileStore::in_dir(&config.data_dir));
        let registry = registry::start(store, self.prober.clone()).await;

        let mut tasks = JoinSet::new();

        let refresh = RefreshLoop::new(self.prober.clone(), registry.clone())
            .with_interval(config.refresh_interval);
        tasks.spawn(refresh.run(cancellation.clone()));

        let monitor = AlertMonitor::new(config.temp_threshold_c);
        tasks.spawn(monitor.run(registry.subscribe(), cancellation.clone()));

        let (pool_tx, pool_rx) = watch::channel(None);
        if let Some(client) = self.pool {
            tasks.spawn(pool_api::monitor(client, pool_tx, cancellation.clone()));
        }

        let scanner = Arc::new(
            Scanner::new(self.prober, registry.clone()).with_batch_size(config.scan_batch_size),
        );

        let state = SharedState {
            registry,
            scanner,
            control: self.control,
            pool: pool_rx,
        };

        let result = api::serve(config.api_addr, state, cancellation.clone()).await;

        // The server also returns early on bind failure; stop the rest.
        cancellation.cancel();
        while tasks.join_next().await.is_some() {}

        info!("axefleetd stopped");
        result.map_err(Into::into)
    }
}
