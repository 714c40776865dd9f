//! Fleetprof application.
//!
//! Builds the shared state, spawns the long-lived tasks, and coordinates a
//! graceful shutdown across all of them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::assignment::slot::WorkSlotPool;
use crate::assignment::{LogWindowSink, PlannerStore, WindowSink, WindowSweeper};
use crate::association::BackendRegistry;
use crate::config::Config;
use crate::daemon::{BackendDaemon, LeaderClient};
use crate::election::{ElectionConsumer, ElectionOutcome, LeaderCell, LeaderRef};
use crate::server::{AppServer, AppState};
use crate::store::MemoryCoordinationStore;

/// The Fleetprof backend application.
pub struct App {
    shutdown_tx: broadcast::Sender<()>,
    /// Held so the election watch channel outlives the consumer task.
    _election_tx: watch::Sender<ElectionOutcome>,
    election_handle: JoinHandle<Result<()>>,
    sweeper_handle: JoinHandle<Result<()>>,
    daemon_handle: JoinHandle<Result<()>>,
    server_handle: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance, spawning all long-lived tasks.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);

        let cell = LeaderCell::new(&config);
        let store = MemoryCoordinationStore::new();
        let registry = BackendRegistry::new(&config, store);
        registry.load_from_store().await?;

        let slots = WorkSlotPool::new(config.max_simultaneous_work);
        let leader_client = LeaderClient::new(&config, cell.clone())?;
        let sink: Arc<dyn WindowSink> = Arc::new(LogWindowSink);
        let planners = PlannerStore::new(&config, slots.clone(), leader_client.clone(), sink);

        let (election_tx, election_rx) = watch::channel(ElectionOutcome::Unknown);
        let election_handle = ElectionConsumer::new(cell.clone(), election_rx, shutdown_tx.subscribe()).spawn();
        // The in-memory coordination store has no peers to contest the role,
        // so this node assumes leadership at startup.
        election_tx
            .send(ElectionOutcome::Elected(LeaderRef {
                host: config.ip_address.clone(),
                port: config.backend_port,
            }))
            .context("error publishing initial election outcome")?;

        let sweeper_handle = WindowSweeper::new(
            planners.clone(),
            Duration::from_secs(config.sweep_interval_secs),
            shutdown_tx.subscribe(),
        )
        .spawn();
        let daemon_handle = BackendDaemon::new(
            config.clone(),
            cell.clone(),
            planners.clone(),
            leader_client.clone(),
            slots,
            shutdown_tx.subscribe(),
        )
        .spawn();

        let state = Arc::new(AppState {
            config: config.clone(),
            cell,
            planners,
            registry,
            leader_client,
        });
        let server_handle = AppServer::new(config, state, shutdown_tx.clone()).spawn();

        Ok(Self {
            shutdown_tx,
            _election_tx: election_tx,
            election_handle,
            sweeper_handle,
            daemon_handle,
            server_handle,
        })
    }

    /// Run until a shutdown signal arrives, then wind all tasks down.
    pub async fn spawn(self) -> Result<()> {
        tokio::signal::ctrl_c().await.context("error awaiting shutdown signal")?;
        tracing::info!("shutdown signal received");
        let _ = self.shutdown_tx.send(());

        let tasks = [
            ("http server", self.server_handle),
            ("backend daemon", self.daemon_handle),
            ("window sweeper", self.sweeper_handle),
            ("election consumer", self.election_handle),
        ];
        for (task, handle) in tasks {
            match handle.await {
                Ok(Ok(())) => (),
                Ok(Err(err)) => tracing::error!(error = ?err, task, "task exited with error"),
                Err(err) => tracing::error!(error = ?err, task, "task join error"),
            }
        }
        tracing::info!("shutdown complete");
        Ok(())
    }
}
