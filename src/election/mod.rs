//! Leader role tracking.
//!
//! Election itself is settled through the coordination store; this module
//! tracks the outcome. The [`LeaderCell`] holds the currently known leader for
//! lock-free reads on every request path, and the [`ElectionConsumer`] task
//! keeps it in sync with the election watch channel until shutdown.


use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwapOption;
use futures::stream::StreamExt;
use metrics::{gauge, register_gauge};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

use crate::config::Config;

pub const METRIC_IS_LEADER: &str = "fleetprof_is_leader";

/// The network location of the cluster leader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderRef {
    pub host: String,
    pub port: u16,
}

impl LeaderRef {
    /// The base URL for leader-bound HTTP requests.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// The outcome of a round of leader election.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// No leader is currently known.
    Unknown,
    /// The given node holds the leader role.
    Elected(LeaderRef),
}

/// The current leader as last observed by this node.
pub struct LeaderCell {
    current: ArcSwapOption<LeaderRef>,
    self_host: String,
    self_port: u16,
}

impl LeaderCell {
    pub fn new(config: &Config) -> Arc<Self> {
        register_gauge!(METRIC_IS_LEADER, metrics::Unit::Count, "1 if this node currently holds the leader role, else 0");
        Arc::new(Self {
            current: ArcSwapOption::const_empty(),
            self_host: config.ip_address.clone(),
            self_port: config.backend_port,
        })
    }

    /// The currently known leader, if any.
    pub fn current(&self) -> Option<Arc<LeaderRef>> {
        self.current.load_full()
    }

    /// Record a new election outcome.
    pub fn set(&self, outcome: ElectionOutcome) {
        match outcome {
            ElectionOutcome::Unknown => self.current.store(None),
            ElectionOutcome::Elected(leader) => self.current.store(Some(Arc::new(leader))),
        }
        let is_leader = if self.is_self_leader() { 1.0 } else { 0.0 };
        gauge!(METRIC_IS_LEADER, is_leader);
    }

    /// Check if this node currently holds the leader role.
    pub fn is_self_leader(&self) -> bool {
        match self.current.load().as_deref() {
            Some(leader) => leader.host == self.self_host && leader.port == self.self_port,
            None => false,
        }
    }
}

/// A task which applies election outcomes to the leader cell as they arrive.
pub struct ElectionConsumer {
    cell: Arc<LeaderCell>,
    outcomes: WatchStream<ElectionOutcome>,
    shutdown: BroadcastStream<()>,
}

impl ElectionConsumer {
    pub fn new(cell: Arc<LeaderCell>, outcomes: watch::Receiver<ElectionOutcome>, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            cell,
            outcomes: WatchStream::new(outcomes),
            shutdown: BroadcastStream::new(shutdown),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        tracing::debug!("election consumer started");
        loop {
            tokio::select! {
                Some(outcome) = self.outcomes.next() => self.handle_outcome(outcome),
                Some(_) = self.shutdown.next() => break,
            }
        }
        tracing::debug!("election consumer shutdown");
        Ok(())
    }

    fn handle_outcome(&mut self, outcome: ElectionOutcome) {
        match &outcome {
            ElectionOutcome::Unknown => tracing::info!("leader is currently unknown"),
            ElectionOutcome::Elected(leader) => tracing::info!(host = %leader.host, port = leader.port, "new leader elected"),
        }
        self.cell.set(outcome);
    }
}
