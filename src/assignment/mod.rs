//! Work assignment for the process groups this backend serves.
//!
//! The planner store holds one planning entry per assigned process group:
//! the recorders known to belong to it and the window planner which paces
//! policy fetches, work issuance and window closure. Polls drive planners
//! forward opportunistically; the sweeper bounds how long a quiet group can
//! lag behind the clock.

pub mod planner;
pub mod recorder;
pub mod slot;
#[cfg(test)]
mod slot_test;

#[cfg(test)]
mod mod_test;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::StreamExt;
use metrics::{counter, gauge, register_counter, register_gauge};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::assignment::planner::{ClosedWindow, PlannerSettings, WindowPlanner, WorkIdSource};
use crate::assignment::recorder::{PollReceipt, RecorderDetail};
use crate::assignment::slot::WorkSlotPool;
use crate::config::Config;
use crate::error::AppError;
use crate::models::{ProcessGroup, RecorderIdentity};
use crate::wire::{self, WorkState};

pub const METRIC_POLLS_RECEIVED: &str = "fleetprof_polls_received";
pub const METRIC_ACTIVE_PLANNERS: &str = "fleetprof_active_planners";
pub const METRIC_WINDOWS_CLOSED: &str = "fleetprof_windows_closed";

/// A source of recording policies, consulted before each window opens.
#[async_trait]
pub trait PolicySource: Send + Sync + 'static {
    async fn fetch_policy(&self, process_group: &ProcessGroup) -> Result<wire::RecordingPolicy>;
}

/// The destination for closed aggregation windows.
#[async_trait]
pub trait WindowSink: Send + Sync + 'static {
    async fn window_closed(&self, window: ClosedWindow);
}

/// A window sink which records closures in the log only.
pub struct LogWindowSink;

#[async_trait]
impl WindowSink for LogWindowSink {
    async fn window_closed(&self, window: ClosedWindow) {
        tracing::info!(
            process_group = %window.process_group,
            outcome = ?window.outcome,
            work_id = window.work_id,
            "aggregation window closed"
        );
    }
}

/// A change to this backend's set of assigned process groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentChange {
    Added(ProcessGroup),
    Removed(ProcessGroup),
}

/// Diff the currently planned process groups against a newly received target set.
pub fn diff_assignments(current: &HashSet<ProcessGroup>, target: &HashSet<ProcessGroup>) -> Vec<AssignmentChange> {
    let mut changes: Vec<_> = target
        .difference(current)
        .map(|group| AssignmentChange::Added(group.clone()))
        .chain(current.difference(target).map(|group| AssignmentChange::Removed(group.clone())))
        .collect();
    changes.sort_by_key(|change| match change {
        AssignmentChange::Added(group) => (0, group.clone()),
        AssignmentChange::Removed(group) => (1, group.clone()),
    });
    changes
}

/// The planning state for one assigned process group.
struct PgEntry {
    process_group: ProcessGroup,
    recorders: DashMap<RecorderIdentity, Arc<RecorderDetail>>,
    planner: Mutex<WindowPlanner>,
}

/// All per-process-group planning state held by this backend.
pub struct PlannerStore {
    entries: DashMap<ProcessGroup, Arc<PgEntry>>,
    settings: PlannerSettings,
    recorder_defunct_threshold: Duration,
    policy_fetch_timeout: Duration,
    ids: Arc<WorkIdSource>,
    slots: Arc<WorkSlotPool>,
    policy: Arc<dyn PolicySource>,
    sink: Arc<dyn WindowSink>,
}

impl PlannerStore {
    pub fn new(config: &Config, slots: Arc<WorkSlotPool>, policy: Arc<dyn PolicySource>, sink: Arc<dyn WindowSink>) -> Arc<Self> {
        Self::with_parts(
            PlannerSettings::from_config(config),
            Duration::from_secs(config.recorder_defunct_threshold_secs),
            Duration::from_secs(config.policy_fetch_timeout_secs),
            WorkIdSource::new(config.backend_id),
            slots,
            policy,
            sink,
        )
    }

    pub fn with_parts(
        settings: PlannerSettings, recorder_defunct_threshold: Duration, policy_fetch_timeout: Duration,
        ids: Arc<WorkIdSource>, slots: Arc<WorkSlotPool>, policy: Arc<dyn PolicySource>, sink: Arc<dyn WindowSink>,
    ) -> Arc<Self> {
        register_counter!(METRIC_POLLS_RECEIVED, metrics::Unit::Count, "total number of recorder polls received");
        register_gauge!(METRIC_ACTIVE_PLANNERS, metrics::Unit::Count, "number of process groups currently planned by this backend");
        register_counter!(METRIC_WINDOWS_CLOSED, metrics::Unit::Count, "total number of aggregation windows closed");
        Arc::new(Self {
            entries: DashMap::new(),
            settings,
            recorder_defunct_threshold,
            policy_fetch_timeout,
            ids,
            slots,
            policy,
            sink,
        })
    }

    /// Begin planning for a process group newly assigned to this backend.
    pub fn associate_if_absent(&self, process_group: ProcessGroup) {
        self.entries.entry(process_group.clone()).or_insert_with(|| {
            tracing::info!(process_group = %process_group, "process group assigned, planner created");
            Arc::new(PgEntry {
                process_group: process_group.clone(),
                recorders: DashMap::new(),
                planner: Mutex::new(WindowPlanner::new(process_group, self.settings.clone(), self.ids.clone(), self.slots.clone())),
            })
        });
        gauge!(METRIC_ACTIVE_PLANNERS, self.entries.len() as f64);
    }

    /// Stop planning for a process group no longer assigned to this backend.
    ///
    /// Any in-flight window state is dropped, which also releases a held work
    /// slot reservation.
    pub fn deassociate(&self, process_group: &ProcessGroup) {
        if self.entries.remove(process_group).is_some() {
            tracing::info!(process_group = %process_group, "process group unassigned, planner dropped");
        }
        gauge!(METRIC_ACTIVE_PLANNERS, self.entries.len() as f64);
    }

    /// The set of process groups currently planned by this backend.
    pub fn assigned_process_groups(&self) -> HashSet<ProcessGroup> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Handle a recorder poll, returning the work assignment to respond with.
    ///
    /// A zero-valued assignment means "no work". Stale polls, defunct or busy
    /// recorders, and windows with work already issued all resolve to it.
    pub async fn handle_poll(
        &self, identity: RecorderIdentity, tick: u64, work_last_issued: wire::WorkResponse,
    ) -> Result<wire::WorkAssignment, AppError> {
        counter!(METRIC_POLLS_RECEIVED, 1);
        let entry = self
            .entries
            .get(&identity.process_group)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::InvalidInput(format!("process group {} is not assigned to this backend", identity.process_group)))?;

        let recorder = entry
            .recorders
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(RecorderDetail::new(identity.clone(), self.recorder_defunct_threshold)))
            .value()
            .clone();

        let receipt = recorder.receive_poll(tick, work_last_issued.clone());
        if receipt == PollReceipt::Stale {
            tracing::debug!(recorder = %recorder.identity(), tick, "ignoring stale recorder poll");
            return Ok(wire::WorkAssignment::default());
        }

        let mut planner = entry.planner.lock().await;
        if work_last_issued.work_id != 0 && work_last_issued.work_state == WorkState::Complete as i32 {
            planner.work_completed(work_last_issued.work_id);
        }
        if let Some(closed) = planner.advance(Instant::now()) {
            counter!(METRIC_WINDOWS_CLOSED, 1);
            self.sink.window_closed(closed).await;
        }
        if !recorder.can_accept_work() {
            return Ok(wire::WorkAssignment::default());
        }
        if planner.needs_policy(Instant::now()) {
            planner.begin_policy_fetch();
            match tokio::time::timeout(self.policy_fetch_timeout, self.policy.fetch_policy(&entry.process_group)).await {
                Ok(Ok(policy)) => planner.open_window(policy, Instant::now()),
                Ok(Err(err)) => {
                    tracing::error!(error = ?err, process_group = %entry.process_group, "error fetching recording policy");
                    planner.abort_policy_fetch();
                }
                Err(_) => {
                    tracing::error!(process_group = %entry.process_group, "timeout fetching recording policy");
                    planner.abort_policy_fetch();
                }
            }
        }
        Ok(planner.try_issue_work(Instant::now()).unwrap_or_default())
    }

    /// Advance every planner against the clock, delivering any closed windows.
    pub async fn sweep(&self) {
        let entries: Vec<_> = self.entries.iter().map(|entry| entry.value().clone()).collect();
        for entry in entries {
            let closed = entry.planner.lock().await.advance(Instant::now());
            if let Some(closed) = closed {
                counter!(METRIC_WINDOWS_CLOSED, 1);
                self.sink.window_closed(closed).await;
            }
        }
    }
}

/// A task which periodically advances all planners.
///
/// Polls already advance their own planner; the sweeper exists so windows of
/// groups with no polling recorders still close promptly.
pub struct WindowSweeper {
    store: Arc<PlannerStore>,
    interval: Duration,
    shutdown: BroadcastStream<()>,
}

impl WindowSweeper {
    pub fn new(store: Arc<PlannerStore>, interval: Duration, shutdown: broadcast::Receiver<()>) -> Self {
        Self { store, interval, shutdown: BroadcastStream::new(shutdown) }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        tracing::debug!("window sweeper started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.store.sweep().await,
                Some(_) = self.shutdown.next() => break,
            }
        }
        tracing::debug!("window sweeper shutdown");
        Ok(())
    }
}
