//! Test fixtures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::assignment::planner::{ClosedWindow, PlannerSettings, WorkIdSource};
use crate::assignment::slot::WorkSlotPool;
use crate::assignment::{PlannerStore, PolicySource, WindowSink};
use crate::models::{ProcessGroup, RecorderIdentity};
use crate::wire;

/// A distinct process group per index.
pub fn process_group(idx: u32) -> ProcessGroup {
    ProcessGroup {
        app_id: format!("app-{}", idx),
        cluster: "main".into(),
        proc_name: "svc".into(),
    }
}

/// A distinct recorder identity per index within the given process group.
pub fn recorder_identity(process_group: &ProcessGroup, idx: u32) -> RecorderIdentity {
    RecorderIdentity {
        process_group: process_group.clone(),
        hostname: format!("host-{}", idx),
        instance_id: format!("instance-{}", idx),
        ip: format!("10.0.1.{}", idx),
    }
}

/// The recorder info payload matching [`recorder_identity`].
pub fn recorder_info(process_group: &ProcessGroup, idx: u32, tick: u64) -> wire::RecorderInfo {
    wire::RecorderInfo {
        ip: format!("10.0.1.{}", idx),
        hostname: format!("host-{}", idx),
        app_id: process_group.app_id.clone(),
        cluster: process_group.cluster.clone(),
        proc_name: process_group.proc_name.clone(),
        instance_id: format!("instance-{}", idx),
        recorder_version: 1,
        recorder_tick: tick,
    }
}

pub fn recording_policy() -> wire::RecordingPolicy {
    wire::RecordingPolicy {
        duration_secs: 2,
        coverage_pct: 10,
        description: "cpu sampling".into(),
    }
}

/// Planner timings compressed into a few seconds for test use.
pub fn planner_settings_fast() -> PlannerSettings {
    PlannerSettings {
        window_duration: Duration::from_secs(10),
        window_end_tolerance: Duration::from_secs(2),
        policy_refresh_offset: Duration::from_secs(1),
        scheduling_buffer: Duration::from_secs(1),
        max_work_assignment_delay: Duration::from_secs(3),
    }
}

/// A policy source which always serves the same policy.
pub struct StaticPolicySource(pub wire::RecordingPolicy);

#[async_trait]
impl PolicySource for StaticPolicySource {
    async fn fetch_policy(&self, _process_group: &ProcessGroup) -> Result<wire::RecordingPolicy> {
        Ok(self.0.clone())
    }
}

/// A policy source which always fails.
pub struct FailingPolicySource;

#[async_trait]
impl PolicySource for FailingPolicySource {
    async fn fetch_policy(&self, process_group: &ProcessGroup) -> Result<wire::RecordingPolicy> {
        bail!("no policy available for {}", process_group)
    }
}

/// A window sink which discards closed windows.
pub struct NullWindowSink;

#[async_trait]
impl WindowSink for NullWindowSink {
    async fn window_closed(&self, _window: ClosedWindow) {}
}

/// A window sink which collects closed windows for inspection.
#[derive(Default)]
pub struct CollectingWindowSink {
    pub closed: Mutex<Vec<ClosedWindow>>,
}

#[async_trait]
impl WindowSink for CollectingWindowSink {
    async fn window_closed(&self, window: ClosedWindow) {
        self.closed.lock().await.push(window);
    }
}

/// A planner store on fast timings with the given slot capacity.
pub fn planner_store(capacity: usize, policy: Arc<dyn PolicySource>, sink: Arc<dyn WindowSink>) -> Arc<PlannerStore> {
    PlannerStore::with_parts(
        planner_settings_fast(),
        Duration::from_secs(60),
        Duration::from_secs(2),
        WorkIdSource::new(7),
        WorkSlotPool::new(capacity),
        policy,
        sink,
    )
}
