//! The backend daemon and its leader-bound HTTP client.
//!
//! Every backend periodically reports its load to the current leader. The
//! leader answers with the process groups placed on the reporting backend,
//! and the daemon reconciles its local planners against that target set.


use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures::stream::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::assignment::{diff_assignments, AssignmentChange, PlannerStore, PolicySource};
use crate::assignment::slot::WorkSlotPool;
use crate::config::Config;
use crate::election::LeaderCell;
use crate::error::AppError;
use crate::models::ProcessGroup;
use crate::utils;
use crate::wire;

/// An HTTP client for leader-bound requests.
pub struct LeaderClient {
    client: reqwest::Client,
    cell: Arc<LeaderCell>,
}

impl LeaderClient {
    pub fn new(config: &Config, cell: Arc<LeaderCell>) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.leader_request_timeout_secs))
            .build()
            .context("error building leader HTTP client")?;
        Ok(Arc::new(Self { client, cell }))
    }

    fn leader_url(&self, path: &str) -> Result<String, AppError> {
        let leader = self.cell.current().ok_or(AppError::LeaderUnknown)?;
        Ok(format!("{}{}", leader.base_url(), path))
    }

    /// Report this backend's load, returning the process groups the leader
    /// has placed on it.
    pub async fn report_load(&self, report: &wire::LoadReportRequest) -> Result<std::collections::HashSet<ProcessGroup>> {
        let url = self.leader_url("/load").map_err(|err| anyhow::anyhow!(err))?;
        let response = self
            .client
            .post(&url)
            .body(utils::encode_model(report)?)
            .send()
            .await
            .context("error sending load report to leader")?;
        if !response.status().is_success() {
            bail!("leader rejected load report with status {}", response.status());
        }
        let body = response.bytes().await.context("error reading load report response")?;
        let set: wire::ProcessGroupSet = utils::decode_model(&body)?;
        Ok(set.process_group.into_iter().map(ProcessGroup::from).collect())
    }

    /// Relay a recorder's association request to the leader verbatim.
    pub async fn forward_association(&self, body: Bytes) -> Result<(StatusCode, Vec<u8>), AppError> {
        let url = self.leader_url("/association")?;
        let response = self
            .client
            .put(&url)
            .body(body)
            .send()
            .await
            .context("error relaying association request to leader")?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .context("leader responded with an unrepresentable status")?;
        let body = response.bytes().await.context("error reading relayed association response")?;
        Ok((status, body.to_vec()))
    }
}

#[async_trait]
impl PolicySource for LeaderClient {
    async fn fetch_policy(&self, process_group: &ProcessGroup) -> Result<wire::RecordingPolicy> {
        let url = self.leader_url("/work").map_err(|err| anyhow::anyhow!(err))?;
        let response = self
            .client
            .get(&url)
            .query(&[
                ("app_id", process_group.app_id.as_str()),
                ("cluster", process_group.cluster.as_str()),
                ("proc_name", process_group.proc_name.as_str()),
            ])
            .send()
            .await
            .context("error fetching recording policy from leader")?;
        if !response.status().is_success() {
            bail!("leader rejected policy fetch with status {}", response.status());
        }
        let body = response.bytes().await.context("error reading recording policy response")?;
        utils::decode_model(&body)
    }
}

/// The periodic load report and assignment reconciliation loop.
pub struct BackendDaemon {
    config: Arc<Config>,
    cell: Arc<LeaderCell>,
    planners: Arc<PlannerStore>,
    client: Arc<LeaderClient>,
    slots: Arc<WorkSlotPool>,
    tick: u64,
    shutdown: BroadcastStream<()>,
}

impl BackendDaemon {
    pub fn new(
        config: Arc<Config>, cell: Arc<LeaderCell>, planners: Arc<PlannerStore>, client: Arc<LeaderClient>,
        slots: Arc<WorkSlotPool>, shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            cell,
            planners,
            client,
            slots,
            tick: 0,
            shutdown: BroadcastStream::new(shutdown),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        tracing::debug!("backend daemon started");
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.load_report_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.report_cycle().await,
                Some(_) = self.shutdown.next() => break,
            }
        }
        tracing::debug!("backend daemon shutdown");
        Ok(())
    }

    /// Report load to the leader and reconcile planners against its answer.
    ///
    /// The report tick only advances on a successful round trip, so the
    /// leader can spot delayed duplicates. A failed cycle changes nothing
    /// locally and the next interval retries.
    async fn report_cycle(&mut self) {
        if self.cell.current().is_none() {
            tracing::debug!("leader unknown, skipping load report");
            return;
        }
        let report = wire::LoadReportRequest {
            ip: self.config.ip_address.clone(),
            port: self.config.backend_port as u32,
            load: self.slots.load_factor(),
            curr_tick: self.tick,
        };
        let target = match self.client.report_load(&report).await {
            Ok(target) => target,
            Err(err) => {
                tracing::error!(error = ?err, "error reporting load to leader");
                return;
            }
        };
        self.tick += 1;

        let current = self.planners.assigned_process_groups();
        for change in diff_assignments(&current, &target) {
            match change {
                AssignmentChange::Added(group) => self.planners.associate_if_absent(group),
                AssignmentChange::Removed(group) => self.planners.deassociate(&group),
            }
        }
    }
}
