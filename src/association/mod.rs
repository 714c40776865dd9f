//! Leader-side backend registry and process group placement.
//!
//! The leader learns about backends through their periodic load reports and
//! hands each process group to exactly one backend. Association sets are
//! written through to the coordination store before memory is updated, so a
//! leader failover never observes a placement that was not persisted.


use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::{Context, Result};
use dashmap::DashMap;
use metrics::{gauge, register_gauge};
use time::OffsetDateTime;

use crate::config::Config;
use crate::error::AppError;
use crate::models::ProcessGroup;
use crate::store::CoordinationStore;
use crate::utils;
use crate::wire;

pub const METRIC_KNOWN_BACKENDS: &str = "fleetprof_known_backends";

/// The coordination store prefix under which association sets are persisted,
/// one key per backend address.
pub const ASSOCIATIONS_PREFIX: &str = "/fleetprof/associations";

struct BackendState {
    last_reported_load: Option<f32>,
    last_reported_at: OffsetDateTime,
    last_report_tick: u64,
    process_groups: HashSet<ProcessGroup>,
}

/// The leader's view of one reporting backend.
pub struct BackendRecord {
    address: String,
    reporting_interval_secs: u64,
    max_allowed_missed_reports: u64,
    state: Mutex<BackendState>,
}

impl BackendRecord {
    /// Track a backend. It counts as defunct until its first load report.
    fn new(address: String, reporting_interval_secs: u64, max_allowed_missed_reports: u64) -> Self {
        Self {
            address,
            reporting_interval_secs,
            max_allowed_missed_reports,
            state: Mutex::new(BackendState {
                last_reported_load: None,
                last_reported_at: OffsetDateTime::UNIX_EPOCH,
                last_report_tick: 0,
                process_groups: HashSet::new(),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Apply a load report.
    ///
    /// Report ticks are monotonic per backend; a lower tick marks a delayed
    /// duplicate and is rejected. The zero tick is the reset sentinel a
    /// restarted backend opens with.
    pub fn report_load(&self, load: f32, tick: u64) -> bool {
        let mut state = self.state.lock().expect("backend state lock poisoned");
        if tick != 0 && tick < state.last_report_tick {
            return false;
        }
        state.last_report_tick = tick;
        state.last_reported_load = Some(load);
        state.last_reported_at = OffsetDateTime::now_utc();
        true
    }

    pub fn is_defunct(&self) -> bool {
        self.is_defunct_at(OffsetDateTime::now_utc())
    }

    /// Check if the backend has missed too many consecutive load reports as
    /// of the given instant.
    pub fn is_defunct_at(&self, now: OffsetDateTime) -> bool {
        let last = self.state.lock().expect("backend state lock poisoned").last_reported_at;
        (now - last).whole_seconds() > (self.reporting_interval_secs * (self.max_allowed_missed_reports + 1)) as i64
    }

    fn associate(&self, process_group: ProcessGroup) {
        self.state.lock().expect("backend state lock poisoned").process_groups.insert(process_group);
    }

    fn deassociate(&self, process_group: &ProcessGroup) {
        self.state.lock().expect("backend state lock poisoned").process_groups.remove(process_group);
    }

    pub fn process_groups(&self) -> HashSet<ProcessGroup> {
        self.state.lock().expect("backend state lock poisoned").process_groups.clone()
    }

    pub fn association_count(&self) -> usize {
        self.state.lock().expect("backend state lock poisoned").process_groups.len()
    }

    #[allow(dead_code)]
    pub fn last_reported_load(&self) -> Option<f32> {
        self.state.lock().expect("backend state lock poisoned").last_reported_load
    }
}

/// Serialize an association set for the coordination store.
///
/// Entries are sorted so identical sets always produce identical bytes.
pub fn serialize_process_groups(groups: &HashSet<ProcessGroup>) -> Result<Vec<u8>> {
    let mut sorted: Vec<_> = groups.iter().collect();
    sorted.sort();
    let set = wire::ProcessGroupSet {
        process_group: sorted.into_iter().map(wire::ProcessGroup::from).collect(),
    };
    utils::encode_model(&set)
}

/// Parse an association set out of its persisted form.
pub fn parse_process_groups(data: &[u8]) -> Result<HashSet<ProcessGroup>> {
    let set: wire::ProcessGroupSet = utils::decode_model(data).context("error decoding persisted association set")?;
    Ok(set.process_group.into_iter().map(ProcessGroup::from).collect())
}

/// The registry of reporting backends and their process group placements.
///
/// Lives on every node but is only driven on the current leader.
pub struct BackendRegistry {
    backends: DashMap<String, Arc<BackendRecord>>,
    associations: DashMap<ProcessGroup, String>,
    store: Arc<dyn CoordinationStore>,
    reporting_interval_secs: u64,
    max_allowed_missed_reports: u64,
}

impl BackendRegistry {
    pub fn new(config: &Config, store: Arc<dyn CoordinationStore>) -> Arc<Self> {
        register_gauge!(METRIC_KNOWN_BACKENDS, metrics::Unit::Count, "number of backends known to the leader");
        Arc::new(Self {
            backends: DashMap::new(),
            associations: DashMap::new(),
            store,
            reporting_interval_secs: config.load_report_interval_secs,
            max_allowed_missed_reports: config.max_allowed_missed_reports,
        })
    }

    /// Rehydrate placements persisted by a previous leader.
    pub async fn load_from_store(&self) -> Result<()> {
        let prefix = format!("{}/", ASSOCIATIONS_PREFIX);
        let entries = self.store.list(&prefix).await.context("error listing persisted association sets")?;
        for (key, value) in entries {
            let address = match key.strip_prefix(&prefix) {
                Some(address) if !address.is_empty() => address.to_string(),
                _ => continue,
            };
            let groups = parse_process_groups(&value)?;
            let record = Arc::new(BackendRecord::new(
                address.clone(),
                self.reporting_interval_secs,
                self.max_allowed_missed_reports,
            ));
            for group in &groups {
                record.associate(group.clone());
                self.associations.insert(group.clone(), address.clone());
            }
            tracing::info!(backend = %address, groups = groups.len(), "rehydrated persisted association set");
            self.backends.insert(address, record);
        }
        gauge!(METRIC_KNOWN_BACKENDS, self.backends.len() as f64);
        Ok(())
    }

    /// Apply a backend load report, returning the process groups currently
    /// placed on it.
    ///
    /// A report carrying a stale tick is a delayed duplicate: its load and
    /// freshness are ignored, but the caller still gets its placement set.
    pub fn report_load(&self, address: &str, load: f32, tick: u64) -> HashSet<ProcessGroup> {
        let record = self
            .backends
            .entry(address.to_string())
            .or_insert_with(|| {
                tracing::info!(backend = %address, "new backend reported in");
                Arc::new(BackendRecord::new(
                    address.to_string(),
                    self.reporting_interval_secs,
                    self.max_allowed_missed_reports,
                ))
            })
            .value()
            .clone();
        gauge!(METRIC_KNOWN_BACKENDS, self.backends.len() as f64);

        if !record.report_load(load, tick) {
            tracing::debug!(backend = %address, tick, "ignoring stale load report");
        }
        record.process_groups()
    }

    /// Place a process group on a backend, returning the backend's address.
    ///
    /// An existing placement on a live backend is sticky. Otherwise the live
    /// backend carrying the fewest groups wins, with ties broken by address.
    /// The updated set is persisted before memory is touched.
    pub async fn associate(&self, process_group: ProcessGroup) -> Result<String, AppError> {
        let existing = self.associations.get(&process_group).map(|entry| entry.value().clone());
        let displaced = match existing {
            Some(address) => {
                let record = self.backends.get(&address).map(|entry| entry.value().clone());
                match record {
                    Some(record) if !record.is_defunct() => return Ok(address),
                    record => record,
                }
            }
            None => None,
        };

        let mut candidates: Vec<_> = self
            .backends
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|record| !record.is_defunct())
            .collect();
        candidates.sort_by(|a, b| {
            a.association_count()
                .cmp(&b.association_count())
                .then_with(|| a.address().cmp(b.address()))
        });
        let target = candidates.into_iter().next().ok_or(AppError::NoBackendAvailable)?;

        let mut new_groups = target.process_groups();
        new_groups.insert(process_group.clone());
        self.persist(target.address(), &new_groups).await?;
        target.associate(process_group.clone());
        self.associations.insert(process_group.clone(), target.address().to_string());
        tracing::info!(process_group = %process_group, backend = %target.address(), "process group placed");

        // The displaced backend's persisted set shrinks best effort; a failure
        // here leaves the group doubly listed, which resolves on its next report.
        if let Some(old) = displaced {
            old.deassociate(&process_group);
            if let Err(err) = self.persist(old.address(), &old.process_groups()).await {
                tracing::error!(error = ?err, backend = %old.address(), "error persisting shrunken association set");
            }
        }
        Ok(target.address().to_string())
    }

    /// Check if the given process group is currently placed on the given backend.
    pub fn is_associated(&self, process_group: &ProcessGroup, address: &str) -> bool {
        self.associations
            .get(process_group)
            .map(|entry| entry.value() == address)
            .unwrap_or(false)
    }

    pub fn association_for(&self, process_group: &ProcessGroup) -> Option<String> {
        self.associations.get(process_group).map(|entry| entry.value().clone())
    }

    async fn persist(&self, address: &str, groups: &HashSet<ProcessGroup>) -> Result<(), AppError> {
        let data = serialize_process_groups(groups)?;
        self.store
            .put(&format!("{}/{}", ASSOCIATIONS_PREFIX, address), data)
            .await
            .map_err(|_| AppError::StoreUnavailable)
    }
}
