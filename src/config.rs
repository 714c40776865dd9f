//! Runtime configuration.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The IP address this node advertises to the leader and to recorders.
    pub ip_address: String,
    /// The port serving recorder and backend↔leader traffic.
    pub backend_port: u16,
    /// The numeric identifier of this backend, unique across the fleet.
    ///
    /// This value forms the high 32 bits of every work id minted by this node,
    /// which is what keeps work ids collision-free without central coordination.
    pub backend_id: u32,

    /// The interval at which this node reports its load to the leader.
    #[serde(default = "Config::default_load_report_interval_secs")]
    pub load_report_interval_secs: u64,
    /// The number of load reports a backend may miss before the leader treats it as defunct.
    #[serde(default = "Config::default_max_allowed_missed_reports")]
    pub max_allowed_missed_reports: u64,
    /// The silence threshold after which a recorder is treated as defunct.
    #[serde(default = "Config::default_recorder_defunct_threshold_secs")]
    pub recorder_defunct_threshold_secs: u64,
    /// The maximum number of concurrently in-flight work assignments issued by this node.
    #[serde(default = "Config::default_max_simultaneous_work")]
    pub max_simultaneous_work: usize,

    /// The duration of each aggregation window.
    #[serde(default = "Config::default_window_duration_mins")]
    pub window_duration_mins: u64,
    /// The tolerance past a window's end time before it is finalized.
    #[serde(default = "Config::default_window_end_tolerance_secs")]
    pub window_end_tolerance_secs: u64,
    /// The minimum gap between recording-policy fetches for a process group.
    #[serde(default = "Config::default_policy_refresh_offset_secs")]
    pub policy_refresh_offset_secs: u64,
    /// How far ahead of a window boundary scheduling may begin.
    #[serde(default = "Config::default_scheduling_buffer_secs")]
    pub scheduling_buffer_secs: u64,
    /// The bound on how long issued work may remain outstanding before it is timed out.
    #[serde(default = "Config::default_max_work_assignment_delay_secs")]
    pub max_work_assignment_delay_secs: u64,
    /// The interval at which expired aggregation windows are swept closed.
    #[serde(default = "Config::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// The timeout applied to policy fetches from the leader.
    #[serde(default = "Config::default_policy_fetch_timeout_secs")]
    pub policy_fetch_timeout_secs: u64,
    /// The timeout applied to all other outbound calls to the leader.
    #[serde(default = "Config::default_leader_request_timeout_secs")]
    pub leader_request_timeout_secs: u64,

    /// The maximum size of a length-delimited message in a submitted profile stream.
    #[serde(default = "Config::default_max_profile_message_size")]
    pub max_profile_message_size: usize,
    /// The recording duration handed out in the default recording policy.
    #[serde(default = "Config::default_profile_duration_secs")]
    pub profile_duration_secs: u32,
    /// The recorder coverage percentage handed out in the default recording policy.
    #[serde(default = "Config::default_profile_coverage_pct")]
    pub profile_coverage_pct: u32,
}

impl Config {
    /// Create a new config instance from the runtime environment.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        Ok(config)
    }

    /// The address on which other nodes reach this one.
    pub fn advertised_address(&self) -> String {
        format!("{}:{}", self.ip_address, self.backend_port)
    }

    fn default_load_report_interval_secs() -> u64 {
        10
    }

    fn default_max_allowed_missed_reports() -> u64 {
        2
    }

    fn default_recorder_defunct_threshold_secs() -> u64 {
        120
    }

    fn default_max_simultaneous_work() -> usize {
        10
    }

    fn default_window_duration_mins() -> u64 {
        30
    }

    fn default_window_end_tolerance_secs() -> u64 {
        120
    }

    fn default_policy_refresh_offset_secs() -> u64 {
        300
    }

    fn default_scheduling_buffer_secs() -> u64 {
        30
    }

    fn default_max_work_assignment_delay_secs() -> u64 {
        120
    }

    fn default_sweep_interval_secs() -> u64 {
        1
    }

    fn default_policy_fetch_timeout_secs() -> u64 {
        10
    }

    fn default_leader_request_timeout_secs() -> u64 {
        10
    }

    fn default_max_profile_message_size() -> usize {
        4 * 1024 * 1024
    }

    fn default_profile_duration_secs() -> u32 {
        120
    }

    fn default_profile_coverage_pct() -> u32 {
        10
    }

    /// Create a config instance for tests.
    #[cfg(test)]
    pub fn new_test() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            rust_log: "error".into(),
            ip_address: "127.0.0.1".into(),
            backend_port: 7501,
            backend_id: 7,
            load_report_interval_secs: 1,
            max_allowed_missed_reports: 1,
            recorder_defunct_threshold_secs: 120,
            max_simultaneous_work: 4,
            window_duration_mins: 30,
            window_end_tolerance_secs: 120,
            policy_refresh_offset_secs: 300,
            scheduling_buffer_secs: 30,
            max_work_assignment_delay_secs: 120,
            sweep_interval_secs: 1,
            policy_fetch_timeout_secs: 1,
            leader_request_timeout_secs: 1,
            max_profile_message_size: 4 * 1024 * 1024,
            profile_duration_secs: 120,
            profile_coverage_pct: 10,
        })
    }
}
