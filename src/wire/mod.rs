//! Wire messages exchanged between recorders, backends and the leader.
//!
//! These are hand-maintained prost models; the binary-over-HTTP surface encodes
//! every request and response body with these types.

/// The identity of a process group, unique by the app/cluster/process triple.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessGroup {
    #[prost(string, tag = "1")]
    pub app_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub cluster: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub proc_name: ::prost::alloc::string::String,
}

/// A set of process groups; entries are unique by the app/cluster/process triple.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessGroupSet {
    #[prost(message, repeated, tag = "1")]
    pub process_group: ::prost::alloc::vec::Vec<ProcessGroup>,
}

/// Identifying attributes of a recorder instance, reported on every poll.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecorderInfo {
    #[prost(string, tag = "1")]
    pub ip: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub hostname: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub app_id: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub cluster: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub proc_name: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub instance_id: ::prost::alloc::string::String,
    #[prost(uint32, tag = "7")]
    pub recorder_version: u32,
    /// Monotonic poll counter; the zero value is a reset sentinel.
    #[prost(uint64, tag = "8")]
    pub recorder_tick: u64,
}

/// The recorder's view of the work it was last issued.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkResponse {
    /// The id of the last issued work; zero when no work was ever issued.
    #[prost(uint64, tag = "1")]
    pub work_id: u64,
    #[prost(enumeration = "WorkState", tag = "2")]
    pub work_state: i32,
}

/// The state of a work assignment as reported by a recorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum WorkState {
    None = 0,
    Ongoing = 1,
    Complete = 2,
}

/// A recorder poll request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollRequest {
    #[prost(message, optional, tag = "1")]
    pub recorder_info: ::core::option::Option<RecorderInfo>,
    #[prost(message, optional, tag = "2")]
    pub work_last_issued: ::core::option::Option<WorkResponse>,
}

/// A unit of profiling work handed to a recorder.
///
/// A zero-valued work id is the "no assignment" sentinel.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkAssignment {
    #[prost(uint64, tag = "1")]
    pub work_id: u64,
    #[prost(uint32, tag = "2")]
    pub delay_secs: u32,
    #[prost(uint32, tag = "3")]
    pub duration_secs: u32,
    #[prost(uint32, tag = "4")]
    pub coverage_pct: u32,
    #[prost(string, tag = "5")]
    pub description: ::prost::alloc::string::String,
}

/// The backend's response to a recorder poll.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollResponse {
    #[prost(message, optional, tag = "1")]
    pub assignment: ::core::option::Option<WorkAssignment>,
    #[prost(uint32, tag = "2")]
    pub controller_id: u32,
}

/// A backend's periodic load report to the leader.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadReportRequest {
    #[prost(string, tag = "1")]
    pub ip: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
    #[prost(float, tag = "3")]
    pub load: f32,
    #[prost(uint64, tag = "4")]
    pub curr_tick: u64,
}

/// A recorder's request to be associated with a backend.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AssociationRequest {
    #[prost(message, optional, tag = "1")]
    pub recorder_info: ::core::option::Option<RecorderInfo>,
}

/// The backend a recorder should direct its polls to.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AssociationResponse {
    #[prost(string, tag = "1")]
    pub host: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
}

/// A recording policy descriptor distributed by the leader.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordingPolicy {
    #[prost(uint32, tag = "1")]
    pub duration_secs: u32,
    #[prost(uint32, tag = "2")]
    pub coverage_pct: u32,
    #[prost(string, tag = "3")]
    pub description: ::prost::alloc::string::String,
}

/// The header leading every recorder-submitted profile stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordingHeader {
    #[prost(uint32, tag = "1")]
    pub recorder_version: u32,
    #[prost(uint32, tag = "2")]
    pub controller_version: u32,
    #[prost(uint32, tag = "3")]
    pub controller_id: u32,
    #[prost(message, optional, tag = "4")]
    pub work_assignment: ::core::option::Option<WorkAssignment>,
}
