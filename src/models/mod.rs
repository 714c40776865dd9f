//! Internal data models.
//!
//! The wire types carry protobuf baggage which makes them poor map keys, so the
//! domain keys used throughout the assignment and association layers live here.

use std::fmt;

use crate::wire;

/// The identity of a group of processes profiled as one unit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessGroup {
    pub app_id: String,
    pub cluster: String,
    pub proc_name: String,
}

impl fmt::Display for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_id, self.cluster, self.proc_name)
    }
}

impl From<wire::ProcessGroup> for ProcessGroup {
    fn from(src: wire::ProcessGroup) -> Self {
        Self {
            app_id: src.app_id,
            cluster: src.cluster,
            proc_name: src.proc_name,
        }
    }
}

impl From<&ProcessGroup> for wire::ProcessGroup {
    fn from(src: &ProcessGroup) -> Self {
        Self {
            app_id: src.app_id.clone(),
            cluster: src.cluster.clone(),
            proc_name: src.proc_name.clone(),
        }
    }
}

impl ProcessGroup {
    /// Extract the process group identity embedded in a recorder info payload.
    pub fn from_recorder_info(info: &wire::RecorderInfo) -> Self {
        Self {
            app_id: info.app_id.clone(),
            cluster: info.cluster.clone(),
            proc_name: info.proc_name.clone(),
        }
    }
}

/// The stable identity of a single recorder instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecorderIdentity {
    pub process_group: ProcessGroup,
    pub hostname: String,
    pub instance_id: String,
    pub ip: String,
}

impl From<&wire::RecorderInfo> for RecorderIdentity {
    fn from(info: &wire::RecorderInfo) -> Self {
        Self {
            process_group: ProcessGroup::from_recorder_info(info),
            hostname: info.hostname.clone(),
            instance_id: info.instance_id.clone(),
            ip: info.ip.clone(),
        }
    }
}

impl fmt::Display for RecorderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.process_group, self.hostname, self.instance_id)
    }
}
