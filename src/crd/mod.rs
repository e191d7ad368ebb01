//! Custom Resource Definitions for Strata
//!
//! This module contains all CRD definitions used by the Strata operator.

mod cluster;
mod types;

pub use cluster::{StrataCluster, StrataClusterSpec, StrataClusterStatus};
pub use types::{
    ComputeNodeGroup, Condition, ConditionStatus, HardwareSpec, NodeGroup, ProviderType,
};
