//! Supporting types for the StrataCluster CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Infrastructure provider the provisioning playbooks target
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ProviderType {
    /// Amazon Web Services
    #[default]
    Aws,
    /// Libvirt/KVM for local development
    Libvirt,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::Libvirt => write!(f, "libvirt"),
        }
    }
}

/// Provider-level hardware configuration shared by all node groups
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSpec {
    /// Infrastructure provider
    #[serde(default)]
    pub provider: ProviderType,

    /// Provider region (e.g., us-east-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Instance type applied to node groups that do not override it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
}

/// A homogeneous group of nodes
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    /// Number of nodes in the group
    pub size: u32,

    /// Instance type override for this group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
}

impl NodeGroup {
    /// Validate the node group
    pub fn validate(&self, role: &str) -> Result<(), crate::Error> {
        if self.size == 0 {
            return Err(crate::Error::validation(format!(
                "{role} node group must have at least 1 node"
            )));
        }
        Ok(())
    }
}

/// A named compute node group
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeNodeGroup {
    /// Group name, unique within the cluster
    pub name: String,

    /// Node group sizing
    #[serde(flatten)]
    pub node_group: NodeGroup,
}

/// Status of a condition (True, False, Unknown)
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The state of the condition cannot be determined
    #[default]
    Unknown,
}

/// A condition on a StrataCluster's status
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Processing, Processed)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned between statuses
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,

    /// Last time the condition was probed
    #[serde(rename = "lastProbeTime")]
    pub last_probe_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with both timestamps set to now
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now,
            last_probe_time: now,
        }
    }
}
