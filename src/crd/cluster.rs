//! StrataCluster Custom Resource Definition
//!
//! A StrataCluster declares a Kubernetes cluster that Strata realizes by
//! running one-shot provisioning jobs. The status half carries the sync
//! engine's bookkeeping: managed conditions, the current provisioning job,
//! and the fingerprint of the last spec that was provisioned successfully.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ComputeNodeGroup, Condition, HardwareSpec, NodeGroup};

/// Specification for a StrataCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "StrataCluster",
    plural = "strataclusters",
    shortname = "sc",
    status = "StrataClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.kubernetesVersion"}"#,
    printcolumn = r#"{"name":"Job","type":"string","jsonPath":".status.provisionJob"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StrataClusterSpec {
    /// Kubernetes version to provision (e.g., "1.31.0")
    pub kubernetes_version: String,

    /// Provider-level hardware configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<HardwareSpec>,

    /// Control-plane node group
    pub master_node_group: NodeGroup,

    /// Additional compute node groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compute_node_groups: Vec<ComputeNodeGroup>,
}

impl StrataClusterSpec {
    /// Validate the cluster specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.kubernetes_version.is_empty() {
            return Err(crate::Error::validation("kubernetesVersion must be set"));
        }

        self.master_node_group.validate("master")?;

        let mut seen = std::collections::HashSet::new();
        for group in &self.compute_node_groups {
            if group.name.is_empty() {
                return Err(crate::Error::validation(
                    "compute node group name must not be empty",
                ));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(crate::Error::validation(format!(
                    "duplicate compute node group name: {}",
                    group.name
                )));
            }
            group.node_group.validate(&group.name)?;
        }

        Ok(())
    }
}

/// Status for a StrataCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrataClusterStatus {
    /// Conditions managed by the job sync engine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Name of the provisioning job currently associated with this cluster.
    /// Serialized even when empty so a merge patch can clear it.
    #[serde(default)]
    pub provision_job: Option<String>,

    /// Fingerprint of the last spec that was provisioned successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_spec_hash: Option<String>,

    /// Consecutive provisioning failures since the last success
    #[serde(default)]
    pub provision_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::ProviderType;

    fn sample_spec() -> StrataClusterSpec {
        StrataClusterSpec {
            kubernetes_version: "1.31.0".to_string(),
            hardware: Some(HardwareSpec {
                provider: ProviderType::Aws,
                region: Some("us-east-1".to_string()),
                instance_type: Some("m5.large".to_string()),
            }),
            master_node_group: NodeGroup {
                size: 3,
                instance_type: None,
            },
            compute_node_groups: vec![ComputeNodeGroup {
                name: "compute".to_string(),
                node_group: NodeGroup {
                    size: 2,
                    instance_type: None,
                },
            }],
        }
    }

    #[test]
    fn valid_spec_passes_validation() {
        assert!(sample_spec().validate().is_ok());
    }

    #[test]
    fn empty_version_is_rejected() {
        let mut spec = sample_spec();
        spec.kubernetes_version = String::new();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn zero_size_master_group_is_rejected() {
        let mut spec = sample_spec();
        spec.master_node_group.size = 0;
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("master"));
    }

    #[test]
    fn duplicate_compute_group_names_are_rejected() {
        let mut spec = sample_spec();
        spec.compute_node_groups.push(ComputeNodeGroup {
            name: "compute".to_string(),
            node_group: NodeGroup {
                size: 1,
                instance_type: None,
            },
        });
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn status_roundtrips_through_json() {
        let status = StrataClusterStatus {
            conditions: Vec::new(),
            provision_job: Some("job-cluster-prod-abc123".to_string()),
            provisioned_spec_hash: Some("deadbeef".to_string()),
            provision_failures: 2,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["provisionJob"], "job-cluster-prod-abc123");
        let back: StrataClusterStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
