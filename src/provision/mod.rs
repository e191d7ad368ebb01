//! Playbook-based provisioning jobs
//!
//! Clusters are provisioned by running configuration-management playbooks
//! inside one-shot `batch/v1` Jobs. [`PlaybookJobFactory`] synthesizes the
//! job plus an inventory ConfigMap from a cluster's spec; job control picks
//! the name and owns creation ordering.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;

use crate::crd::StrataCluster;
use crate::error::Error;
use crate::jobsync::{JobFactory, JobSpecification};

const INVENTORY_MOUNT_PATH: &str = "/strata/inventory";
const INVENTORY_VOLUME: &str = "inventory";

/// Configuration for playbook job generation
#[derive(Clone, Debug)]
pub struct ProvisionConfig {
    /// Container image carrying the playbooks and their runtime
    pub image: String,
    /// Playbook that realizes the cluster spec
    pub provision_playbook: String,
    /// Playbook that tears the cluster back down
    pub deprovision_playbook: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            image: "quay.io/strata/playbook-runner:latest".to_string(),
            provision_playbook: "playbooks/cluster/provision.yml".to_string(),
            deprovision_playbook: "playbooks/cluster/deprovision.yml".to_string(),
        }
    }
}

/// Variables handed to the playbook alongside the inventory
#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
struct PlaybookVars<'a> {
    cluster_name: &'a str,
    kubernetes_version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_type: Option<&'a str>,
}

/// Builds playbook jobs for one cluster.
///
/// The factory closes over a snapshot of the cluster at sync time, so a
/// concurrent spec edit cannot tear the generated inventory.
pub struct PlaybookJobFactory {
    config: ProvisionConfig,
    cluster: StrataCluster,
    deleting: bool,
}

impl PlaybookJobFactory {
    /// Create a factory for the given cluster; `deleting` selects the
    /// deprovision playbook
    pub fn new(config: ProvisionConfig, cluster: StrataCluster, deleting: bool) -> Self {
        Self {
            config,
            cluster,
            deleting,
        }
    }

    fn playbook(&self) -> &str {
        if self.deleting {
            &self.config.deprovision_playbook
        } else {
            &self.config.provision_playbook
        }
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("strata.dev/cluster".to_string(), self.cluster.name_any()),
            (
                "strata.dev/purpose".to_string(),
                if self.deleting {
                    "deprovision".to_string()
                } else {
                    "provision".to_string()
                },
            ),
        ])
    }

    fn inventory(&self) -> String {
        let cluster_name = self.cluster.name_any();
        let spec = &self.cluster.spec;
        let mut out = String::new();

        out.push_str("[masters]\n");
        out.push_str(&host_range(&cluster_name, "master", spec.master_node_group.size));
        for group in &spec.compute_node_groups {
            out.push_str(&format!("\n[compute-{}]\n", group.name));
            out.push_str(&host_range(&cluster_name, &group.name, group.node_group.size));
        }
        out
    }

    fn vars(&self) -> Result<String, Error> {
        let spec = &self.cluster.spec;
        let hardware = spec.hardware.as_ref();
        let cluster_name = self.cluster.name_any();
        let vars = PlaybookVars {
            cluster_name: &cluster_name,
            kubernetes_version: &spec.kubernetes_version,
            provider: hardware.map(|h| h.provider.to_string()),
            region: hardware.and_then(|h| h.region.as_deref()),
            instance_type: hardware.and_then(|h| h.instance_type.as_deref()),
        };
        serde_yaml::to_string(&vars).map_err(|e| Error::serialization(e.to_string()))
    }

    fn config_map(&self, job_name: &str) -> Result<ConfigMap, Error> {
        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(inventory_config_map_name(job_name)),
                namespace: self.cluster.namespace(),
                labels: Some(self.labels()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                ("hosts".to_string(), self.inventory()),
                ("vars.yml".to_string(), self.vars()?),
            ])),
            ..Default::default()
        })
    }

    fn job(&self, name: &str) -> Job {
        let env = vec![
            EnvVar {
                name: "PLAYBOOK_FILE".to_string(),
                value: Some(self.playbook().to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "INVENTORY_FILE".to_string(),
                value: Some(format!("{INVENTORY_MOUNT_PATH}/hosts")),
                ..Default::default()
            },
            EnvVar {
                name: "VARS_FILE".to_string(),
                value: Some(format!("{INVENTORY_MOUNT_PATH}/vars.yml")),
                ..Default::default()
            },
            EnvVar {
                name: "CLUSTER_NAME".to_string(),
                value: Some(self.cluster.name_any()),
                ..Default::default()
            },
        ];

        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: self.cluster.namespace(),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                // The engine owns retries; a failed playbook run must
                // surface as Failed=True, not restart behind our back.
                backoff_limit: Some(0),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        containers: vec![Container {
                            name: "playbook".to_string(),
                            image: Some(self.config.image.clone()),
                            env: Some(env),
                            volume_mounts: Some(vec![VolumeMount {
                                name: INVENTORY_VOLUME.to_string(),
                                mount_path: INVENTORY_MOUNT_PATH.to_string(),
                                read_only: Some(true),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        volumes: Some(vec![Volume {
                            name: INVENTORY_VOLUME.to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: inventory_config_map_name(name),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl JobFactory for PlaybookJobFactory {
    async fn build_job(&self, name: &str) -> Result<JobSpecification, Error> {
        Ok(JobSpecification {
            config_map: Some(self.config_map(name)?),
            job: self.job(name),
        })
    }
}

/// Name of the inventory ConfigMap consumed by the given job
pub fn inventory_config_map_name(job_name: &str) -> String {
    format!("{job_name}-inventory")
}

fn host_range(cluster: &str, role: &str, size: u32) -> String {
    if size == 1 {
        format!("{cluster}-{role}-0\n")
    } else {
        format!("{cluster}-{role}-[0:{}]\n", size - 1)
    }
}
