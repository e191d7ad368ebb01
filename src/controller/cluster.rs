//! StrataCluster controller implementation
//!
//! The concrete half of the job sync engine: a [`ClusterSyncStrategy`] that
//! knows how to load clusters, fingerprint their specs, and persist status;
//! production implementations of the engine's client traits; and the
//! `reconcile`/`error_policy` pair plugged into the kube runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::Store;
use kube::{Client, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::{error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{ConditionStatus, StrataCluster, StrataClusterStatus};
use crate::error::Error;
use crate::jobsync::conditions::{set_condition, JobSyncConditionType, UpdateConditionPolicy};
use crate::jobsync::{
    BatchClient, JobFactory, JobStore, JobSync, JobSyncStrategy, OwnerMeta,
};
use crate::provision::{PlaybookJobFactory, ProvisionConfig};

/// Prefix for cluster provisioning job names; also seeds the finalizer
pub const CLUSTER_JOB_PREFIX: &str = "job-cluster-";

/// Field manager identifying this controller's writes
const FIELD_MANAGER: &str = "strata-cluster-operator";

/// How often a healthy cluster is resynced even without watch events
const RESYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Trait abstracting Kubernetes client operations for StrataCluster
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a cluster by namespace and name
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<StrataCluster, Error>;

    /// Patch the status subresource of a cluster
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StrataClusterStatus,
    ) -> Result<(), Error>;

    /// Replace the finalizer list on a cluster
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<StrataCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<StrataCluster, Error> {
        Ok(self.api(namespace).get(name).await?)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StrataClusterStatus,
    ) -> Result<(), Error> {
        let status_patch = serde_json::json!({ "status": status });
        self.api(namespace)
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await?;
        Ok(())
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), Error> {
        let meta_patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        self.api(namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&meta_patch),
            )
            .await?;
        Ok(())
    }
}

/// Production batch client over the Kubernetes API
pub struct KubeBatchClient {
    client: Client,
}

impl KubeBatchClient {
    /// Create a new KubeBatchClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchClient for KubeBatchClient {
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), job).await?;
        Ok(())
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            // Already gone is the outcome we wanted.
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The controller owner reference of a job, if it has one
pub(crate) fn controller_owner(job: &Job) -> Option<&OwnerReference> {
    job.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Job read-model backed by the jobs reflector cache
pub struct ReflectorJobStore {
    store: Store<Job>,
}

impl ReflectorJobStore {
    /// Create a store over the given reflector cache
    pub fn new(store: Store<Job>) -> Self {
        Self { store }
    }
}

impl JobStore for ReflectorJobStore {
    fn owned_jobs(&self, owner: &OwnerMeta) -> Vec<Job> {
        self.store
            .state()
            .iter()
            .filter(|job| job.metadata.namespace.as_deref() == Some(owner.namespace.as_str()))
            .filter(|job| {
                controller_owner(job).map(|r| r.uid.as_str()) == Some(owner.uid.as_str())
            })
            .map(|job| (**job).clone())
            .collect()
    }
}

/// SHA-256 fingerprint of a cluster spec's canonical JSON encoding
fn spec_hash(cluster: &StrataCluster) -> Result<String, Error> {
    let encoded =
        serde_json::to_vec(&cluster.spec).map_err(|e| Error::serialization(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

/// Derive the work-queue key for a cluster
pub fn cluster_key(cluster: &StrataCluster) -> Result<String, Error> {
    let namespace = cluster
        .metadata
        .namespace
        .as_deref()
        .ok_or(Error::MissingMetadata("namespace"))?;
    let name = cluster
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingMetadata("name"))?;
    Ok(format!("{namespace}/{name}"))
}

fn parse_key(key: &str) -> Result<(&str, &str), Error> {
    match key.split('/').collect::<Vec<_>>()[..] {
        [namespace, name] if !namespace.is_empty() && !name.is_empty() => Ok((namespace, name)),
        _ => Err(Error::InvalidKey(key.to_string())),
    }
}

/// Owner-specific behavior of the sync engine for StrataCluster.
///
/// Spec change detection hashes the spec and compares it against the
/// fingerprint recorded in status by `on_job_completion`. Failure counting
/// is plain bookkeeping; the engine imposes no retry limit.
pub struct ClusterSyncStrategy {
    client: Arc<dyn ClusterClient>,
    provision: ProvisionConfig,
}

impl ClusterSyncStrategy {
    /// Create a strategy over the given client and provisioning config
    pub fn new(client: Arc<dyn ClusterClient>, provision: ProvisionConfig) -> Self {
        Self { client, provision }
    }
}

#[async_trait]
impl JobSyncStrategy for ClusterSyncStrategy {
    type Owner = StrataCluster;

    async fn get_owner(&self, key: &str) -> Result<StrataCluster, Error> {
        let (namespace, name) = parse_key(key)?;
        self.client.get_cluster(namespace, name).await
    }

    fn does_owner_need_processing(&self, owner: &StrataCluster) -> bool {
        let current = match spec_hash(owner) {
            Ok(hash) => hash,
            Err(err) => {
                warn!(error = %err, "failed to fingerprint spec, forcing processing");
                return true;
            }
        };
        let provisioned = owner
            .status
            .as_ref()
            .and_then(|s| s.provisioned_spec_hash.as_deref());
        provisioned != Some(current.as_str())
    }

    fn current_job(&self, owner: &StrataCluster) -> Option<String> {
        owner.status.as_ref().and_then(|s| s.provision_job.clone())
    }

    fn set_current_job(&self, owner: &mut StrataCluster, name: Option<&str>) {
        owner
            .status
            .get_or_insert_with(StrataClusterStatus::default)
            .provision_job = name.map(|n| n.to_string());
    }

    fn get_job_factory(
        &self,
        owner: &StrataCluster,
        deleting: bool,
    ) -> Result<Arc<dyn JobFactory>, Error> {
        Ok(Arc::new(PlaybookJobFactory::new(
            self.provision.clone(),
            owner.clone(),
            deleting,
        )))
    }

    fn set_job_sync_condition(
        &self,
        owner: &mut StrataCluster,
        condition_type: JobSyncConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        policy: UpdateConditionPolicy,
    ) {
        let status_block = owner.status.get_or_insert_with(StrataClusterStatus::default);
        set_condition(
            &mut status_block.conditions,
            condition_type,
            status,
            reason,
            message,
            policy,
        );
    }

    fn on_job_completion(&self, owner: &mut StrataCluster) {
        let hash = match spec_hash(owner) {
            Ok(hash) => hash,
            Err(err) => {
                error!(error = %err, "failed to fingerprint spec on completion");
                return;
            }
        };
        let status = owner.status.get_or_insert_with(StrataClusterStatus::default);
        status.provisioned_spec_hash = Some(hash);
        status.provision_failures = 0;
    }

    fn on_job_failure(&self, owner: &mut StrataCluster) {
        owner
            .status
            .get_or_insert_with(StrataClusterStatus::default)
            .provision_failures += 1;
    }

    async fn update_owner_status(
        &self,
        original: &StrataCluster,
        updated: &StrataCluster,
    ) -> Result<(), Error> {
        let status_changed = original.status != updated.status;
        let finalizers_changed = original.metadata.finalizers != updated.metadata.finalizers;
        if !status_changed && !finalizers_changed {
            return Ok(());
        }

        let namespace = updated
            .metadata
            .namespace
            .as_deref()
            .ok_or(Error::MissingMetadata("namespace"))?;
        let name = updated
            .metadata
            .name
            .as_deref()
            .ok_or(Error::MissingMetadata("name"))?;

        if status_changed {
            let status = updated.status.clone().unwrap_or_default();
            self.client.patch_status(namespace, name, &status).await?;
        }
        // Finalizers last: removing the engine's finalizer may let the API
        // server finish deleting the object, after which no further write
        // can land.
        if finalizers_changed {
            let finalizers = updated.metadata.finalizers.clone().unwrap_or_default();
            self.client
                .set_finalizers(namespace, name, &finalizers)
                .await?;
        }
        info!(
            cluster = name,
            status_changed, finalizers_changed, "persisted owner update"
        );
        Ok(())
    }
}

/// Controller context shared across reconciliations
pub struct Context {
    /// The job sync engine for StrataCluster owners
    pub job_sync: JobSync<ClusterSyncStrategy>,
}

/// Reconcile a StrataCluster resource
///
/// Adapts work-queue dispatch to the sync engine: derives the owner key,
/// runs one idempotent sync pass, and schedules a periodic resync so the
/// expectations-ledger deadline can take effect even without watch events.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(
    cluster: Arc<StrataCluster>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    if let Err(e) = cluster.spec.validate() {
        warn!(error = %e, "cluster validation failed");
        // Validation errors require a spec change; no point in retrying.
        return Ok(Action::await_change());
    }

    let key = cluster_key(&cluster)?;
    ctx.job_sync.sync(&key).await?;
    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Error policy for the controller: requeue with a delay and let the
/// runtime's backoff take over
pub fn error_policy(cluster: Arc<StrataCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %cluster.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(15))
}
