//! Job control: decides and performs the next job side-effect for an owner
//!
//! Given an owner, the job name recorded in its status, and a factory for a
//! fresh job, [`JobControl::control_jobs`] classifies the situation into one
//! of the [`JobControlResult`] outcomes and performs the matching
//! side-effect (job creation or deletion). It consults the
//! [`ExpectationsLedger`] so that side-effects still in flight suppress
//! further action, and an indexed read model of existing jobs supplied by a
//! [`JobStore`].

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use rand::Rng;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::error::Error;
use crate::jobsync::expectations::ExpectationsLedger;

/// Identity of the owner object, as needed for job bookkeeping.
///
/// Job control never mutates the owner; it only needs enough identity to
/// list owned jobs and stamp owner references onto new ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerMeta {
    /// Namespace the owner (and its jobs) live in
    pub namespace: String,
    /// Owner name
    pub name: String,
    /// Owner UID, used to match controller owner references
    pub uid: String,
}

impl OwnerMeta {
    /// Extract the identity of a Kubernetes resource.
    ///
    /// Fails if the object has not been persisted yet (no namespace, name,
    /// or UID) since such an owner cannot own jobs.
    pub fn from_resource<K: Resource>(owner: &K) -> Result<Self, Error> {
        let meta = owner.meta();
        Ok(Self {
            namespace: meta
                .namespace
                .clone()
                .ok_or(Error::MissingMetadata("namespace"))?,
            name: meta.name.clone().ok_or(Error::MissingMetadata("name"))?,
            uid: meta.uid.clone().ok_or(Error::MissingMetadata("uid"))?,
        })
    }
}

/// A fresh job definition plus any auxiliary configuration artifacts
#[derive(Clone, Debug, PartialEq)]
pub struct JobSpecification {
    /// The job to create
    pub job: Job,
    /// Configuration consumed by the job, created before it
    pub config_map: Option<ConfigMap>,
}

/// Synthesizes a fresh job definition for the owner's current spec.
///
/// The factory closes over whatever configuration the strategy deems
/// appropriate; a factory obtained for a deleting owner produces an undo
/// job. The `name` is chosen by job control and is unique across retries.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobFactory: Send + Sync {
    /// Build the job (and auxiliary artifacts) under the given name
    async fn build_job(&self, name: &str) -> Result<JobSpecification, Error>;
}

/// Outcome of a [`JobControl::control_jobs`] call.
///
/// Outcomes that hand a job back to the caller carry it in the variant, so
/// "a job was working but no job was returned" is unrepresentable.
#[derive(Clone, Debug, PartialEq)]
pub enum JobControlResult {
    /// The current job reached `Complete=True`
    Succeeded(Box<Job>),
    /// The current job is still running
    Working(Box<Job>),
    /// The current job reached `Failed=True`
    Failed,
    /// A fresh job was created
    CreatingJob,
    /// Outdated jobs were deleted; a new job may be created on a later sync
    DeletingJobs,
    /// The recorded current job no longer exists in the read model
    LostCurrentJob,
    /// Prior side-effects have not been observed yet; do nothing
    PendingExpectations,
    /// Nothing to do
    NoWork,
}

/// Read model of existing jobs, indexed by owner.
#[cfg_attr(test, automock)]
pub trait JobStore: Send + Sync {
    /// Jobs in the owner's namespace whose controller owner reference
    /// matches the owner's UID
    fn owned_jobs(&self, owner: &OwnerMeta) -> Vec<Job>;
}

/// Write access to the batch subsystem.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BatchClient: Send + Sync {
    /// Create a job in the given namespace
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), Error>;

    /// Create a config map in the given namespace
    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap)
        -> Result<(), Error>;

    /// Delete a job; absent jobs are not an error
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Coordinates batch jobs on behalf of the sync engine.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobControl: Send + Sync {
    /// Decide and perform the next job side-effect for the owner.
    ///
    /// `key` identifies the owner in the expectations ledger,
    /// `current_job_name` is the job recorded in the owner's status, and
    /// `needs_processing` is the caller's verdict that a new job is
    /// required should no job be running.
    async fn control_jobs(
        &self,
        key: &str,
        owner: &OwnerMeta,
        current_job_name: Option<String>,
        needs_processing: bool,
        factory: Arc<dyn JobFactory>,
    ) -> Result<JobControlResult, Error>;

    /// Purge ledger state for a deleted owner
    fn observe_owner_deletion(&self, key: &str);

    /// The deterministic prefix used for naming jobs
    fn job_prefix(&self) -> &str;
}

/// Production [`JobControl`] over `batch/v1` Jobs.
pub struct BatchJobControl {
    job_prefix: String,
    owner_api_version: String,
    owner_kind: String,
    store: Arc<dyn JobStore>,
    client: Arc<dyn BatchClient>,
    expectations: Arc<ExpectationsLedger>,
}

impl BatchJobControl {
    /// Create a job control for owners of the given kind.
    ///
    /// `job_prefix` is prepended to every generated job name and is also
    /// the seed for the engine's finalizer; it conventionally ends in `-`.
    pub fn new(
        job_prefix: impl Into<String>,
        owner_api_version: impl Into<String>,
        owner_kind: impl Into<String>,
        store: Arc<dyn JobStore>,
        client: Arc<dyn BatchClient>,
        expectations: Arc<ExpectationsLedger>,
    ) -> Self {
        Self {
            job_prefix: job_prefix.into(),
            owner_api_version: owner_api_version.into(),
            owner_kind: owner_kind.into(),
            store,
            client,
            expectations,
        }
    }

    fn owner_reference(&self, owner: &OwnerMeta) -> OwnerReference {
        OwnerReference {
            api_version: self.owner_api_version.clone(),
            kind: self.owner_kind.clone(),
            name: owner.name.clone(),
            uid: owner.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    async fn delete_outdated_jobs(
        &self,
        key: &str,
        namespace: &str,
        jobs: &[Job],
    ) -> Result<(), Error> {
        for job in jobs {
            let name = job.metadata.name.as_deref().unwrap_or_default();
            info!(key, job = name, "deleting outdated job");
            self.client.delete_job(namespace, name).await?;
            // Raised only after the delete succeeded, so a transient error
            // never leaves the ledger waiting on a side-effect that was
            // not initiated.
            self.expectations.expect_deletions(key, 1);
        }
        Ok(())
    }

    async fn create_job(
        &self,
        key: &str,
        owner: &OwnerMeta,
        factory: Arc<dyn JobFactory>,
    ) -> Result<(), Error> {
        let name = format!(
            "{}{}-{}",
            self.job_prefix,
            owner.name,
            random_suffix(10)
        );
        let mut spec = factory.build_job(&name).await?;

        let owner_ref = self.owner_reference(owner);
        if let Some(config_map) = &mut spec.config_map {
            config_map
                .metadata
                .owner_references
                .get_or_insert_with(Vec::new)
                .push(owner_ref.clone());
            self.client
                .create_config_map(&owner.namespace, config_map)
                .await?;
        }
        spec.job
            .metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(owner_ref);
        self.client.create_job(&owner.namespace, &spec.job).await?;
        self.expectations.expect_creations(key, 1);
        info!(key, job = %name, "created job");
        Ok(())
    }
}

#[async_trait]
impl JobControl for BatchJobControl {
    async fn control_jobs(
        &self,
        key: &str,
        owner: &OwnerMeta,
        current_job_name: Option<String>,
        needs_processing: bool,
        factory: Arc<dyn JobFactory>,
    ) -> Result<JobControlResult, Error> {
        if !self.expectations.satisfied(key) {
            debug!(key, "expectations pending, standing down");
            return Ok(JobControlResult::PendingExpectations);
        }

        let owned = self.store.owned_jobs(owner);
        let (mut current, mut other): (Vec<Job>, Vec<Job>) = match current_job_name.as_deref() {
            Some(name) => owned
                .into_iter()
                .partition(|job| job.metadata.name.as_deref() == Some(name)),
            None => (Vec::new(), owned),
        };
        if current.len() > 1 {
            // Names are unique, so this cannot happen; treat everything as
            // outdated rather than guessing which copy to trust.
            other.append(&mut current);
        }

        if !other.is_empty() {
            // Outdated jobs are always removed before a new one is
            // created, preserving "at most one active job per owner".
            self.delete_outdated_jobs(key, &owner.namespace, &other)
                .await?;
            return Ok(JobControlResult::DeletingJobs);
        }

        if let Some(name) = current_job_name.as_deref() {
            match current.pop() {
                None => {
                    debug!(key, job = name, "recorded job not found in store");
                    return Ok(JobControlResult::LostCurrentJob);
                }
                Some(job) => {
                    if job_completed(&job) {
                        return Ok(JobControlResult::Succeeded(Box::new(job)));
                    }
                    if job_failed(&job) {
                        return Ok(JobControlResult::Failed);
                    }
                    return Ok(JobControlResult::Working(Box::new(job)));
                }
            }
        }

        if !needs_processing {
            return Ok(JobControlResult::NoWork);
        }

        self.create_job(key, owner, factory).await?;
        Ok(JobControlResult::CreatingJob)
    }

    fn observe_owner_deletion(&self, key: &str) {
        self.expectations.delete(key);
    }

    fn job_prefix(&self) -> &str {
        &self.job_prefix
    }
}

/// True iff the job carries a `Complete=True` condition
pub fn job_completed(job: &Job) -> bool {
    job_condition_true(job, "Complete")
}

/// True iff the job carries a `Failed=True` condition
pub fn job_failed(job: &Job) -> bool {
    job_condition_true(job, "Failed")
}

fn job_condition_true(job: &Job, condition_type: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map_or(false, |conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == condition_type && c.status == "True")
        })
}

// Alphabet without vowels and look-alikes, matching the apimachinery name
// generator, so generated names never spell anything or confuse an operator
// reading `kubectl get jobs`.
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}
