//! The pluggable capability bundle consumed by the sync engine
//!
//! The engine is generic over the owner type. Everything owner-specific
//! (loading, spec fingerprinting, job factory selection, status
//! persistence) lives behind this trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::crd::ConditionStatus;
use crate::error::Error;
use crate::jobsync::conditions::{JobSyncConditionType, UpdateConditionPolicy};
use crate::jobsync::job_control::JobFactory;

/// Owner-type-specific behavior for [`JobSync`](crate::jobsync::JobSync).
///
/// The engine only ever mutates clones of the owner (`Owner: Clone` plays
/// the role of deep copy); implementations persist the result in
/// [`update_owner_status`](Self::update_owner_status), which must detect
/// no-op updates and skip them.
#[async_trait]
pub trait JobSyncStrategy: Send + Sync {
    /// The owner object reconciled by the engine
    type Owner: kube::Resource + Clone + Send + Sync + 'static;

    /// Load the owner by work-queue key; a deleted owner surfaces as a
    /// not-found error ([`Error::is_not_found`])
    async fn get_owner(&self, key: &str) -> Result<Self::Owner, Error>;

    /// Whether the owner's spec requires a fresh processing job, typically
    /// by comparing the spec against a fingerprint stored in status
    fn does_owner_need_processing(&self, owner: &Self::Owner) -> bool;

    /// The job name recorded in the owner's status, if any
    fn current_job(&self, owner: &Self::Owner) -> Option<String>;

    /// Record (or clear) the current job name in the owner's status
    fn set_current_job(&self, owner: &mut Self::Owner, name: Option<&str>);

    /// Obtain a factory for a fresh job; for `deleting` owners the factory
    /// produces an undo job
    fn get_job_factory(
        &self,
        owner: &Self::Owner,
        deleting: bool,
    ) -> Result<Arc<dyn JobFactory>, Error>;

    /// Set a managed condition on the owner's status
    fn set_job_sync_condition(
        &self,
        owner: &mut Self::Owner,
        condition_type: JobSyncConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        policy: UpdateConditionPolicy,
    );

    /// Hook invoked when a processing job completed; records the spec
    /// fingerprint so future syncs can detect change
    fn on_job_completion(&self, owner: &mut Self::Owner);

    /// Hook invoked when the processing job was lost; bookkeeping for
    /// retry counters
    fn on_job_failure(&self, owner: &mut Self::Owner);

    /// Persist `updated` if it differs from `original`; a no-op when the
    /// status and finalizers are unchanged
    async fn update_owner_status(
        &self,
        original: &Self::Owner,
        updated: &Self::Owner,
    ) -> Result<(), Error>;
}
