//! The job sync engine
//!
//! [`JobSync`] is the top-level reconciler for owners whose realization
//! requires running a one-shot batch job. Each [`sync`](JobSync::sync) call
//! loads the owner, classifies the situation (normal vs. being-deleted),
//! asks [`JobControl`] which job-control outcome applies, and translates
//! that outcome into a status mutation on the owner: managed conditions,
//! the current-job pointer, and the finalizer that guarantees undo.
//!
//! The engine is idempotent: re-invoking it with unchanged external state
//! mutates nothing, because condition updates are policy-controlled and the
//! strategy skips no-op status writes.

use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use kube::Resource;
use tracing::debug;

use crate::crd::ConditionStatus;
use crate::error::Error;
use crate::jobsync::conditions::{
    JobSyncConditionType, UpdateConditionPolicy, REASON_JOB_COMPLETED, REASON_JOB_MISSING,
    REASON_JOB_RUNNING, REASON_SPEC_CHANGED,
};
use crate::jobsync::job_control::{JobControl, JobControlResult, OwnerMeta};
use crate::jobsync::strategy::JobSyncStrategy;

/// Derive the engine's finalizer from its job prefix.
///
/// Finalizer values must end in an alphanumeric character and job prefixes
/// conventionally end in `-`, hence the trailing `1`.
pub fn finalizer_name(job_prefix: &str) -> String {
    format!("strata.dev/cluster-operator-{job_prefix}1")
}

/// Reconciles an owner that uses a batch job to do its processing.
pub struct JobSync<S: JobSyncStrategy> {
    job_control: Arc<dyn JobControl>,
    strategy: S,
    undo_on_delete: bool,
}

impl<S: JobSyncStrategy> JobSync<S> {
    /// Create a new engine.
    ///
    /// With `undo_on_delete` the engine installs a finalizer on the first
    /// job creation and runs an undo job when the owner is deleted; without
    /// it deletion is somebody else's business.
    pub fn new(job_control: Arc<dyn JobControl>, strategy: S, undo_on_delete: bool) -> Self {
        Self {
            job_control,
            strategy,
            undo_on_delete,
        }
    }

    /// The finalizer this engine manages on its owners
    pub fn finalizer(&self) -> String {
        finalizer_name(self.job_control.job_prefix())
    }

    /// Sync the owner with the given work-queue key.
    ///
    /// Safe to re-invoke arbitrarily; errors are returned for the work
    /// queue to retry with backoff.
    pub async fn sync(&self, key: &str) -> Result<(), Error> {
        debug!(key, "started syncing");

        let owner = match self.strategy.get_owner(key).await {
            Err(err) if err.is_not_found() => {
                debug!(key, "owner has been deleted");
                self.job_control.observe_owner_deletion(key);
                return Ok(());
            }
            other => other?,
        };

        let mut deleting = false;
        if owner.meta().deletion_timestamp.is_some() {
            if !self.undo_on_delete {
                return Ok(());
            }
            if !self.has_finalizer(&owner) {
                // Another party owns teardown.
                return Ok(());
            }
            debug!(key, "undoing job processing on delete");
            deleting = true;
        }

        let current_job = self.strategy.current_job(&owner);
        let needs_processing = deleting || self.strategy.does_owner_need_processing(&owner);
        let factory = self.strategy.get_job_factory(&owner, deleting)?;
        let owner_meta = OwnerMeta::from_resource(&owner)?;

        let result = self
            .job_control
            .control_jobs(
                key,
                &owner_meta,
                current_job.clone(),
                needs_processing,
                factory,
            )
            .await?;
        debug!(key, ?deleting, "job control finished");

        match result {
            JobControlResult::Succeeded(_) => self.status_for_completed_job(&owner, deleting).await,
            JobControlResult::Working(job) => {
                self.status_for_in_progress_job(&owner, &job, deleting).await
            }
            JobControlResult::Failed => self.status_for_failed_job(&owner).await,
            JobControlResult::DeletingJobs => {
                if current_job.is_none() {
                    return Ok(());
                }
                self.status_for_outdated_job(&owner).await
            }
            JobControlResult::LostCurrentJob => self.status_for_lost_job(&owner, deleting).await,
            JobControlResult::CreatingJob => {
                if self.undo_on_delete {
                    // Installed before the job can complete, so an owner
                    // deleted immediately after creation can still be
                    // undone.
                    debug!(key, "ensuring finalizer");
                    return self.add_finalizer(&owner).await;
                }
                Ok(())
            }
            JobControlResult::PendingExpectations | JobControlResult::NoWork => Ok(()),
        }
    }

    fn has_finalizer(&self, owner: &S::Owner) -> bool {
        let finalizer = self.finalizer();
        owner
            .meta()
            .finalizers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|f| *f == finalizer)
    }

    async fn add_finalizer(&self, original: &S::Owner) -> Result<(), Error> {
        if self.has_finalizer(original) {
            return Ok(());
        }
        let mut owner = original.clone();
        owner
            .meta_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(self.finalizer());
        self.strategy.update_owner_status(original, &owner).await
    }

    async fn status_for_completed_job(
        &self,
        original: &S::Owner,
        deleting: bool,
    ) -> Result<(), Error> {
        let mut owner = original.clone();
        let reason = REASON_JOB_COMPLETED;
        let message = "Job completed";
        if deleting {
            for condition_type in [
                JobSyncConditionType::Undoing,
                JobSyncConditionType::Processed,
                JobSyncConditionType::UndoFailed,
            ] {
                self.strategy.set_job_sync_condition(
                    &mut owner,
                    condition_type,
                    ConditionStatus::False,
                    reason,
                    message,
                    UpdateConditionPolicy::Never,
                );
            }
        } else {
            self.strategy.set_job_sync_condition(
                &mut owner,
                JobSyncConditionType::Processing,
                ConditionStatus::False,
                reason,
                message,
                UpdateConditionPolicy::Never,
            );
            self.strategy.set_job_sync_condition(
                &mut owner,
                JobSyncConditionType::Processed,
                ConditionStatus::True,
                reason,
                message,
                UpdateConditionPolicy::Always,
            );
            self.strategy.set_job_sync_condition(
                &mut owner,
                JobSyncConditionType::ProcessingFailed,
                ConditionStatus::False,
                reason,
                message,
                UpdateConditionPolicy::Never,
            );
        }
        self.strategy.set_current_job(&mut owner, None);
        if deleting {
            let finalizer = self.finalizer();
            if let Some(finalizers) = owner.meta_mut().finalizers.as_mut() {
                finalizers.retain(|f| *f != finalizer);
            }
        } else {
            self.strategy.on_job_completion(&mut owner);
        }
        self.strategy.update_owner_status(original, &owner).await
    }

    async fn status_for_in_progress_job(
        &self,
        original: &S::Owner,
        job: &Job,
        deleting: bool,
    ) -> Result<(), Error> {
        let mut owner = original.clone();
        let working_condition = if deleting {
            JobSyncConditionType::Undoing
        } else {
            JobSyncConditionType::Processing
        };
        self.strategy.set_job_sync_condition(
            &mut owner,
            working_condition,
            ConditionStatus::True,
            REASON_JOB_RUNNING,
            "Job running",
            UpdateConditionPolicy::IfReasonOrMessageChange,
        );
        self.strategy
            .set_current_job(&mut owner, job.metadata.name.as_deref());
        self.strategy.update_owner_status(original, &owner).await
    }

    async fn status_for_failed_job(&self, original: &S::Owner) -> Result<(), Error> {
        let mut owner = original.clone();
        // Clear the current job so that a new job is created.
        self.strategy.set_current_job(&mut owner, None);
        self.strategy.update_owner_status(original, &owner).await
    }

    /// An in-progress job is no longer relevant because the owner's spec
    /// changed out from under it.
    async fn status_for_outdated_job(&self, original: &S::Owner) -> Result<(), Error> {
        let mut owner = original.clone();
        self.strategy.set_job_sync_condition(
            &mut owner,
            JobSyncConditionType::Processing,
            ConditionStatus::False,
            REASON_SPEC_CHANGED,
            "Spec changed. New job needed",
            UpdateConditionPolicy::Never,
        );
        self.strategy.set_current_job(&mut owner, None);
        self.strategy.update_owner_status(original, &owner).await
    }

    async fn status_for_lost_job(&self, original: &S::Owner, deleting: bool) -> Result<(), Error> {
        let mut owner = original.clone();
        let (working_condition, failed_condition) = if deleting {
            (JobSyncConditionType::Undoing, JobSyncConditionType::UndoFailed)
        } else {
            (
                JobSyncConditionType::Processing,
                JobSyncConditionType::ProcessingFailed,
            )
        };
        let reason = REASON_JOB_MISSING;
        let message = "Job not found.";
        self.strategy.set_job_sync_condition(
            &mut owner,
            working_condition,
            ConditionStatus::False,
            reason,
            message,
            UpdateConditionPolicy::Never,
        );
        self.strategy.set_job_sync_condition(
            &mut owner,
            failed_condition,
            ConditionStatus::True,
            reason,
            message,
            UpdateConditionPolicy::Always,
        );
        self.strategy.set_current_job(&mut owner, None);
        if !deleting {
            self.strategy.on_job_failure(&mut owner);
        }
        self.strategy.update_owner_status(original, &owner).await
    }
}
