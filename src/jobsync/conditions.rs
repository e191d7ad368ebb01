//! Conditions managed by the job sync engine
//!
//! The engine owns exactly five condition types on an owner and guarantees
//! at most one condition of each type. Updates go through [`set_condition`],
//! which applies the caller's [`UpdateConditionPolicy`] so that repeated
//! syncs with unchanged state leave the condition list byte-identical and
//! the status write can be skipped entirely.

use chrono::Utc;

use crate::crd::{Condition, ConditionStatus};

/// The type of condition that the job sync engine is adjusting on the owner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobSyncConditionType {
    /// The processing job is in progress
    Processing,
    /// The processing job has completed successfully
    Processed,
    /// The processing job has failed
    ProcessingFailed,
    /// The undo job is in progress
    Undoing,
    /// The undo job has failed
    UndoFailed,
}

impl JobSyncConditionType {
    /// The condition type string stored on the owner
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "Processing",
            Self::Processed => "Processed",
            Self::ProcessingFailed => "ProcessingFailed",
            Self::Undoing => "Undoing",
            Self::UndoFailed => "UndoFailed",
        }
    }
}

impl std::fmt::Display for JobSyncConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition reason used while a job is still running
pub const REASON_JOB_RUNNING: &str = "JobRunning";
/// Condition reason used when a job has completed successfully
pub const REASON_JOB_COMPLETED: &str = "JobCompleted";
/// Condition reason used when a job that was expected to exist does not
pub const REASON_JOB_MISSING: &str = "JobMissing";
/// Condition reason used when the owner's spec changes, invalidating jobs
pub const REASON_SPEC_CHANGED: &str = "SpecChanged";

/// Controls when an already-present condition is refreshed.
///
/// The policies exist so a status write can be a true no-op when nothing
/// semantic changed: `Never` keeps timestamps stable across identical syncs,
/// `Always` forces a probe-time refresh, `IfReasonOrMessageChange` refreshes
/// only when the text differs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateConditionPolicy {
    /// Do not touch a condition that is already present with the same status
    Never,
    /// Refresh reason, message, and probe time unconditionally
    Always,
    /// Refresh only when the reason or message differs
    IfReasonOrMessageChange,
}

/// Find the condition of the given type, if present
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: JobSyncConditionType,
) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.type_ == condition_type.as_str())
}

/// Set or update the condition of the given type on the condition list.
///
/// Write rules:
/// - absent condition, status `True`: appended with both timestamps set to
///   now;
/// - absent condition, status `False`/`Unknown`: left absent (a condition
///   that never held is not recorded);
/// - present, status differs: status, reason, and message overwritten, both
///   timestamps refreshed;
/// - present, status equal: reason, message, and probe time refreshed per
///   the policy; the transition time is never touched.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: JobSyncConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    policy: UpdateConditionPolicy,
) {
    let now = Utc::now();
    match conditions
        .iter()
        .position(|c| c.type_ == condition_type.as_str())
    {
        None => {
            if status == ConditionStatus::True {
                conditions.push(Condition::new(
                    condition_type.as_str(),
                    status,
                    reason,
                    message,
                ));
            }
        }
        Some(index) => {
            let condition = &mut conditions[index];
            if condition.status != status {
                condition.status = status;
                condition.reason = reason.to_string();
                condition.message = message.to_string();
                condition.last_transition_time = now;
                condition.last_probe_time = now;
            } else if should_update(condition, reason, message, policy) {
                condition.reason = reason.to_string();
                condition.message = message.to_string();
                condition.last_probe_time = now;
            }
        }
    }
}

fn should_update(
    condition: &Condition,
    reason: &str,
    message: &str,
    policy: UpdateConditionPolicy,
) -> bool {
    match policy {
        UpdateConditionPolicy::Never => false,
        UpdateConditionPolicy::Always => true,
        UpdateConditionPolicy::IfReasonOrMessageChange => {
            condition.reason != reason || condition.message != message
        }
    }
}
