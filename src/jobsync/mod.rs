//! Generic job-sync reconciliation kernel
//!
//! An owner object declares desired state; realizing that state means
//! running a one-shot batch job. This module coordinates the lifecycle of
//! that job, reflects its progress into the owner's status conditions, and
//! supports symmetric undo when the owner is deleted:
//!
//! - [`expectations`] - per-owner ledger of side-effects not yet visible
//!   through the watch-backed read model;
//! - [`job_control`] - decides and performs the next job side-effect
//!   (create, delete, or wait);
//! - [`engine`] - the top-level [`JobSync`] reconciler driving status
//!   mutations and the finalizer protocol;
//! - [`strategy`] - the owner-type-specific capability bundle;
//! - [`conditions`] - the managed condition set and its update policies.

pub mod conditions;
pub mod engine;
pub mod expectations;
pub mod job_control;
pub mod strategy;

pub use conditions::{JobSyncConditionType, UpdateConditionPolicy};
pub use engine::{finalizer_name, JobSync};
pub use expectations::{ExpectationsLedger, EXPECTATIONS_TTL};
pub use job_control::{
    BatchClient, BatchJobControl, JobControl, JobControlResult, JobFactory, JobSpecification,
    JobStore, OwnerMeta,
};
pub use strategy::JobSyncStrategy;
