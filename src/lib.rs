//! Strata - CRD-driven cluster lifecycle operator
//!
//! Strata reconciles declared cluster state with reality by running one-shot
//! batch provisioning jobs. A StrataCluster describes the cluster an
//! operator wants; the job sync engine decides when a provisioning job is
//! needed, launches it, reflects its progress into the cluster's status
//! conditions, and runs a symmetric undo job when the cluster is deleted.
//!
//! # Architecture
//!
//! The core is a generic reconciliation kernel layered leaves-first:
//! - an expectations ledger remembers the controller's own side-effects
//!   until the watch-backed read model catches up;
//! - job control decides the next job side-effect (create, delete, wait)
//!   and performs it;
//! - the sync engine translates job-control outcomes into status mutations
//!   and drives the finalizer protocol that guarantees undo.
//!
//! Everything owner-specific sits behind a strategy trait, so the kernel is
//! reusable for any object realized through batch jobs.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (StrataCluster)
//! - [`jobsync`] - the generic job sync engine
//! - [`controller`] - StrataCluster strategy and kube runtime wiring
//! - [`provision`] - playbook job generation
//! - [`error`] - error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod jobsync;
pub mod provision;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
