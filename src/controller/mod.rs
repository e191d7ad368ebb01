//! Controller implementation for the StrataCluster CRD
//!
//! Wires the generic job sync engine to the Kubernetes runtime: the cluster
//! strategy supplies owner-specific behavior, the jobs watch keeps the job
//! read-model and the expectations ledger current, and `reconcile` adapts
//! work-queue dispatch to `JobSync::sync`.

mod cluster;
mod jobs_watch;

pub use cluster::{
    cluster_key, error_policy, reconcile, ClusterClient, ClusterSyncStrategy, Context,
    KubeBatchClient, KubeClusterClient, ReflectorJobStore, CLUSTER_JOB_PREFIX,
};
pub use jobs_watch::run_jobs_watch;
