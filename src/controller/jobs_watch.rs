//! Jobs watch pump
//!
//! A single watch on `batch/v1` Jobs feeds two consumers: the reflector
//! cache that backs the job read-model, and the expectations ledger, which
//! needs to hear about creations and deletions of jobs owned by clusters.
//! First sight of a job UID counts as its creation; a UID that vanishes
//! (either via a delete event or silently across a relist) counts as its
//! deletion.

use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::api::Api;
use kube::runtime::reflector::store::Writer;
use kube::runtime::watcher::{watcher, Config as WatcherConfig, Event};
use kube::runtime::WatchStreamExt;
use tracing::{debug, warn};

use crate::jobsync::ExpectationsLedger;

use super::cluster::controller_owner;

/// The ledger key of the cluster owning this job, if any
fn owner_key(job: &Job) -> Option<String> {
    let owner = controller_owner(job)?;
    if owner.kind != "StrataCluster" {
        return None;
    }
    let namespace = job.metadata.namespace.as_deref()?;
    Some(format!("{namespace}/{}", owner.name))
}

/// Tracks which job UIDs have been observed, keyed to their owner
#[derive(Default)]
struct ObservedJobs {
    seen: HashMap<String, String>,
    relist: HashSet<String>,
}

impl ObservedJobs {
    fn observe(&mut self, event: &Event<Job>, ledger: &ExpectationsLedger) {
        match event {
            Event::Init => {
                self.relist.clear();
            }
            Event::InitApply(job) | Event::Apply(job) => {
                let Some(uid) = job.metadata.uid.clone() else {
                    return;
                };
                if matches!(event, Event::InitApply(_)) {
                    self.relist.insert(uid.clone());
                }
                let Some(key) = owner_key(job) else {
                    return;
                };
                if self.seen.insert(uid, key.clone()).is_none() {
                    debug!(key, "job creation observed");
                    ledger.creation_observed(&key);
                }
            }
            Event::InitDone => {
                // Jobs deleted while the watch was down never produce a
                // delete event; they are simply absent from the relist.
                let gone: Vec<String> = self
                    .seen
                    .keys()
                    .filter(|uid| !self.relist.contains(*uid))
                    .cloned()
                    .collect();
                for uid in gone {
                    if let Some(key) = self.seen.remove(&uid) {
                        debug!(key, "job deletion inferred from relist");
                        ledger.deletion_observed(&key);
                    }
                }
            }
            Event::Delete(job) => {
                let Some(uid) = job.metadata.uid.as_deref() else {
                    return;
                };
                if let Some(key) = self.seen.remove(uid) {
                    debug!(key, "job deletion observed");
                    ledger.deletion_observed(&key);
                }
            }
        }
    }
}

/// Run the jobs watch until the stream ends (shutdown).
///
/// Applies every event to the reflector `writer` and mirrors
/// creations/deletions of cluster-owned jobs into the `ledger`.
pub async fn run_jobs_watch(
    api: Api<Job>,
    mut writer: Writer<Job>,
    ledger: Arc<ExpectationsLedger>,
) {
    let mut observed = ObservedJobs::default();
    let mut stream = pin!(watcher(api, WatcherConfig::default()).default_backoff());

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                writer.apply_watcher_event(&event);
                observed.observe(&event, &ledger);
            }
            Err(err) => {
                warn!(error = %err, "jobs watch error");
            }
        }
    }
    debug!("jobs watch stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    const KEY: &str = "default/prod";

    fn cluster_job(name: &str, uid: &str) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some(uid.to_string()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "strata.dev/v1alpha1".to_string(),
                    kind: "StrataCluster".to_string(),
                    name: "prod".to_string(),
                    uid: "owner-uid".to_string(),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn foreign_job(name: &str, uid: &str) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some(uid.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn owner_key_requires_a_cluster_controller_reference() {
        assert_eq!(owner_key(&cluster_job("j", "u")), Some(KEY.to_string()));
        assert_eq!(owner_key(&foreign_job("j", "u")), None);
    }

    #[test]
    fn first_sight_counts_as_creation() {
        let ledger = ExpectationsLedger::default();
        ledger.expect_creations(KEY, 1);

        let mut observed = ObservedJobs::default();
        observed.observe(&Event::Apply(cluster_job("j", "uid-1")), &ledger);
        assert!(ledger.satisfied(KEY));
    }

    #[test]
    fn resync_of_a_known_job_is_not_a_creation() {
        let ledger = ExpectationsLedger::default();
        let mut observed = ObservedJobs::default();

        observed.observe(&Event::Apply(cluster_job("j", "uid-1")), &ledger);
        ledger.expect_creations(KEY, 1);
        observed.observe(&Event::Apply(cluster_job("j", "uid-1")), &ledger);

        assert!(!ledger.satisfied(KEY));
    }

    #[test]
    fn delete_event_counts_as_deletion() {
        let ledger = ExpectationsLedger::default();
        let mut observed = ObservedJobs::default();
        observed.observe(&Event::Apply(cluster_job("j", "uid-1")), &ledger);

        ledger.expect_deletions(KEY, 1);
        observed.observe(&Event::Delete(cluster_job("j", "uid-1")), &ledger);
        assert!(ledger.satisfied(KEY));
    }

    #[test]
    fn jobs_missing_after_relist_count_as_deleted() {
        let ledger = ExpectationsLedger::default();
        let mut observed = ObservedJobs::default();
        observed.observe(&Event::Apply(cluster_job("a", "uid-a")), &ledger);
        observed.observe(&Event::Apply(cluster_job("b", "uid-b")), &ledger);

        ledger.expect_deletions(KEY, 1);

        // Relist only shows job b; job a was deleted while disconnected.
        observed.observe(&Event::Init, &ledger);
        observed.observe(&Event::InitApply(cluster_job("b", "uid-b")), &ledger);
        observed.observe(&Event::InitDone, &ledger);

        assert!(ledger.satisfied(KEY));
    }

    #[test]
    fn foreign_jobs_never_touch_the_ledger() {
        let ledger = ExpectationsLedger::default();
        ledger.expect_creations(KEY, 1);

        let mut observed = ObservedJobs::default();
        observed.observe(&Event::Apply(foreign_job("j", "uid-x")), &ledger);
        observed.observe(&Event::Delete(foreign_job("j", "uid-x")), &ledger);

        assert!(!ledger.satisfied(KEY));
    }
}
