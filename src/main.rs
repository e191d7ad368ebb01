//! Strata Operator - cluster lifecycle management through provisioning jobs

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::reflector;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use strata::controller::{
    error_policy, reconcile, run_jobs_watch, ClusterSyncStrategy, Context, KubeBatchClient,
    KubeClusterClient, ReflectorJobStore, CLUSTER_JOB_PREFIX,
};
use strata::crd::StrataCluster;
use strata::jobsync::{BatchJobControl, ExpectationsLedger, JobSync};
use strata::provision::ProvisionConfig;

/// Strata - CRD-driven cluster lifecycle operator
#[derive(Parser, Debug)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Container image carrying the provisioning playbooks
    #[arg(
        long,
        env = "STRATA_PLAYBOOK_IMAGE",
        default_value = "quay.io/strata/playbook-runner:latest"
    )]
    playbook_image: String,

    /// Playbook that realizes a cluster spec
    #[arg(long, default_value = "playbooks/cluster/provision.yml")]
    provision_playbook: String,

    /// Playbook that tears a cluster back down
    #[arg(long, default_value = "playbooks/cluster/deprovision.yml")]
    deprovision_playbook: String,

    /// Run an undo job before letting a deleted cluster go
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    undo_on_delete: bool,

    /// Seconds after which unobserved job side-effects stop blocking syncs
    #[arg(long, default_value_t = 300)]
    expectations_ttl_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&StrataCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    tracing::info!("Strata controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let provision = ProvisionConfig {
        image: cli.playbook_image,
        provision_playbook: cli.provision_playbook,
        deprovision_playbook: cli.deprovision_playbook,
    };

    // Shared core: ledger, job read-model, job control, engine.
    let ledger = Arc::new(ExpectationsLedger::new(Duration::from_secs(
        cli.expectations_ttl_secs,
    )));
    let (job_reader, job_writer) = reflector::store::<Job>();
    let job_control = Arc::new(BatchJobControl::new(
        CLUSTER_JOB_PREFIX,
        "strata.dev/v1alpha1",
        "StrataCluster",
        Arc::new(ReflectorJobStore::new(job_reader)),
        Arc::new(KubeBatchClient::new(client.clone())),
        Arc::clone(&ledger),
    ));
    let strategy = ClusterSyncStrategy::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        provision,
    );
    let ctx = Arc::new(Context {
        job_sync: JobSync::new(job_control, strategy, cli.undo_on_delete),
    });

    // One watch on jobs feeds both the reflector cache and the ledger.
    let jobs: Api<Job> = Api::all(client.clone());
    let jobs_watch = tokio::spawn(run_jobs_watch(jobs, job_writer, Arc::clone(&ledger)));

    let clusters: Api<StrataCluster> = Api::all(client.clone());
    let owned_jobs: Api<Job> = Api::all(client);

    tracing::info!("Starting StrataCluster controller...");

    Controller::new(clusters, WatcherConfig::default())
        .owns(owned_jobs, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    tracing::debug!(?object, ?action, "Reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Reconciliation error");
                }
            }
        })
        .await;

    jobs_watch.abort();
    tracing::info!("Strata controller shutting down");
    Ok(())
}
