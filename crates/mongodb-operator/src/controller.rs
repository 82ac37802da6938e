//! # Kubernetes Controller
//!
//! Controller loop driving MongoDBMultiCluster reconciliations

use crate::crds::MongoDBMultiCluster;
use crate::error::{OperatorError, Result};
use crate::reconciler::MongoDBReconciler;
use crate::OperatorConfig;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, PostParams, ResourceExt};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, CustomResourceExt};
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Shared state handed to every reconciliation
pub struct Context {
    pub reconciler: Arc<MongoDBReconciler>,
    pub metrics: Arc<ControllerMetrics>,
    pub config: OperatorConfig,
}

/// Controller for MongoDBMultiCluster resources
pub struct MongoDBController {
    client: Client,
    context: Arc<Context>,
    ready: Arc<AtomicBool>,
}

impl MongoDBController {
    pub fn new(client: Client, context: Arc<Context>) -> Self {
        Self {
            client,
            context,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag set once the CRD is in place and the watch starts
    pub fn with_ready(mut self, ready: Arc<AtomicBool>) -> Self {
        self.ready = ready;
        self
    }

    /// Run the controller until its watch stream ends
    pub async fn run(self) -> Result<()> {
        info!("Starting MongoDBMultiCluster controller");

        if self.context.config.install_crd {
            install_crd(&self.client).await?;
        }

        let api: Api<MongoDBMultiCluster> = match &self.context.config.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        self.ready.store(true, Ordering::SeqCst);

        Controller::new(api, watcher::Config::default())
            .run(reconcile, error_policy, Arc::clone(&self.context))
            .for_each(|result| async move {
                match result {
                    Ok((object, _)) => debug!(resource = %object.name, "Reconciled"),
                    Err(e) => debug!(error = %e, "Reconcile loop reported an error"),
                }
            })
            .await;

        self.ready.store(false, Ordering::SeqCst);
        info!("Controller stream ended");
        Ok(())
    }
}

async fn reconcile(resource: Arc<MongoDBMultiCluster>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    ctx.metrics.reconciliations_total.fetch_add(1, Ordering::Relaxed);

    let result = ctx.reconciler.reconcile(Arc::clone(&resource)).await;
    ctx.metrics.record_duration(started.elapsed());

    match result {
        Ok(outcome) => {
            if outcome.plan.moving_clusters().next().is_some() {
                ctx.metrics.scaling_passes.fetch_add(1, Ordering::Relaxed);
            }
            Ok(ctx.reconciler.requeue_action(&outcome))
        }
        Err(e) => {
            ctx.metrics.reconciliations_failed.fetch_add(1, Ordering::Relaxed);
            error!(resource = %resource.name_any(), error = %e, "Reconciliation failed");
            if let Err(status_err) = ctx.reconciler.record_failure(&resource, &e).await {
                warn!(resource = %resource.name_any(), error = %status_err, "Failed to record failure status");
            }
            Err(e)
        }
    }
}

fn error_policy(resource: Arc<MongoDBMultiCluster>, error: &OperatorError, ctx: Arc<Context>) -> Action {
    warn!(
        resource = %resource.name_any(),
        reason = error.reason(),
        "Requeueing after reconciliation error"
    );
    Action::requeue(ctx.config.error_requeue)
}

/// Install the CRD if it doesn't exist
pub async fn install_crd(client: &Client) -> Result<()> {
    let crd = MongoDBMultiCluster::crd();
    let crd_name = crd.name_any();
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());

    match crds.get(&crd_name).await {
        Ok(_) => {
            info!("CRD {} already exists", crd_name);
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {
            info!("Installing CRD {}", crd_name);
            crds.create(&PostParams::default(), &crd).await?;
            info!("CRD {} installed successfully", crd_name);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Controller metrics
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    pub reconciliations_total: AtomicU64,
    pub reconciliations_failed: AtomicU64,
    /// Passes that changed the replica count of at least one member cluster
    pub scaling_passes: AtomicU64,
    pub last_reconcile_duration_ms: AtomicU64,
}

impl ControllerMetrics {
    pub fn record_duration(&self, elapsed: std::time::Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.last_reconcile_duration_ms.store(millis, Ordering::Relaxed);
    }

    /// Prometheus text exposition
    pub fn render(&self) -> String {
        let mut out = String::new();
        let metrics = [
            (
                "mongodb_operator_reconciliations_total",
                "counter",
                "Reconciliations started",
                &self.reconciliations_total,
            ),
            (
                "mongodb_operator_reconciliations_failed_total",
                "counter",
                "Reconciliations that returned an error",
                &self.reconciliations_failed,
            ),
            (
                "mongodb_operator_scaling_passes_total",
                "counter",
                "Reconciliations that changed member cluster replicas",
                &self.scaling_passes,
            ),
            (
                "mongodb_operator_last_reconcile_duration_ms",
                "gauge",
                "Duration of the last reconciliation",
                &self.last_reconcile_duration_ms,
            ),
        ];

        let _ = writeln!(out, "# HELP mongodb_operator_up Operator process is running");
        let _ = writeln!(out, "# TYPE mongodb_operator_up gauge");
        let _ = writeln!(out, "mongodb_operator_up 1");
        for (name, kind, help, value) in metrics {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} {}", name, kind);
            let _ = writeln!(out, "{} {}", name, value.load(Ordering::Relaxed));
        }
        out
    }
}
