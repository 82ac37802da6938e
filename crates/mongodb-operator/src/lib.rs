//! # MongoDB Multi-Cluster Operator
//!
//! Kubernetes operator scaling MongoDB replica sets that span several member
//! clusters. Replica changes are rolled out one member cluster and one member
//! at a time so the replica set keeps its quorum.

pub mod controller;
pub mod crds;
pub mod error;
pub mod manager;
pub mod member_clients;
pub mod reconciler;
pub mod state;

pub use controller::{install_crd, Context, ControllerMetrics, MongoDBController};
pub use crds::*;
pub use error::{OperatorError, Result};
pub use manager::{OperatorBuilder, OperatorManager};
pub use member_clients::{MemberClusterAccess, MemberClusterClients, StatefulSetObservation};
pub use reconciler::{run_pass, MongoDBReconciler, PassOutcome};
pub use state::DeploymentState;

use std::path::PathBuf;
use std::time::Duration;

/// Operator configuration
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch, all namespaces when unset
    pub namespace: Option<String>,
    /// Kubeconfig holding one context per member cluster
    pub member_kubeconfig: Option<PathBuf>,
    pub member_clusters: Vec<String>,
    pub pending_requeue: Duration,
    pub running_requeue: Duration,
    pub error_requeue: Duration,
    pub health_port: u16,
    pub metrics_port: u16,
    pub enable_monitoring: bool,
    pub install_crd: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            member_kubeconfig: None,
            member_clusters: Vec::new(),
            pending_requeue: Duration::from_secs(10),
            running_requeue: Duration::from_secs(300),
            error_requeue: Duration::from_secs(30),
            health_port: 8080,
            metrics_port: 9090,
            enable_monitoring: true,
            install_crd: true,
        }
    }
}
