//! # Member Cluster Clients
//!
//! Access to the StatefulSets of every member cluster. The operator runs in
//! a central cluster; member clusters are reached through contexts of a
//! dedicated kubeconfig, one context per member cluster name.

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use mongodb_scalers::LEGACY_CENTRAL_CLUSTER_NAME;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Field manager used for replica patches
pub const FIELD_MANAGER: &str = "mongodb-multicluster-operator";

/// Replica counts reported by a StatefulSet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatefulSetObservation {
    pub replicas: u32,
    pub ready_replicas: u32,
    /// Whether the status describes the latest spec generation
    pub up_to_date: bool,
}

impl StatefulSetObservation {
    pub fn new(replicas: u32, ready_replicas: u32) -> Self {
        Self {
            replicas,
            ready_replicas,
            up_to_date: true,
        }
    }

    /// Whether the StatefulSet runs exactly `requested` pods and all of them are ready
    pub fn is_at(&self, requested: u32) -> bool {
        self.up_to_date && self.replicas == requested && self.ready_replicas == requested
    }
}

/// Operations the reconciler needs on member clusters
#[async_trait]
pub trait MemberClusterAccess: Send + Sync {
    /// Names of the member clusters currently reachable
    async fn healthy_clusters(&self) -> BTreeSet<String>;

    /// Set `spec.replicas` of a StatefulSet and report what it currently runs.
    ///
    /// Returns `None` when the StatefulSet does not exist.
    async fn scale_statefulset(
        &self,
        cluster_name: &str,
        namespace: &str,
        statefulset_name: &str,
        replicas: u32,
    ) -> Result<Option<StatefulSetObservation>>;
}

/// Kubernetes clients for the central cluster and each member cluster
#[derive(Clone)]
pub struct MemberClusterClients {
    central: Client,
    members: BTreeMap<String, Client>,
    probe_timeout: Duration,
}

impl MemberClusterClients {
    pub fn new(central: Client, members: BTreeMap<String, Client>) -> Self {
        Self {
            central,
            members,
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// Clients for a deployment that only uses the central cluster
    pub fn central_only(central: Client) -> Self {
        Self::new(central, BTreeMap::new())
    }

    /// Build one client per member cluster from the contexts of `kubeconfig_path`
    pub async fn from_kubeconfig(central: Client, kubeconfig_path: &Path, cluster_names: &[String]) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path)?;

        let client_futures = cluster_names.iter().map(|name| {
            let kubeconfig = kubeconfig.clone();
            async move {
                let options = KubeConfigOptions {
                    context: Some(name.clone()),
                    ..Default::default()
                };
                let config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
                let client = Client::try_from(config)?;
                Ok::<_, OperatorError>((name.clone(), client))
            }
        });

        let mut members = BTreeMap::new();
        for result in join_all(client_futures).await {
            let (name, client) = result?;
            info!(cluster = %name, "Created client for member cluster");
            members.insert(name, client);
        }

        Ok(Self::new(central, members))
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn central(&self) -> &Client {
        &self.central
    }

    pub fn cluster_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Client for a member cluster; the legacy central name maps to the central cluster
    pub fn client_for(&self, cluster_name: &str) -> Result<&Client> {
        if cluster_name == LEGACY_CENTRAL_CLUSTER_NAME {
            return Ok(&self.central);
        }
        self.members
            .get(cluster_name)
            .ok_or_else(|| OperatorError::UnknownMemberCluster(cluster_name.to_string()))
    }
}

#[async_trait]
impl MemberClusterAccess for MemberClusterClients {
    async fn healthy_clusters(&self) -> BTreeSet<String> {
        let probes = self.members.iter().map(|(name, client)| async move {
            match timeout(self.probe_timeout, client.apiserver_version()).await {
                Ok(Ok(_)) => Some(name.clone()),
                Ok(Err(e)) => {
                    warn!(cluster = %name, error = %e, "Member cluster is not reachable");
                    None
                }
                Err(_) => {
                    warn!(cluster = %name, "Member cluster probe timed out");
                    None
                }
            }
        });

        let mut healthy: BTreeSet<String> = join_all(probes).await.into_iter().flatten().collect();
        // the operator watches the central cluster, so it is reachable by construction
        healthy.insert(LEGACY_CENTRAL_CLUSTER_NAME.to_string());
        healthy
    }

    async fn scale_statefulset(
        &self,
        cluster_name: &str,
        namespace: &str,
        statefulset_name: &str,
        replicas: u32,
    ) -> Result<Option<StatefulSetObservation>> {
        let api: Api<StatefulSet> = Api::namespaced(self.client_for(cluster_name)?.clone(), namespace);
        let patch = json!({ "spec": { "replicas": replicas } });

        let sts = match api
            .patch(statefulset_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(sts) => sts,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!(
                    cluster = cluster_name,
                    statefulset = statefulset_name,
                    "StatefulSet not found in member cluster"
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let observation = observe(&sts);
        debug!(
            cluster = cluster_name,
            statefulset = statefulset_name,
            requested = replicas,
            replicas = observation.replicas,
            ready = observation.ready_replicas,
            "Patched StatefulSet replicas"
        );
        Ok(Some(observation))
    }
}

/// Replica counts from a StatefulSet's status
pub fn observe(sts: &StatefulSet) -> StatefulSetObservation {
    let Some(status) = sts.status.as_ref() else {
        return StatefulSetObservation::default();
    };
    StatefulSetObservation {
        replicas: u32::try_from(status.replicas).unwrap_or(0),
        ready_replicas: status.ready_replicas.and_then(|r| u32::try_from(r).ok()).unwrap_or(0),
        up_to_date: status.observed_generation.unwrap_or(0) >= sts.metadata.generation.unwrap_or(0),
    }
}
