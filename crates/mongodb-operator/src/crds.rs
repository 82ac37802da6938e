//! # Custom Resource Definitions
//!
//! Kubernetes CRDs for the MongoDB multi-cluster operator

use kube::CustomResource;
use mongodb_scalers::{ClusterSpecItem, ClusterSpecList};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// MongoDBMultiCluster CRD - a replica set spread over member clusters
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "mongodb.com",
    version = "v1",
    kind = "MongoDBMultiCluster",
    plural = "mongodbmulticlusters",
    shortname = "mdbmc",
    derive = "Default",
    namespaced
)]
#[kube(status = "MongoDBMultiClusterStatus")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Members","type":"integer","jsonPath":".status.members"}"#)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBMultiClusterSpec {
    /// Whether the replica set lives in one cluster or is spread over several
    #[serde(default)]
    pub topology: ResourceTopology,

    /// Member count when deployed in a single cluster
    #[serde(default)]
    pub members: u32,

    /// Per member cluster member counts, for the multi-cluster topology
    #[serde(default)]
    pub cluster_spec_list: Vec<ClusterSpecEntry>,

    /// MongoDB version
    #[serde(default)]
    pub version: Option<String>,
}

impl MongoDBMultiClusterSpec {
    pub fn is_multi_cluster(&self) -> bool {
        matches!(self.topology, ResourceTopology::MultiCluster)
    }

    /// The cluster spec list as consumed by the scalers
    pub fn cluster_spec_list(&self) -> ClusterSpecList {
        self.cluster_spec_list
            .iter()
            .map(|entry| ClusterSpecItem::new(entry.cluster_name.clone(), entry.members))
            .collect()
    }
}

/// Deployment topology
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum ResourceTopology {
    #[serde(rename = "SingleCluster")]
    SingleCluster,

    #[default]
    #[serde(rename = "MultiCluster")]
    MultiCluster,
}

/// Member count for one member cluster
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpecEntry {
    /// Name of the member cluster, a context in the member cluster kubeconfig
    pub cluster_name: String,

    /// Number of replica set members in this cluster
    pub members: u32,
}

/// Resource status
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBMultiClusterStatus {
    /// Current phase
    pub phase: Phase,

    /// Replica set members recorded over all member clusters
    #[serde(default)]
    pub members: u32,

    /// Per member cluster replica counts
    #[serde(default)]
    pub cluster_status_list: Vec<ClusterStatusItem>,

    /// Human readable detail about the phase
    pub message: Option<String>,

    /// Time of the last phase change
    pub last_transition: Option<String>,

    /// Generation of the spec this status describes
    pub observed_generation: Option<i64>,
}

/// Replica counts of one member cluster
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatusItem {
    pub cluster_name: String,

    /// Stable index, also the StatefulSet name suffix
    pub index: usize,

    /// Members recorded for this cluster
    pub members: u32,

    /// Replicas requested on the StatefulSet in the last pass
    pub requested: u32,

    /// Members declared in the spec, 0 once the cluster left the spec
    pub desired: u32,

    /// Whether the StatefulSet was observed at the requested count
    pub ready: bool,

    pub healthy: bool,
}

/// Resource phase
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    #[serde(rename = "Pending")]
    Pending,

    #[serde(rename = "Running")]
    Running,

    #[serde(rename = "Failed")]
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Running => write!(f, "Running"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_spec_deserialization() {
        let spec: MongoDBMultiClusterSpec = serde_json::from_value(serde_json::json!({
            "clusterSpecList": [
                {"clusterName": "cluster-1", "members": 3},
                {"clusterName": "cluster-2", "members": 2}
            ],
            "version": "6.0.5"
        }))
        .unwrap();

        assert!(spec.is_multi_cluster());
        assert_eq!(spec.members, 0);
        let list = spec.cluster_spec_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list.members_for("cluster-2"), 2);
    }

    #[test]
    fn test_single_cluster_topology() {
        let spec: MongoDBMultiClusterSpec =
            serde_json::from_str(r#"{"topology": "SingleCluster", "members": 5}"#).unwrap();

        assert!(!spec.is_multi_cluster());
        assert!(spec.cluster_spec_list().is_empty());
    }

    #[test]
    fn test_status_default() {
        let status = MongoDBMultiClusterStatus::default();
        assert_eq!(status.phase, Phase::Pending);
        assert_eq!(status.members, 0);
        assert!(status.cluster_status_list.is_empty());
    }

    #[test]
    fn test_crd_generation() {
        let crd = MongoDBMultiCluster::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("mongodbmulticlusters.mongodb.com"));
        assert_eq!(crd.spec.group, "mongodb.com");
        assert_eq!(crd.spec.names.kind, "MongoDBMultiCluster");
        assert_eq!(crd.spec.names.short_names, Some(vec!["mdbmc".to_string()]));
        assert_eq!(crd.spec.versions[0].name, "v1");
    }
}
