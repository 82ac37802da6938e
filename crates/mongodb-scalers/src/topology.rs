//! # Declared Topology
//!
//! Per-member-cluster targets as declared on the custom resource

use serde::{Deserialize, Serialize};

/// One member Kubernetes cluster entry of a declared topology
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpecItem {
    /// Unique name of the member cluster
    pub cluster_name: String,

    /// Target number of replica set members in this cluster
    #[serde(default)]
    pub members: u32,

    /// Per-cluster member configuration overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_config: Option<serde_json::Value>,

    /// Per-cluster external access overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_access: Option<serde_json::Value>,
}

impl ClusterSpecItem {
    pub fn new(cluster_name: impl Into<String>, members: u32) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            members,
            ..Default::default()
        }
    }
}

/// Ordered list of member cluster targets.
///
/// Order is declaration order and carries no scaling meaning. Lookups go by
/// cluster name and an unknown name resolves to a zero-member item, which is
/// how a cluster removed from the resource gets driven down to nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSpecList(Vec<ClusterSpecItem>);

impl ClusterSpecList {
    pub fn new(items: Vec<ClusterSpecItem>) -> Self {
        Self(items)
    }

    /// Target members for `cluster_name`, zero if absent
    pub fn members_for(&self, cluster_name: &str) -> u32 {
        self.find(cluster_name).map(|item| item.members).unwrap_or(0)
    }

    pub fn contains(&self, cluster_name: &str) -> bool {
        self.find(cluster_name).is_some()
    }

    /// Cluster names in declaration order
    pub fn cluster_names(&self) -> Vec<String> {
        self.0.iter().map(|item| item.cluster_name.clone()).collect()
    }

    /// First cluster name declared more than once, if any
    pub fn duplicate_cluster_name(&self) -> Option<&str> {
        self.0.iter().enumerate().find_map(|(i, item)| {
            self.0[..i]
                .iter()
                .any(|earlier| earlier.cluster_name == item.cluster_name)
                .then_some(item.cluster_name.as_str())
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterSpecItem> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn find(&self, cluster_name: &str) -> Option<&ClusterSpecItem> {
        self.0.iter().find(|item| item.cluster_name == cluster_name)
    }
}

impl From<Vec<ClusterSpecItem>> for ClusterSpecList {
    fn from(items: Vec<ClusterSpecItem>) -> Self {
        Self(items)
    }
}

impl FromIterator<ClusterSpecItem> for ClusterSpecList {
    fn from_iter<I: IntoIterator<Item = ClusterSpecItem>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ClusterSpecList {
    type Item = &'a ClusterSpecItem;
    type IntoIter = std::slice::Iter<'a, ClusterSpecItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// How a scalable component is laid out over Kubernetes clusters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// One cluster; the StatefulSet controller already serializes pod changes
    SingleCluster {
        /// Declared member count
        members: u32,
        /// Member count last recorded in status
        observed_members: u32,
    },

    /// Several independently reconciled member clusters
    MultiCluster(ClusterSpecList),
}

impl Topology {
    pub fn is_multi_cluster(&self) -> bool {
        matches!(self, Topology::MultiCluster(_))
    }

    /// Member count declared for `cluster_name`, ignoring any turn taking
    pub fn members_for(&self, cluster_name: &str) -> u32 {
        match self {
            Topology::SingleCluster { members, .. } => *members,
            Topology::MultiCluster(list) => list.members_for(cluster_name),
        }
    }
}
