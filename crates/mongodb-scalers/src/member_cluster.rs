//! # Member Cluster Snapshot
//!
//! Last observed replica counts per member cluster, and the stable
//! cluster-name-to-index mapping used to build that snapshot

use crate::topology::ClusterSpecList;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Cluster name used for the single "central" cluster of a non multi-cluster deployment
pub const LEGACY_CENTRAL_CLUSTER_NAME: &str = "__default";

/// Observed state of one member cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberCluster {
    /// Member cluster name
    pub name: String,

    /// Stable index of the cluster, used in StatefulSet names
    pub index: usize,

    /// Replica count last observed in this cluster
    pub replicas: u32,

    /// Whether the cluster is still declared on the resource
    #[serde(default = "default_true")]
    pub active: bool,

    /// Whether a client for the cluster is available
    #[serde(default = "default_true")]
    pub healthy: bool,

    /// Single-cluster naming (no index suffix)
    #[serde(default)]
    pub legacy: bool,
}

fn default_true() -> bool {
    true
}

impl MemberCluster {
    pub fn new(name: impl Into<String>, index: usize, replicas: u32) -> Self {
        Self {
            name: name.into(),
            index,
            replicas,
            active: true,
            healthy: true,
            legacy: false,
        }
    }

    /// The only member cluster of a single-cluster deployment
    pub fn legacy_central(replicas: u32) -> Self {
        Self {
            legacy: true,
            ..Self::new(LEGACY_CENTRAL_CLUSTER_NAME, 0, replicas)
        }
    }
}

/// Stable cluster name to index assignment.
///
/// Indexes are never reused: a cluster keeps its index after it leaves the
/// resource so a later re-add lands on the same StatefulSet name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterMapping(BTreeMap<String, usize>);

impl ClusterMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign an index to every name not mapped yet, in the given order
    pub fn assign_indexes<S: AsRef<str>>(&mut self, cluster_names: &[S]) {
        for name in cluster_names {
            let name = name.as_ref();
            if self.0.contains_key(name) {
                continue;
            }
            let next = self.next_index();
            debug!(cluster = name, index = next, "Assigned index to new member cluster");
            self.0.insert(name.to_string(), next);
        }
    }

    /// Index the next new cluster gets, one past the highest ever assigned
    pub fn next_index(&self) -> usize {
        self.0.values().max().map(|max| max + 1).unwrap_or(0)
    }

    pub fn index_of(&self, cluster_name: &str) -> Option<usize> {
        self.0.get(cluster_name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(name, index)| (name.as_str(), *index))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, usize>> for ClusterMapping {
    fn from(map: BTreeMap<String, usize>) -> Self {
        Self(map)
    }
}

/// Build the ordered snapshot the scalers consume.
///
/// Every declared cluster gets an active entry. A mapped cluster that left the
/// spec but still runs replicas gets an inactive entry so it keeps being
/// scaled towards zero. The result is ordered by index, which makes the
/// "first pending cluster" turn order stable across reconciliations.
///
/// Clusters are expected in `mapping` already, see
/// [`ClusterMapping::assign_indexes`]. Unmapped ones get indexes past the
/// highest assigned one so they never collide with a mapped cluster.
pub fn member_cluster_list<L, H>(
    cluster_spec_list: &ClusterSpecList,
    mapping: &ClusterMapping,
    last_applied_members: L,
    is_healthy: H,
) -> Vec<MemberCluster>
where
    L: Fn(&str) -> u32,
    H: Fn(&str) -> bool,
{
    let mut unmapped = 0;
    let mut clusters: Vec<MemberCluster> = cluster_spec_list
        .iter()
        .map(|item| {
            let name = item.cluster_name.as_str();
            let index = mapping.index_of(name).unwrap_or_else(|| {
                debug!(cluster = name, "Member cluster has no assigned index");
                unmapped += 1;
                mapping.next_index() + unmapped - 1
            });
            MemberCluster {
                healthy: is_healthy(name),
                ..MemberCluster::new(name, index, last_applied_members(name))
            }
        })
        .collect();

    for (name, index) in mapping.iter() {
        if cluster_spec_list.contains(name) {
            continue;
        }
        let replicas = last_applied_members(name);
        if replicas == 0 {
            continue;
        }
        debug!(
            cluster = name,
            replicas, "Member cluster removed from spec still has replicas, keeping it for scale down"
        );
        clusters.push(MemberCluster {
            active: false,
            healthy: is_healthy(name),
            ..MemberCluster::new(name, index, replicas)
        });
    }

    clusters.sort_by_key(|cluster| cluster.index);
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ClusterSpecItem;

    #[test]
    fn test_assign_indexes_keeps_existing() {
        let mut mapping = ClusterMapping::from(BTreeMap::from([
            ("cluster-a".to_string(), 0),
            ("cluster-c".to_string(), 2),
        ]));

        mapping.assign_indexes(&["cluster-b", "cluster-a", "cluster-d"]);

        assert_eq!(mapping.index_of("cluster-a"), Some(0));
        assert_eq!(mapping.index_of("cluster-c"), Some(2));
        assert_eq!(mapping.index_of("cluster-b"), Some(3));
        assert_eq!(mapping.index_of("cluster-d"), Some(4));
    }

    #[test]
    fn test_assign_indexes_empty_mapping() {
        let mut mapping = ClusterMapping::new();
        mapping.assign_indexes(&["x", "y"]);
        assert_eq!(mapping.index_of("x"), Some(0));
        assert_eq!(mapping.index_of("y"), Some(1));
    }

    #[test]
    fn test_cluster_mapping_serialization() {
        let mut mapping = ClusterMapping::new();
        mapping.assign_indexes(&["cluster-1", "cluster-2"]);
        let json = serde_json::to_string(&mapping).unwrap();
        assert_eq!(json, r#"{"cluster-1":0,"cluster-2":1}"#);
    }

    #[test]
    fn test_member_cluster_list_includes_removed_clusters_with_replicas() {
        let spec = ClusterSpecList::new(vec![
            ClusterSpecItem::new("cluster-3", 1),
            ClusterSpecItem::new("cluster-1", 3),
        ]);
        let mapping = ClusterMapping::from(BTreeMap::from([
            ("cluster-1".to_string(), 0),
            ("cluster-2".to_string(), 1),
            ("cluster-3".to_string(), 2),
            ("cluster-4".to_string(), 3),
        ]));
        let last_applied = BTreeMap::from([("cluster-1", 3), ("cluster-2", 2), ("cluster-3", 1)]);

        let clusters = member_cluster_list(
            &spec,
            &mapping,
            |name| last_applied.get(name).copied().unwrap_or(0),
            |name| name != "cluster-3",
        );

        let names: Vec<_> = clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["cluster-1", "cluster-2", "cluster-3"]);

        assert!(clusters[0].active);
        assert!(!clusters[1].active);
        assert_eq!(clusters[1].replicas, 2);
        assert!(!clusters[2].healthy);
    }

    #[test]
    fn test_member_cluster_list_unmapped_clusters_get_fresh_indexes() {
        let spec = ClusterSpecList::new(vec![
            ClusterSpecItem::new("a", 1),
            ClusterSpecItem::new("b", 1),
            ClusterSpecItem::new("d", 1),
            ClusterSpecItem::new("c", 1),
        ]);
        let mapping = ClusterMapping::from(BTreeMap::from([("a".to_string(), 0), ("c".to_string(), 2)]));

        let clusters = member_cluster_list(&spec, &mapping, |_| 0, |_| true);

        let indexes: Vec<_> = clusters.iter().map(|c| (c.name.as_str(), c.index)).collect();
        assert_eq!(indexes, vec![("a", 0), ("c", 2), ("b", 3), ("d", 4)]);
    }

    #[test]
    fn test_legacy_central_member_cluster() {
        let cluster = MemberCluster::legacy_central(3);
        assert_eq!(cluster.name, LEGACY_CENTRAL_CLUSTER_NAME);
        assert_eq!(cluster.index, 0);
        assert_eq!(cluster.replicas, 3);
        assert!(cluster.legacy);
    }
}
