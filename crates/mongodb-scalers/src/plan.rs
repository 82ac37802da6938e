//! # Scaling Plan
//!
//! Evaluates one scaler per member cluster of a snapshot and collects the
//! replica counts a reconciliation pass should request

use crate::member_cluster::MemberCluster;
use crate::scaler::{replicas_this_reconciliation, scaler_for, ScalingComponent};
use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Planned replica counts for one member cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedReplicas {
    pub cluster_name: String,
    pub index: usize,
    pub current: u32,
    pub desired: u32,
    /// Member count declared for the cluster, 0 once it left the spec
    pub target: u32,
    pub replicas_this_reconciliation: u32,
    pub active: bool,
    pub healthy: bool,
    pub legacy: bool,
}

impl PlannedReplicas {
    /// Whether this pass changes the cluster's replica count
    pub fn is_moving(&self) -> bool {
        self.replicas_this_reconciliation != self.current
    }

    /// Whether the cluster still needs passes after this one
    pub fn is_still_scaling(&self) -> bool {
        self.replicas_this_reconciliation != self.desired
    }

    /// Whether this pass brings the cluster to its declared member count
    pub fn reaches_target(&self) -> bool {
        self.replicas_this_reconciliation == self.target
    }
}

/// Replica counts for every member cluster of one component for one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPlan {
    pub component: ScalingComponent,
    pub scaling_first_time: bool,
    pub entries: Vec<PlannedReplicas>,
}

impl ScalingPlan {
    /// Evaluate a scaler for each entry of `member_clusters`, in snapshot order
    pub fn build(
        component: ScalingComponent,
        topology: &Topology,
        member_clusters: &[MemberCluster],
    ) -> Self {
        let entries: Vec<PlannedReplicas> = member_clusters
            .iter()
            .map(|member| {
                let scaler = scaler_for(component, topology, &member.name, member.index, member_clusters);
                let replicas = replicas_this_reconciliation(&scaler);
                debug!(%scaler, replicas_this_reconciliation = replicas, "Evaluated scaler");
                PlannedReplicas {
                    cluster_name: member.name.clone(),
                    index: member.index,
                    current: scaler.current_replicas(),
                    desired: scaler.desired_replicas(),
                    target: topology.members_for(&member.name),
                    replicas_this_reconciliation: replicas,
                    active: member.active,
                    healthy: member.healthy,
                    legacy: member.legacy,
                }
            })
            .collect();

        // whole-resource property, any member cluster's scaler answers it
        let scaling_first_time = match member_clusters.first() {
            Some(member) => {
                scaler_for(component, topology, &member.name, member.index, member_clusters).scaling_first_time()
            }
            None => true,
        };

        Self {
            component,
            scaling_first_time,
            entries,
        }
    }

    pub fn entry(&self, cluster_name: &str) -> Option<&PlannedReplicas> {
        self.entries.iter().find(|entry| entry.cluster_name == cluster_name)
    }

    /// Clusters whose replica count changes in this pass
    pub fn moving_clusters(&self) -> impl Iterator<Item = &PlannedReplicas> {
        self.entries.iter().filter(|entry| entry.is_moving())
    }

    /// Whether any cluster still needs passes after this one
    pub fn is_still_scaling(&self) -> bool {
        self.entries.iter().any(PlannedReplicas::is_still_scaling)
    }

    /// Whether every cluster ends this pass at its declared member count.
    ///
    /// Unlike [`ScalingPlan::is_still_scaling`] this also accounts for clusters
    /// still waiting for their turn.
    pub fn is_converged(&self) -> bool {
        self.entries.iter().all(PlannedReplicas::reaches_target)
    }

    /// Sum of the replicas requested in this pass
    pub fn total_replicas_this_reconciliation(&self) -> u32 {
        self.entries.iter().map(|entry| entry.replicas_this_reconciliation).sum()
    }
}
