//! # Multi-Cluster Replica Set Scaler
//!
//! Turn taking between member clusters: only the first cluster of the
//! snapshot with a pending change may move, every other cluster holds its
//! observed replica count until that cluster is done

use crate::member_cluster::MemberCluster;
use crate::scaler::{Scaler, ScalingComponent};
use crate::topology::ClusterSpecList;
use std::fmt;

/// Scaler for one member cluster of a replica set spread over several clusters
#[derive(Debug, Clone)]
pub struct MultiClusterReplicaSetScaler<'a> {
    component: ScalingComponent,
    cluster_spec_list: &'a ClusterSpecList,
    member_cluster_name: &'a str,
    member_cluster_num: usize,
    prev_members: &'a [MemberCluster],
}

impl<'a> MultiClusterReplicaSetScaler<'a> {
    pub fn new(
        component: ScalingComponent,
        cluster_spec_list: &'a ClusterSpecList,
        member_cluster_name: &'a str,
        member_cluster_num: usize,
        prev_members: &'a [MemberCluster],
    ) -> Self {
        Self {
            component,
            cluster_spec_list,
            member_cluster_name,
            member_cluster_num,
            prev_members,
        }
    }

    pub fn component(&self) -> ScalingComponent {
        self.component
    }

    /// First snapshot entry, in snapshot order, whose spec target differs from what was observed
    fn first_pending(&self) -> Option<(&'a MemberCluster, u32)> {
        self.prev_members.iter().find_map(|member| {
            let replicas_in_spec = self.cluster_spec_list.members_for(&member.name);
            (replicas_in_spec != member.replicas).then_some((member, replicas_in_spec))
        })
    }
}

impl Scaler for MultiClusterReplicaSetScaler<'_> {
    fn desired_replicas(&self) -> u32 {
        if self.scaling_first_time() {
            return self.cluster_spec_list.members_for(self.member_cluster_name);
        }

        match self.first_pending() {
            Some((member, replicas_in_spec)) if member.name == self.member_cluster_name => {
                replicas_in_spec
            }
            // another cluster holds the turn, or nothing is pending
            _ => self.current_replicas(),
        }
    }

    fn current_replicas(&self) -> u32 {
        self.prev_members
            .iter()
            .find(|member| member.name == self.member_cluster_name)
            .map(|member| member.replicas)
            .unwrap_or(0)
    }

    fn forced_individual_scaling(&self) -> bool {
        !self.scaling_first_time()
    }

    fn scaling_first_time(&self) -> bool {
        self.prev_members.iter().all(|member| member.replicas == 0)
    }

    fn member_cluster_name(&self) -> &str {
        self.member_cluster_name
    }

    fn member_cluster_num(&self) -> usize {
        self.member_cluster_num
    }
}

impl fmt::Display for MultiClusterReplicaSetScaler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scaler for member cluster {} ({}): desired={}, current={}, forcedIndividualScaling={}",
            self.component,
            self.member_cluster_name,
            self.member_cluster_num,
            self.desired_replicas(),
            self.current_replicas(),
            self.forced_individual_scaling()
        )
    }
}
