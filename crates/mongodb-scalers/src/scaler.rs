//! # Scaler Capability
//!
//! The interface every scalable component implements, and the stepping
//! function that turns a scaler's answer into the replica count to request
//! on the StatefulSet this reconciliation

use crate::member_cluster::MemberCluster;
use crate::multi_cluster::MultiClusterReplicaSetScaler;
use crate::single_cluster::SingleClusterScaler;
use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Replica counts of one member cluster for one reconciliation pass.
///
/// Implementations are pure reads over in-memory data; nothing here can fail.
/// `Display` gives a one-line summary for logs.
pub trait Scaler: fmt::Display {
    /// Target for this member cluster in this pass, after cross-cluster turn taking
    fn desired_replicas(&self) -> u32;

    /// Last observed replica count, 0 for a cluster never seen before
    fn current_replicas(&self) -> u32;

    /// Whether the change has to be capped to a single member per pass
    fn forced_individual_scaling(&self) -> bool;

    /// Whether the whole resource, over all member clusters, was never scaled
    fn scaling_first_time(&self) -> bool;

    fn member_cluster_name(&self) -> &str;

    fn member_cluster_num(&self) -> usize;
}

impl<S: Scaler + ?Sized> Scaler for Box<S> {
    fn desired_replicas(&self) -> u32 {
        (**self).desired_replicas()
    }

    fn current_replicas(&self) -> u32 {
        (**self).current_replicas()
    }

    fn forced_individual_scaling(&self) -> bool {
        (**self).forced_individual_scaling()
    }

    fn scaling_first_time(&self) -> bool {
        (**self).scaling_first_time()
    }

    fn member_cluster_name(&self) -> &str {
        (**self).member_cluster_name()
    }

    fn member_cluster_num(&self) -> usize {
        (**self).member_cluster_num()
    }
}

/// Replica count to set on the StatefulSet in this reconciliation.
///
/// Without forced individual scaling the target is applied at once. Otherwise
/// the count moves by exactly one member towards the target, including for a
/// cluster at zero that joins an already running deployment.
pub fn replicas_this_reconciliation<S: Scaler + ?Sized>(scaler: &S) -> u32 {
    let current = scaler.current_replicas();
    let desired = scaler.desired_replicas();

    if !scaler.forced_individual_scaling() {
        return desired;
    }

    match desired.cmp(&current) {
        Ordering::Equal => current,
        Ordering::Greater => current + 1,
        Ordering::Less => current - 1,
    }
}

/// Whether more passes are needed before the scaler reaches its target
pub fn is_still_scaling<S: Scaler + ?Sized>(scaler: &S) -> bool {
    replicas_this_reconciliation(scaler) != scaler.desired_replicas()
}

/// Which part of a deployment a scaler computes replicas for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalingComponent {
    #[default]
    ReplicaSet,
    AppDb,
    Shard(usize),
    ConfigServer,
    Mongos,
}

impl fmt::Display for ScalingComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingComponent::ReplicaSet => write!(f, "replicaset"),
            ScalingComponent::AppDb => write!(f, "appdb"),
            ScalingComponent::Shard(idx) => write!(f, "shard idx {}", idx),
            ScalingComponent::ConfigServer => write!(f, "configSrv"),
            ScalingComponent::Mongos => write!(f, "mongos"),
        }
    }
}

/// Pick the scaler variant matching `topology`
pub fn scaler_for<'a>(
    component: ScalingComponent,
    topology: &'a Topology,
    member_cluster_name: &'a str,
    member_cluster_num: usize,
    prev_members: &'a [MemberCluster],
) -> Box<dyn Scaler + 'a> {
    match topology {
        Topology::SingleCluster {
            members,
            observed_members,
        } => Box::new(SingleClusterScaler::new(component, *members, *observed_members)),
        Topology::MultiCluster(cluster_spec_list) => Box::new(MultiClusterReplicaSetScaler::new(
            component,
            cluster_spec_list,
            member_cluster_name,
            member_cluster_num,
            prev_members,
        )),
    }
}
