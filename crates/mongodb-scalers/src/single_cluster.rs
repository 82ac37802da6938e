//! # Single-Cluster Scaler
//!
//! Used when a component lives in exactly one Kubernetes cluster. The
//! StatefulSet controller already creates and removes pods one at a time
//! there, so no cross-cluster throttling is applied.

use crate::member_cluster::LEGACY_CENTRAL_CLUSTER_NAME;
use crate::scaler::{Scaler, ScalingComponent};
use std::fmt;

/// Scaler for a component deployed in a single cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleClusterScaler {
    component: ScalingComponent,
    members: u32,
    observed_members: u32,
}

impl SingleClusterScaler {
    /// `members` is the declared count, `observed_members` the count last recorded in status
    pub fn new(component: ScalingComponent, members: u32, observed_members: u32) -> Self {
        Self {
            component,
            members,
            observed_members,
        }
    }

    pub fn component(&self) -> ScalingComponent {
        self.component
    }
}

impl Scaler for SingleClusterScaler {
    fn desired_replicas(&self) -> u32 {
        self.members
    }

    fn current_replicas(&self) -> u32 {
        self.observed_members
    }

    fn forced_individual_scaling(&self) -> bool {
        false
    }

    // TODO: a single large cluster can still race quorum-sensitive scale downs;
    // needs a product decision before throttling here as well.
    fn scaling_first_time(&self) -> bool {
        true
    }

    fn member_cluster_name(&self) -> &str {
        LEGACY_CENTRAL_CLUSTER_NAME
    }

    fn member_cluster_num(&self) -> usize {
        0
    }
}

impl fmt::Display for SingleClusterScaler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} single-cluster scaler: desired={}, current={}",
            self.component, self.members, self.observed_members
        )
    }
}
