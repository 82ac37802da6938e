//! # MongoDB Scalers
//!
//! Incremental replica scaling for MongoDB replica sets spread over several
//! independently reconciled Kubernetes clusters.
//!
//! Given the declared per-cluster topology and the last observed replica
//! counts, the scalers decide how many replicas each member cluster may run
//! in the current reconciliation: everything at once on first provisioning,
//! afterwards one cluster at a time and one member at a time.

pub mod member_cluster;
pub mod multi_cluster;
pub mod plan;
pub mod scaler;
pub mod single_cluster;
pub mod topology;

pub use member_cluster::{member_cluster_list, ClusterMapping, MemberCluster, LEGACY_CENTRAL_CLUSTER_NAME};
pub use multi_cluster::MultiClusterReplicaSetScaler;
pub use plan::{PlannedReplicas, ScalingPlan};
pub use scaler::{is_still_scaling, replicas_this_reconciliation, scaler_for, Scaler, ScalingComponent};
pub use single_cluster::SingleClusterScaler;
pub use topology::{ClusterSpecItem, ClusterSpecList, Topology};
