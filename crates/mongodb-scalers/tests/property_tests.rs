//! Property tests for the scaling plan

use mongodb_scalers::{ClusterSpecItem, ClusterSpecList, MemberCluster, ScalingComponent, ScalingPlan, Topology};
use proptest::prelude::*;

/// Up to five clusters, each with a spec target and an observed count
fn clusters() -> impl Strategy<Value = Vec<(u32, u32)>> {
    prop::collection::vec((0u32..7, 0u32..7), 1..5)
}

fn build(clusters: &[(u32, u32)]) -> (Topology, Vec<MemberCluster>) {
    let spec: ClusterSpecList = clusters
        .iter()
        .enumerate()
        .map(|(i, (target, _))| ClusterSpecItem::new(format!("cluster-{}", i), *target))
        .collect();
    let members = clusters
        .iter()
        .enumerate()
        .map(|(i, (_, observed))| MemberCluster::new(format!("cluster-{}", i), i, *observed))
        .collect();
    (Topology::MultiCluster(spec), members)
}

/// Feed the plan back as the next snapshot, as if every request was observed
fn advance(plan: &ScalingPlan, members: &[MemberCluster]) -> Vec<MemberCluster> {
    members
        .iter()
        .map(|member| {
            let replicas = plan
                .entry(&member.name)
                .map(|entry| entry.replicas_this_reconciliation)
                .unwrap_or(member.replicas);
            MemberCluster::new(member.name.clone(), member.index, replicas)
        })
        .collect()
}

proptest! {
    #[test]
    fn at_most_one_cluster_moves_once_running(clusters in clusters()) {
        let (topology, members) = build(&clusters);
        let plan = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);

        if !plan.scaling_first_time {
            prop_assert!(plan.moving_clusters().count() <= 1);
            for entry in &plan.entries {
                prop_assert!(entry.replicas_this_reconciliation.abs_diff(entry.current) <= 1);
            }
        }
    }

    #[test]
    fn first_time_jumps_to_target(targets in prop::collection::vec(0u32..7, 1..5)) {
        let clusters: Vec<(u32, u32)> = targets.iter().map(|t| (*t, 0)).collect();
        let (topology, members) = build(&clusters);
        let plan = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);

        prop_assert!(plan.scaling_first_time);
        for (entry, target) in plan.entries.iter().zip(&targets) {
            prop_assert_eq!(entry.replicas_this_reconciliation, *target);
        }
    }

    #[test]
    fn plan_is_idempotent(clusters in clusters()) {
        let (topology, members) = build(&clusters);
        let first = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);
        let second = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);

        prop_assert_eq!(first, second);
    }

    #[test]
    fn repeated_passes_converge_to_spec(clusters in clusters()) {
        let (topology, mut members) = build(&clusters);
        // each pass moves one member of one cluster, bounded by the total distance
        let budget: u32 = clusters.iter().map(|(t, o)| t.abs_diff(*o)).sum::<u32>() + 1;

        for _ in 0..budget {
            let plan = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);
            members = advance(&plan, &members);
        }

        for (member, (target, _)) in members.iter().zip(&clusters) {
            prop_assert_eq!(member.replicas, *target);
        }
    }
}
