//! # Kubernetes Reconciler
//!
//! Reconciliation logic for MongoDBMultiCluster resources. One pass reads the
//! persisted snapshot, plans the replica counts of every member cluster,
//! patches the StatefulSets and records the outcome back on the resource.

use crate::crds::{ClusterStatusItem, MongoDBMultiCluster, MongoDBMultiClusterSpec, MongoDBMultiClusterStatus, Phase};
use crate::error::{OperatorError, Result};
use crate::member_clients::{MemberClusterAccess, StatefulSetObservation};
use crate::state::DeploymentState;
use crate::OperatorConfig;
use futures::future::join_all;
use kube::api::{Api, Patch, PatchParams, ResourceExt};
use kube::runtime::controller::Action;
use kube::Client;
use mongodb_scalers::{
    member_cluster_list, MemberCluster, PlannedReplicas, ScalingComponent, ScalingPlan, Topology,
    LEGACY_CENTRAL_CLUSTER_NAME,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reject specs the scalers cannot work with
pub fn validate(spec: &MongoDBMultiClusterSpec) -> Result<()> {
    if !spec.is_multi_cluster() {
        return Ok(());
    }
    if spec.cluster_spec_list.is_empty() {
        return Err(OperatorError::Validation(
            "clusterSpecList must not be empty for a multi-cluster deployment".to_string(),
        ));
    }
    if let Some(name) = spec.cluster_spec_list().duplicate_cluster_name() {
        return Err(OperatorError::Validation(format!(
            "cluster {} appears more than once in clusterSpecList",
            name
        )));
    }
    Ok(())
}

/// StatefulSet backing a member cluster: `<name>-<index>`, or `<name>` for the legacy central cluster
pub fn statefulset_name(resource_name: &str, member: &PlannedReplicas) -> String {
    if member.legacy {
        resource_name.to_string()
    } else {
        format!("{}-{}", resource_name, member.index)
    }
}

/// Topology and snapshot for one pass.
///
/// Assigns indexes to clusters seen for the first time, so `state` must be
/// persisted afterwards.
pub fn scaling_inputs(
    resource: &MongoDBMultiCluster,
    state: &mut DeploymentState,
    healthy: &BTreeSet<String>,
) -> (Topology, Vec<MemberCluster>) {
    let spec = &resource.spec;

    if spec.is_multi_cluster() {
        let cluster_spec_list = spec.cluster_spec_list();
        state.cluster_mapping.assign_indexes(&cluster_spec_list.cluster_names());
        let state = &*state;
        let members = member_cluster_list(
            &cluster_spec_list,
            &state.cluster_mapping,
            |name| state.last_applied(name),
            |name| healthy.contains(name),
        );
        return (Topology::MultiCluster(cluster_spec_list), members);
    }

    // deployments created before the state annotations existed only recorded status.members
    let observed_members = match state.last_applied(LEGACY_CENTRAL_CLUSTER_NAME) {
        0 => resource.status.as_ref().map(|s| s.members).unwrap_or(0),
        last_applied => last_applied,
    };
    let member = MemberCluster {
        healthy: healthy.contains(LEGACY_CENTRAL_CLUSTER_NAME),
        ..MemberCluster::legacy_central(observed_members)
    };
    (
        Topology::SingleCluster {
            members: spec.members,
            observed_members,
        },
        vec![member],
    )
}

/// StatefulSet observations of one pass, `None` for a missing StatefulSet
pub type Observations = BTreeMap<String, Option<StatefulSetObservation>>;

/// Whether a removed cluster has no StatefulSet left, which is where draining ends
fn is_gone(entry: &PlannedReplicas, observations: &Observations) -> bool {
    !entry.active && matches!(observations.get(&entry.cluster_name), Some(None))
}

/// Whether the cluster's StatefulSet runs the count requested for it
fn is_at_requested(entry: &PlannedReplicas, observations: &Observations) -> bool {
    is_gone(entry, observations)
        || matches!(
            observations.get(&entry.cluster_name),
            Some(Some(observation)) if observation.is_at(entry.replicas_this_reconciliation)
        )
}

/// Whether every patched StatefulSet runs the count requested for it
pub fn all_at_requested(plan: &ScalingPlan, observations: &Observations) -> bool {
    plan.entries
        .iter()
        .filter(|entry| entry.healthy)
        .all(|entry| is_at_requested(entry, observations))
}

/// State to persist after a pass.
///
/// The requested counts only become the new snapshot once every patched
/// StatefulSet was observed at them; until then the previous snapshot is kept
/// and the next pass issues the same request.
pub fn next_state(state: &DeploymentState, plan: &ScalingPlan, observations: &Observations) -> DeploymentState {
    let mut next = state.clone();
    if !all_at_requested(plan, observations) {
        return next;
    }

    for entry in plan.entries.iter().filter(|entry| entry.healthy) {
        if !entry.active && (entry.replicas_this_reconciliation == 0 || is_gone(entry, observations)) {
            debug!(cluster = %entry.cluster_name, "Removed member cluster scaled down to zero");
            next.last_applied_member_spec.remove(&entry.cluster_name);
            continue;
        }
        next.last_applied_member_spec
            .insert(entry.cluster_name.clone(), entry.replicas_this_reconciliation);
    }
    next
}

/// Status describing a pass
pub fn build_status(
    previous: Option<&MongoDBMultiClusterStatus>,
    plan: &ScalingPlan,
    next: &DeploymentState,
    observations: &Observations,
    observed_generation: Option<i64>,
) -> MongoDBMultiClusterStatus {
    let cluster_status_list: Vec<ClusterStatusItem> = plan
        .entries
        .iter()
        .map(|entry| ClusterStatusItem {
            cluster_name: entry.cluster_name.clone(),
            index: entry.index,
            members: next.last_applied(&entry.cluster_name),
            requested: entry.replicas_this_reconciliation,
            desired: entry.target,
            ready: is_at_requested(entry, observations),
            healthy: entry.healthy,
        })
        .collect();

    let unhealthy: Vec<&str> = plan
        .entries
        .iter()
        .filter(|entry| !entry.healthy)
        .map(|entry| entry.cluster_name.as_str())
        .collect();
    let missing: Vec<&str> = plan
        .entries
        .iter()
        .filter(|entry| entry.active && matches!(observations.get(&entry.cluster_name), Some(None)))
        .map(|entry| entry.cluster_name.as_str())
        .collect();

    let all_ready = all_at_requested(plan, observations);
    let scaling: Vec<&str> = plan
        .entries
        .iter()
        .filter(|entry| !entry.reaches_target() && !is_gone(entry, observations))
        .map(|entry| entry.cluster_name.as_str())
        .collect();
    let (phase, message) = if !missing.is_empty() {
        (
            Phase::Pending,
            Some(format!("StatefulSet not found in member clusters: {}", missing.join(", "))),
        )
    } else if !unhealthy.is_empty() {
        (
            Phase::Pending,
            Some(format!("Member clusters unreachable: {}", unhealthy.join(", "))),
        )
    } else if !all_ready {
        (Phase::Pending, Some("Waiting for StatefulSets to reach the requested replicas".to_string()))
    } else if !scaling.is_empty() {
        (
            Phase::Pending,
            Some(format!("Scaling member clusters one member at a time: {}", scaling.join(", "))),
        )
    } else {
        (Phase::Running, None)
    };

    let last_transition = match previous {
        Some(prev) if prev.phase == phase => prev.last_transition.clone(),
        _ => Some(chrono::Utc::now().to_rfc3339()),
    };

    MongoDBMultiClusterStatus {
        phase,
        members: cluster_status_list.iter().map(|item| item.members).sum(),
        cluster_status_list,
        message,
        last_transition,
        observed_generation,
    }
}

/// Result of one reconciliation pass, before it is written back
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub plan: ScalingPlan,
    pub state: DeploymentState,
    pub status: MongoDBMultiClusterStatus,
}

/// Run one scaling pass against the member clusters
pub async fn run_pass(access: &dyn MemberClusterAccess, resource: &MongoDBMultiCluster) -> Result<PassOutcome> {
    let name = resource.name_any();
    let namespace = resource
        .namespace()
        .ok_or_else(|| OperatorError::MissingNamespace(name.clone()))?;

    validate(&resource.spec)?;

    let mut state = DeploymentState::from_annotations(resource.annotations());
    let healthy = access.healthy_clusters().await;
    let (topology, members) = scaling_inputs(resource, &mut state, &healthy);
    let plan = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);

    info!(
        resource = %name,
        namespace = %namespace,
        first_time = plan.scaling_first_time,
        moving = plan.moving_clusters().count(),
        "Planned scaling pass"
    );

    let patches = plan.entries.iter().filter(|entry| entry.healthy).map(|entry| {
        let sts_name = statefulset_name(&name, entry);
        let namespace = namespace.as_str();
        async move {
            let observation = access
                .scale_statefulset(&entry.cluster_name, namespace, &sts_name, entry.replicas_this_reconciliation)
                .await?;
            Ok::<_, OperatorError>((entry.cluster_name.clone(), observation))
        }
    });

    let mut observations = Observations::new();
    for result in join_all(patches).await {
        let (cluster_name, observation) = result?;
        observations.insert(cluster_name, observation);
    }

    for entry in plan.entries.iter().filter(|entry| !entry.healthy) {
        warn!(resource = %name, cluster = %entry.cluster_name, "Skipping unreachable member cluster");
    }

    let next = next_state(&state, &plan, &observations);
    let status = build_status(
        resource.status.as_ref(),
        &plan,
        &next,
        &observations,
        resource.metadata.generation,
    );

    Ok(PassOutcome {
        plan,
        state: next,
        status,
    })
}

/// Reconciler for MongoDBMultiCluster resources
pub struct MongoDBReconciler {
    client: Client,
    access: Arc<dyn MemberClusterAccess>,
    config: OperatorConfig,
}

impl MongoDBReconciler {
    pub fn new(client: Client, access: Arc<dyn MemberClusterAccess>, config: OperatorConfig) -> Self {
        Self { client, access, config }
    }

    /// Main reconciliation logic
    pub async fn reconcile(&self, resource: Arc<MongoDBMultiCluster>) -> Result<PassOutcome> {
        let name = resource.name_any();
        info!(resource = %name, namespace = ?resource.namespace(), "Reconciling MongoDBMultiCluster");

        let outcome = run_pass(self.access.as_ref(), &resource).await?;
        let api = self.api_for(&resource)?;

        let previous = DeploymentState::from_annotations(resource.annotations());
        if outcome.state != previous {
            self.write_state(&api, &name, &outcome.state).await?;
        }
        if resource.status.as_ref() != Some(&outcome.status) {
            self.write_status(&api, &name, &outcome.status).await?;
        }

        info!(
            resource = %name,
            phase = %outcome.status.phase,
            members = outcome.status.members,
            "Reconciliation finished"
        );
        Ok(outcome)
    }

    /// Requeue quickly while scaling is in progress
    pub fn requeue_action(&self, outcome: &PassOutcome) -> Action {
        match outcome.status.phase {
            Phase::Running => Action::requeue(self.config.running_requeue),
            _ => Action::requeue(self.config.pending_requeue),
        }
    }

    /// Record a failed pass on the resource status
    pub async fn record_failure(&self, resource: &MongoDBMultiCluster, error: &OperatorError) -> Result<()> {
        let api = self.api_for(resource)?;
        let previous = resource.status.clone().unwrap_or_default();

        let status = MongoDBMultiClusterStatus {
            phase: Phase::Failed,
            message: Some(format!("{}: {}", error.reason(), error)),
            last_transition: if previous.phase == Phase::Failed {
                previous.last_transition.clone()
            } else {
                Some(chrono::Utc::now().to_rfc3339())
            },
            observed_generation: resource.metadata.generation,
            ..previous
        };

        self.write_status(&api, &resource.name_any(), &status).await
    }

    fn api_for(&self, resource: &MongoDBMultiCluster) -> Result<Api<MongoDBMultiCluster>> {
        let namespace = resource
            .namespace()
            .ok_or_else(|| OperatorError::MissingNamespace(resource.name_any()))?;
        Ok(Api::namespaced(self.client.clone(), &namespace))
    }

    async fn write_state(&self, api: &Api<MongoDBMultiCluster>, name: &str, state: &DeploymentState) -> Result<()> {
        let patch = json!({ "metadata": { "annotations": state.to_annotations()? } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        debug!(resource = name, "Updated scaling state annotations");
        Ok(())
    }

    async fn write_status(
        &self,
        api: &Api<MongoDBMultiCluster>,
        name: &str,
        status: &MongoDBMultiClusterStatus,
    ) -> Result<()> {
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        debug!(resource = name, phase = %status.phase, "Updated status");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{ClusterSpecEntry, ResourceTopology};
    use crate::state::{CLUSTER_MAPPING_ANNOTATION, LAST_APPLIED_MEMBER_SPEC_ANNOTATION};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn resource(clusters: &[(&str, u32)], annotations: &[(&str, &str)]) -> MongoDBMultiCluster {
        MongoDBMultiCluster {
            metadata: ObjectMeta {
                name: Some("my-replica-set".to_string()),
                namespace: Some("mongodb".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                generation: Some(2),
                ..Default::default()
            },
            spec: MongoDBMultiClusterSpec {
                cluster_spec_list: clusters
                    .iter()
                    .map(|(name, members)| ClusterSpecEntry {
                        cluster_name: name.to_string(),
                        members: *members,
                    })
                    .collect(),
                ..Default::default()
            },
            status: None,
        }
    }

    fn healthy(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn at(replicas: u32) -> Option<StatefulSetObservation> {
        Some(StatefulSetObservation::new(replicas, replicas))
    }

    #[test]
    fn test_validate() {
        assert!(validate(&resource(&[("a", 1)], &[]).spec).is_ok());

        let err = validate(&resource(&[], &[]).spec).unwrap_err();
        assert!(matches!(err, OperatorError::Validation(_)));

        let err = validate(&resource(&[("a", 1), ("a", 2)], &[]).spec).unwrap_err();
        assert!(err.to_string().contains("cluster a appears more than once"));

        let single = MongoDBMultiClusterSpec {
            topology: ResourceTopology::SingleCluster,
            members: 3,
            ..Default::default()
        };
        assert!(validate(&single).is_ok());
    }

    #[test]
    fn test_statefulset_name() {
        let mut entry = PlannedReplicas {
            cluster_name: "c1".to_string(),
            index: 2,
            current: 0,
            desired: 0,
            target: 0,
            replicas_this_reconciliation: 0,
            active: true,
            healthy: true,
            legacy: false,
        };
        assert_eq!(statefulset_name("rs", &entry), "rs-2");
        entry.legacy = true;
        assert_eq!(statefulset_name("rs", &entry), "rs");
    }

    #[test]
    fn test_scaling_inputs_assigns_indexes_and_keeps_removed_cluster() {
        let res = resource(
            &[("c1", 3), ("c3", 1)],
            &[
                (CLUSTER_MAPPING_ANNOTATION, r#"{"c1":0,"c2":1}"#),
                (LAST_APPLIED_MEMBER_SPEC_ANNOTATION, r#"{"c1":3,"c2":2}"#),
            ],
        );
        let mut state = DeploymentState::from_annotations(res.annotations());

        let (topology, members) = scaling_inputs(&res, &mut state, &healthy(&["c1", "c2", "c3"]));

        assert!(topology.is_multi_cluster());
        assert_eq!(state.cluster_mapping.index_of("c3"), Some(2));
        let names: Vec<_> = members.iter().map(|m| (m.name.as_str(), m.index, m.replicas, m.active)).collect();
        assert_eq!(names, vec![("c1", 0, 3, true), ("c2", 1, 2, false), ("c3", 2, 0, true)]);
    }

    #[test]
    fn test_scaling_inputs_single_cluster_falls_back_to_status() {
        let mut res = resource(&[], &[]);
        res.spec.topology = ResourceTopology::SingleCluster;
        res.spec.members = 5;
        res.status = Some(MongoDBMultiClusterStatus {
            members: 3,
            ..Default::default()
        });
        let mut state = DeploymentState::default();

        let (topology, members) = scaling_inputs(&res, &mut state, &healthy(&[LEGACY_CENTRAL_CLUSTER_NAME]));

        assert_eq!(
            topology,
            Topology::SingleCluster {
                members: 5,
                observed_members: 3
            }
        );
        assert_eq!(members.len(), 1);
        assert!(members[0].legacy);
        assert!(members[0].healthy);
        assert_eq!(members[0].replicas, 3);
    }

    #[test]
    fn test_next_state_waits_for_all_statefulsets() {
        let res = resource(
            &[("c1", 3), ("c2", 3)],
            &[
                (CLUSTER_MAPPING_ANNOTATION, r#"{"c1":0,"c2":1}"#),
                (LAST_APPLIED_MEMBER_SPEC_ANNOTATION, r#"{"c1":3,"c2":2}"#),
            ],
        );
        let mut state = DeploymentState::from_annotations(res.annotations());
        let (topology, members) = scaling_inputs(&res, &mut state, &healthy(&["c1", "c2"]));
        let plan = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);

        let pending: Observations = [("c1".to_string(), at(3)), ("c2".to_string(), Some(StatefulSetObservation::new(3, 2)))]
            .into_iter()
            .collect();
        assert_eq!(next_state(&state, &plan, &pending), state);

        let done: Observations = [("c1".to_string(), at(3)), ("c2".to_string(), at(3))].into_iter().collect();
        let next = next_state(&state, &plan, &done);
        assert_eq!(next.last_applied("c2"), 3);

        let status = build_status(None, &plan, &next, &done, Some(2));
        assert_eq!(status.phase, Phase::Running);
        assert_eq!(status.members, 6);
        assert_eq!(status.observed_generation, Some(2));
    }

    #[test]
    fn test_next_state_prunes_removed_cluster_at_zero() {
        let res = resource(
            &[("c1", 3)],
            &[
                (CLUSTER_MAPPING_ANNOTATION, r#"{"c1":0,"c2":1}"#),
                (LAST_APPLIED_MEMBER_SPEC_ANNOTATION, r#"{"c1":3,"c2":1}"#),
            ],
        );
        let mut state = DeploymentState::from_annotations(res.annotations());
        let (topology, members) = scaling_inputs(&res, &mut state, &healthy(&["c1", "c2"]));
        let plan = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);
        assert_eq!(plan.entry("c2").unwrap().replicas_this_reconciliation, 0);

        let observations: Observations = [("c1".to_string(), at(3)), ("c2".to_string(), at(0))].into_iter().collect();
        let next = next_state(&state, &plan, &observations);

        assert!(!next.last_applied_member_spec.contains_key("c2"));
        assert_eq!(next.cluster_mapping.index_of("c2"), Some(1));
    }

    #[test]
    fn test_scaling_inputs_single_cluster_zero_last_applied_falls_back_to_status() {
        let mut res = resource(&[], &[(LAST_APPLIED_MEMBER_SPEC_ANNOTATION, r#"{"__default":0}"#)]);
        res.spec.topology = ResourceTopology::SingleCluster;
        res.spec.members = 5;
        res.status = Some(MongoDBMultiClusterStatus {
            members: 4,
            ..Default::default()
        });
        let mut state = DeploymentState::from_annotations(res.annotations());

        let (topology, members) = scaling_inputs(&res, &mut state, &healthy(&[LEGACY_CENTRAL_CLUSTER_NAME]));

        assert_eq!(
            topology,
            Topology::SingleCluster {
                members: 5,
                observed_members: 4
            }
        );
        assert_eq!(members[0].replicas, 4);
    }

    #[test]
    fn test_removed_cluster_without_statefulset_is_pruned() {
        let res = resource(
            &[("c1", 3), ("c2", 2)],
            &[
                (CLUSTER_MAPPING_ANNOTATION, r#"{"c1":0,"c2":1,"c3":2}"#),
                (LAST_APPLIED_MEMBER_SPEC_ANNOTATION, r#"{"c1":3,"c2":2,"c3":2}"#),
            ],
        );
        let mut state = DeploymentState::from_annotations(res.annotations());
        let (topology, members) = scaling_inputs(&res, &mut state, &healthy(&["c1", "c2", "c3"]));
        let plan = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);
        assert_eq!(plan.entry("c3").unwrap().replicas_this_reconciliation, 1);

        let observations: Observations = [("c1".to_string(), at(3)), ("c2".to_string(), at(2)), ("c3".to_string(), None)]
            .into_iter()
            .collect();
        assert!(all_at_requested(&plan, &observations));

        let next = next_state(&state, &plan, &observations);
        assert!(!next.last_applied_member_spec.contains_key("c3"));
        assert_eq!(next.cluster_mapping.index_of("c3"), Some(2));

        let status = build_status(None, &plan, &next, &observations, None);
        assert_eq!(status.phase, Phase::Running);
        assert_eq!(status.members, 5);
        assert!(status.cluster_status_list[2].ready);
    }

    #[test]
    fn test_status_reports_missing_statefulset() {
        let res = resource(&[("c1", 1)], &[]);
        let mut state = DeploymentState::default();
        let (topology, members) = scaling_inputs(&res, &mut state, &healthy(&["c1"]));
        let plan = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);
        let observations: Observations = [("c1".to_string(), None)].into_iter().collect();

        let next = next_state(&state, &plan, &observations);
        let status = build_status(None, &plan, &next, &observations, None);

        assert_eq!(status.phase, Phase::Pending);
        assert!(status.message.unwrap().contains("c1"));
        assert!(!status.cluster_status_list[0].ready);
    }

    #[test]
    fn test_status_unreachable_cluster_keeps_previous_members() {
        let res = resource(
            &[("c1", 3), ("c2", 2)],
            &[
                (CLUSTER_MAPPING_ANNOTATION, r#"{"c1":0,"c2":1}"#),
                (LAST_APPLIED_MEMBER_SPEC_ANNOTATION, r#"{"c1":3,"c2":2}"#),
            ],
        );
        let mut state = DeploymentState::from_annotations(res.annotations());
        let (topology, members) = scaling_inputs(&res, &mut state, &healthy(&["c1"]));
        let plan = ScalingPlan::build(ScalingComponent::ReplicaSet, &topology, &members);
        let observations: Observations = [("c1".to_string(), at(3))].into_iter().collect();

        let next = next_state(&state, &plan, &observations);
        let status = build_status(None, &plan, &next, &observations, None);

        assert_eq!(next.last_applied("c2"), 2);
        assert_eq!(status.phase, Phase::Pending);
        assert!(status.message.unwrap().contains("unreachable"));
        assert!(!status.cluster_status_list[1].healthy);
    }

    #[test]
    fn test_last_transition_kept_while_phase_unchanged() {
        let previous = MongoDBMultiClusterStatus {
            phase: Phase::Running,
            last_transition: Some("2024-01-01T00:00:00+00:00".to_string()),
            ..Default::default()
        };
        let plan = ScalingPlan::build(ScalingComponent::ReplicaSet, &Topology::MultiCluster(Default::default()), &[]);

        let status = build_status(Some(&previous), &plan, &DeploymentState::default(), &Observations::new(), None);
        assert_eq!(status.phase, Phase::Running);
        assert_eq!(status.last_transition, previous.last_transition);
    }
}
