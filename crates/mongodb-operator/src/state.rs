//! # Deployment State
//!
//! Scaling state carried between reconciliations in annotations on the
//! resource itself: the stable cluster index mapping and the replica counts
//! last applied per member cluster.

use crate::error::Result;
use mongodb_scalers::ClusterMapping;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::warn;

pub const CLUSTER_MAPPING_ANNOTATION: &str = "mongodb.com/v1.clusterMapping";
pub const LAST_APPLIED_MEMBER_SPEC_ANNOTATION: &str = "mongodb.com/v1.lastAppliedMemberSpec";

/// State persisted between reconciliations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentState {
    pub cluster_mapping: ClusterMapping,
    pub last_applied_member_spec: BTreeMap<String, u32>,
}

impl DeploymentState {
    /// Read the state from resource annotations.
    ///
    /// A missing or unparsable annotation yields empty state for that part,
    /// which the scalers treat as a first deployment.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        Self {
            cluster_mapping: parse_annotation(annotations, CLUSTER_MAPPING_ANNOTATION),
            last_applied_member_spec: parse_annotation(annotations, LAST_APPLIED_MEMBER_SPEC_ANNOTATION),
        }
    }

    pub fn to_annotations(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([
            (
                CLUSTER_MAPPING_ANNOTATION.to_string(),
                serde_json::to_string(&self.cluster_mapping)?,
            ),
            (
                LAST_APPLIED_MEMBER_SPEC_ANNOTATION.to_string(),
                serde_json::to_string(&self.last_applied_member_spec)?,
            ),
        ]))
    }

    /// Replica count last applied in `cluster_name`, 0 if never applied
    pub fn last_applied(&self, cluster_name: &str) -> u32 {
        self.last_applied_member_spec.get(cluster_name).copied().unwrap_or(0)
    }
}

fn parse_annotation<T: DeserializeOwned + Default>(annotations: &BTreeMap<String, String>, key: &str) -> T {
    match annotations.get(key) {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!(annotation = key, error = %e, "Ignoring unparsable state annotation");
            T::default()
        }),
        None => T::default(),
    }
}
