//! # Operator Errors

use thiserror::Error;

/// Errors raised while reconciling a MongoDBMultiCluster resource
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid resource spec: {0}")]
    Validation(String),

    #[error("Resource {0} has no namespace")]
    MissingNamespace(String),

    #[error("No client configured for member cluster {0}")]
    UnknownMemberCluster(String),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

impl OperatorError {
    /// Short machine readable reason, used in status messages and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            OperatorError::Kube(_) => "KubernetesApiError",
            OperatorError::Kubeconfig(_) => "KubeconfigError",
            OperatorError::Serialization(_) => "SerializationError",
            OperatorError::Validation(_) => "ValidationError",
            OperatorError::MissingNamespace(_) => "MissingNamespace",
            OperatorError::UnknownMemberCluster(_) => "UnknownMemberCluster",
            OperatorError::Server(_) => "ServerError",
        }
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;
