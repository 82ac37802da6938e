//! # Kubernetes Operator Manager
//!
//! Wires clients, controller and the health and metrics endpoints together
//! and runs them until a shutdown signal arrives.

use crate::controller::{Context, ControllerMetrics, MongoDBController};
use crate::error::Result;
use crate::member_clients::{MemberClusterAccess, MemberClusterClients};
use crate::reconciler::MongoDBReconciler;
use crate::OperatorConfig;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Router};
use kube::Client;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Main operator manager
pub struct OperatorManager {
    config: OperatorConfig,
    client: Client,
    context: Arc<Context>,
    ready: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl OperatorManager {
    /// Connect to the central cluster and every configured member cluster
    pub async fn new(config: OperatorConfig) -> Result<Self> {
        let client = Client::try_default().await?;

        let clients = match &config.member_kubeconfig {
            Some(path) => MemberClusterClients::from_kubeconfig(client.clone(), path, &config.member_clusters).await?,
            None => {
                if !config.member_clusters.is_empty() {
                    warn!("Member clusters configured without a member kubeconfig, only the central cluster is used");
                }
                MemberClusterClients::central_only(client.clone())
            }
        };
        let access: Arc<dyn MemberClusterAccess> = Arc::new(clients);

        let reconciler = Arc::new(MongoDBReconciler::new(client.clone(), access, config.clone()));
        let context = Arc::new(Context {
            reconciler,
            metrics: Arc::new(ControllerMetrics::default()),
            config: config.clone(),
        });
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            client,
            context,
            ready: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        })
    }

    /// Start the operator
    pub async fn run(self) -> Result<()> {
        info!("Starting MongoDB multi-cluster operator v{}", env!("CARGO_PKG_VERSION"));
        info!(config = ?self.config, "Configuration");

        let controller =
            MongoDBController::new(self.client.clone(), Arc::clone(&self.context)).with_ready(Arc::clone(&self.ready));

        let health_handle = self.start_health_server();
        let metrics_handle = if self.config.enable_monitoring {
            Some(self.start_metrics_server())
        } else {
            None
        };

        let shutdown_tx = self.shutdown_tx.clone();
        let controller_handle = tokio::spawn(async move {
            if let Err(e) = controller.run().await {
                error!(error = %e, "Controller failed");
            }
            let _ = shutdown_tx.send(());
        });

        self.wait_for_shutdown().await;

        info!("Shutdown signal received, stopping operator...");
        controller_handle.abort();
        health_handle.abort();
        if let Some(handle) = metrics_handle {
            handle.abort();
        }

        info!("MongoDB operator stopped");
        Ok(())
    }

    /// Start health check HTTP server
    fn start_health_server(&self) -> JoinHandle<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.health_port));
        let app = health_router(Arc::clone(&self.ready));
        info!("Starting health check server on {}", addr);
        tokio::spawn(serve_logged(addr, app))
    }

    /// Start metrics HTTP server
    fn start_metrics_server(&self) -> JoinHandle<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.metrics_port));
        let app = metrics_router(Arc::clone(&self.context.metrics));
        info!("Starting metrics server on {}", addr);
        tokio::spawn(serve_logged(addr, app))
    }

    /// Wait for shutdown signals
    async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
            }
            _ = terminate() => {
                info!("Received SIGTERM, shutting down");
            }
            _ = shutdown_rx.recv() => {
                info!("Received shutdown signal from internal component");
            }
        }
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn metrics(&self) -> Arc<ControllerMetrics> {
        Arc::clone(&self.context.metrics)
    }

    /// Send shutdown signal
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn serve_logged(addr: SocketAddr, app: Router) {
    if let Err(e) = serve(addr, app).await {
        error!(%addr, reason = e.reason(), error = %e, "HTTP server failed");
    }
}

/// `/health` always answers, `/ready` only once the controller runs
pub fn health_router(ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(ready_handler))
        .with_state(ready)
}

async fn ready_handler(State(ready): State<Arc<AtomicBool>>) -> (StatusCode, &'static str) {
    if ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

pub fn metrics_router(metrics: Arc<ControllerMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(|State(metrics): State<Arc<ControllerMetrics>>| async move { metrics.render() }))
        .with_state(metrics)
}

/// Operator builder for fluent configuration
pub struct OperatorBuilder {
    config: OperatorConfig,
}

impl OperatorBuilder {
    pub fn new() -> Self {
        Self {
            config: OperatorConfig::default(),
        }
    }

    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.config.namespace = namespace;
        self
    }

    pub fn member_kubeconfig(mut self, path: Option<PathBuf>) -> Self {
        self.config.member_kubeconfig = path;
        self
    }

    pub fn member_clusters(mut self, clusters: Vec<String>) -> Self {
        self.config.member_clusters = clusters;
        self
    }

    pub fn pending_requeue(mut self, interval: Duration) -> Self {
        self.config.pending_requeue = interval;
        self
    }

    pub fn running_requeue(mut self, interval: Duration) -> Self {
        self.config.running_requeue = interval;
        self
    }

    pub fn error_requeue(mut self, interval: Duration) -> Self {
        self.config.error_requeue = interval;
        self
    }

    pub fn health_port(mut self, port: u16) -> Self {
        self.config.health_port = port;
        self
    }

    pub fn metrics_port(mut self, port: u16) -> Self {
        self.config.metrics_port = port;
        self
    }

    pub fn enable_monitoring(mut self, enable: bool) -> Self {
        self.config.enable_monitoring = enable;
        self
    }

    pub fn install_crd(mut self, install: bool) -> Self {
        self.config.install_crd = install;
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub async fn build(self) -> Result<OperatorManager> {
        OperatorManager::new(self.config).await
    }
}

impl Default for OperatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_builder() {
        let builder = OperatorBuilder::new()
            .namespace(Some("mongodb".to_string()))
            .member_clusters(vec!["cluster-1".to_string(), "cluster-2".to_string()])
            .pending_requeue(Duration::from_secs(5))
            .enable_monitoring(false);

        assert_eq!(builder.config().namespace.as_deref(), Some("mongodb"));
        assert_eq!(builder.config().member_clusters.len(), 2);
        assert_eq!(builder.config().pending_requeue, Duration::from_secs(5));
        assert!(!builder.config().enable_monitoring);
    }

    #[tokio::test]
    async fn test_serve_reports_bind_failure() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let err = serve(addr, health_router(Arc::new(AtomicBool::new(true))))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::OperatorError::Server(_)));
        assert_eq!(err.reason(), "ServerError");
    }

    #[tokio::test]
    async fn test_ready_handler() {
        let ready = Arc::new(AtomicBool::new(false));
        let (status, _) = ready_handler(State(Arc::clone(&ready))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        ready.store(true, Ordering::SeqCst);
        let (status, body) = ready_handler(State(ready)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
