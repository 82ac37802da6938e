//! CLI command definitions and handlers

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use mongodb_operator::{MongoDBMultiCluster, OperatorBuilder};
use mongodb_scalers::{
    member_cluster_list, ClusterMapping, ClusterSpecList, MemberCluster, ScalingComponent, ScalingPlan, Topology,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Main CLI structure
#[derive(Parser)]
#[command(name = "mongodb-operator")]
#[command(about = "Scales MongoDB replica sets across Kubernetes member clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the operator
    Run {
        /// Namespace to watch, all namespaces when omitted
        #[arg(short, long, env = "WATCH_NAMESPACE")]
        namespace: Option<String>,

        /// Kubeconfig with one context per member cluster
        #[arg(long, env = "MEMBER_KUBECONFIG")]
        member_kubeconfig: Option<PathBuf>,

        /// Member cluster names, as contexts of the member kubeconfig
        #[arg(long, env = "MEMBER_CLUSTERS", value_delimiter = ',')]
        member_clusters: Vec<String>,

        /// Requeue interval while scaling is in progress
        #[arg(long, default_value = "10")]
        pending_requeue_secs: u64,

        /// Requeue interval once the resource is running
        #[arg(long, default_value = "300")]
        running_requeue_secs: u64,

        /// Port for /health and /ready
        #[arg(long, default_value = "8080")]
        health_port: u16,

        /// Port for /metrics
        #[arg(long, default_value = "9090")]
        metrics_port: u16,

        /// Disable the metrics endpoint
        #[arg(long)]
        no_monitoring: bool,

        /// Do not install the CRD on startup
        #[arg(long)]
        skip_crd_install: bool,
    },

    /// Compute the replica counts of the next reconciliation pass without a cluster
    Plan {
        /// Plan input as JSON file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Plan input as JSON string
        #[arg(short, long)]
        json: Option<String>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the MongoDBMultiCluster CRD as YAML
    Crd,
}

/// Output format options
#[derive(Clone, Debug, PartialEq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    JsonPretty,
}

/// Command execution result
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Input of the `plan` command: the declared topology and the persisted scaling state
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInput {
    /// Component the plan is for, a replica set by default
    #[serde(default)]
    pub component: ScalingComponent,

    /// Multi-cluster topology when present
    pub cluster_spec_list: Option<ClusterSpecList>,

    #[serde(default)]
    pub cluster_mapping: ClusterMapping,

    #[serde(default)]
    pub last_applied_member_spec: BTreeMap<String, u32>,

    /// Single-cluster declared member count
    #[serde(default)]
    pub members: u32,

    /// Single-cluster member count last recorded
    #[serde(default)]
    pub observed_members: u32,
}

impl PlanInput {
    /// Build the plan the operator would execute for this input
    pub fn plan(&self) -> ScalingPlan {
        match &self.cluster_spec_list {
            Some(cluster_spec_list) => {
                let mut mapping = self.cluster_mapping.clone();
                mapping.assign_indexes(&cluster_spec_list.cluster_names());
                let members = member_cluster_list(
                    cluster_spec_list,
                    &mapping,
                    |name| self.last_applied_member_spec.get(name).copied().unwrap_or(0),
                    |_| true,
                );
                let topology = Topology::MultiCluster(cluster_spec_list.clone());
                ScalingPlan::build(self.component, &topology, &members)
            }
            None => {
                let topology = Topology::SingleCluster {
                    members: self.members,
                    observed_members: self.observed_members,
                };
                let members = vec![MemberCluster::legacy_central(self.observed_members)];
                ScalingPlan::build(self.component, &topology, &members)
            }
        }
    }
}

/// Execute CLI commands
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute a CLI command
    pub async fn execute(&mut self, command: Commands) -> Result<CommandResult> {
        match command {
            Commands::Run {
                namespace,
                member_kubeconfig,
                member_clusters,
                pending_requeue_secs,
                running_requeue_secs,
                health_port,
                metrics_port,
                no_monitoring,
                skip_crd_install,
            } => {
                let builder = OperatorBuilder::new()
                    .namespace(namespace)
                    .member_kubeconfig(member_kubeconfig)
                    .member_clusters(member_clusters)
                    .pending_requeue(Duration::from_secs(pending_requeue_secs))
                    .running_requeue(Duration::from_secs(running_requeue_secs))
                    .health_port(health_port)
                    .metrics_port(metrics_port)
                    .enable_monitoring(!no_monitoring)
                    .install_crd(!skip_crd_install);
                self.execute_run(builder).await
            }
            Commands::Plan { file, json, format } => self.execute_plan(file, json, format),
            Commands::Crd => self.execute_crd(),
        }
    }

    async fn execute_run(&self, builder: OperatorBuilder) -> Result<CommandResult> {
        let manager = builder.build().await.context("Failed to start operator")?;
        manager.run().await?;

        Ok(CommandResult {
            success: true,
            message: "Operator stopped".to_string(),
            data: None,
        })
    }

    fn execute_plan(&self, file: Option<PathBuf>, json: Option<String>, format: OutputFormat) -> Result<CommandResult> {
        let raw = if let Some(file_path) = file {
            std::fs::read_to_string(&file_path)
                .with_context(|| format!("Failed to read {}", file_path.display()))?
        } else if let Some(json_str) = json {
            json_str
        } else {
            return Err(anyhow!("Either --file or --json must be specified"));
        };

        let input: PlanInput = serde_json::from_str(&raw).context("Invalid plan input")?;
        if let Some(name) = input.cluster_spec_list.as_ref().and_then(|l| l.duplicate_cluster_name()) {
            return Err(anyhow!("cluster {} appears more than once in clusterSpecList", name));
        }

        let plan = input.plan();
        debug!(
            clusters = plan.entries.len(),
            first_time = plan.scaling_first_time,
            "Computed scaling plan"
        );
        let data = serde_json::to_value(&plan)?;
        let message = match format {
            OutputFormat::Text => render_plan(&plan),
            OutputFormat::Json => serde_json::to_string(&plan)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(&plan)?,
        };

        Ok(CommandResult {
            success: true,
            message,
            data: Some(data),
        })
    }

    fn execute_crd(&self) -> Result<CommandResult> {
        let yaml = serde_yaml::to_string(&MongoDBMultiCluster::crd())?;
        Ok(CommandResult {
            success: true,
            message: yaml,
            data: None,
        })
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// One line per member cluster plus a summary
pub fn render_plan(plan: &ScalingPlan) -> String {
    let mut lines = vec![format!("component: {}", plan.component), format!(
        "{:<20} {:>5} {:>7} {:>7} {:>6} {:>9}",
        "CLUSTER", "INDEX", "CURRENT", "DESIRED", "TARGET", "THIS PASS"
    )];
    for entry in &plan.entries {
        let mut line = format!(
            "{:<20} {:>5} {:>7} {:>7} {:>6} {:>9}",
            entry.cluster_name,
            entry.index,
            entry.current,
            entry.desired,
            entry.target,
            entry.replicas_this_reconciliation
        );
        if !entry.active {
            line.push_str("  (removed)");
        }
        lines.push(line);
    }

    let state = if plan.is_converged() {
        "converged"
    } else {
        "scaling"
    };
    lines.push(format!(
        "first time: {}, state: {}, total replicas this pass: {}",
        plan.scaling_first_time,
        state,
        plan.total_replicas_this_reconciliation()
    ));
    lines.join("\n")
}
