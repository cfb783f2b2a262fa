use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "orchestrator-store",
    about = "CD persistence layer: migrations, artifact queries and terminal status sync"
)]
pub struct Cli {
    /// PostgreSQL connection URL; overrides the PG_* variables
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Connection pool size
    #[arg(long, env = "PG_POOL_SIZE", default_value_t = 16, global = true)]
    pub pool_size: usize,

    /// Per-command deadline in seconds, 0 for none
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or upgrade the schema
    Migrate,
    /// Serve Prometheus metrics and reconcile terminal sessions until stopped
    Serve(ServeArgs),
    /// List deployment candidates for a CD pipeline
    ListArtifacts(ListArgs),
    /// Ask whether an artifact may be deployed at a stage
    CheckAvailability(AvailabilityArgs),
    /// Show one artifact with its source revisions
    ShowArtifact {
        #[arg(long)]
        id: i64,
    },
    /// Record a deployment override with the next release counter
    Trigger(TriggerArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Prometheus listener
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9464")]
    pub metrics_addr: SocketAddr,

    #[arg(long, env = "KUBECTL", default_value = "kubectl")]
    pub kubectl: String,

    /// Kube context prefix; cluster N maps to context <prefix>N
    #[arg(long, env = "KUBE_CONTEXT_PREFIX")]
    pub kube_context_prefix: Option<String>,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
pub enum ListMode {
    #[default]
    Candidates,
    Approved,
    Rollback,
    ApprovedRollback,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long)]
    pub pipeline_id: i64,
    #[arg(long)]
    pub parent_id: i64,
    /// CI, WEBHOOK, PRE, DEPLOY or POST
    #[arg(long, default_value = "CI")]
    pub parent_stage: String,
    /// PRE, DEPLOY or POST
    #[arg(long, default_value = "DEPLOY")]
    pub stage: String,
    /// Plugin data source admitted at CD stages (post_ci, pre_cd, post_cd)
    #[arg(long)]
    pub plugin_stage: Option<String>,
    #[arg(long, value_enum, default_value_t = ListMode::Candidates)]
    pub mode: ListMode,
    #[arg(long, default_value = "")]
    pub search: String,
    #[arg(long, value_delimiter = ',')]
    pub exclude_artifact: Vec<i64>,
    #[arg(long, value_delimiter = ',')]
    pub exclude_runner: Vec<i64>,
    #[arg(long, default_value_t = 10)]
    pub limit: i64,
    #[arg(long, default_value_t = 0)]
    pub offset: i64,
    #[arg(long, default_value_t = 0)]
    pub approvers: i64,
    /// Oldest first
    #[arg(long)]
    pub oldest: bool,
    /// Use the row-returning CD stage query
    #[arg(long)]
    pub v2: bool,
}

#[derive(Args)]
pub struct AvailabilityArgs {
    #[arg(long)]
    pub pipeline_id: i64,
    #[arg(long)]
    pub parent_id: i64,
    #[arg(long)]
    pub artifact_id: i64,
    #[arg(long, default_value = "CI")]
    pub parent_stage: String,
    #[arg(long, default_value = "DEPLOY")]
    pub stage: String,
    #[arg(long)]
    pub plugin_stage: Option<String>,
}

#[derive(Args)]
pub struct TriggerArgs {
    #[arg(long)]
    pub pipeline_id: i64,
    #[arg(long)]
    pub artifact_id: i64,
    /// DEPLOY, ROLLBACK or another deployment type
    #[arg(long, default_value = "DEPLOY")]
    pub deployment_type: String,
    #[arg(long)]
    pub cd_workflow_id: Option<i64>,
    /// Values document merged last
    #[arg(long)]
    pub additional_override: Option<String>,
    #[arg(long)]
    pub app_metrics: bool,
    #[arg(long, default_value_t = 1)]
    pub user_id: i64,
}
