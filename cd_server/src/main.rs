//! Orchestrator store binary.
//!
//! Wires the persistence layer into a process: schema migration, Prometheus
//! export, terminal session reconciliation and a few read/write commands for
//! operating the store by hand.

mod cli;
mod kubectl;

use std::sync::Arc;
use std::time::Duration;

use cd_store::config::{StoreConfig, TerminalConfig};
use cd_store::db::{self, DbPool};
use cd_store::listing::filter::{ArtifactsListFilter, ParentStageType, SortBy};
use cd_store::listing::oracle::{self, AvailabilityQuery};
use cd_store::listing::service;
use cd_store::models::artifact::DataSource;
use cd_store::models::status::DeploymentType;
use cd_store::models::workflow::WorkflowType;
use cd_store::repository::artifact_repository;
use cd_store::services::deployment_service::{self, TriggerRequest};
use cd_store::services::material;
use cd_store::terminal::service::TerminalSessionManager;
use cd_store::{migration, RequestContext};
use clap::Parser;
use diesel_async::pooled_connection::deadpool::Object;
use diesel_async::AsyncPgConnection;

use crate::cli::{AvailabilityArgs, Cli, Command, ListArgs, ListMode, ServeArgs, TriggerArgs};
use crate::kubectl::KubectlPodStatus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    let mut config = StoreConfig::from_env();
    if cli.database_url.is_some() {
        config.database_url = cli.database_url.clone();
    }
    let pool = db::build_pool(&config, cli.pool_size)?;
    let ctx = if cli.timeout_secs == 0 {
        RequestContext::background()
    } else {
        RequestContext::background().with_timeout(Duration::from_secs(cli.timeout_secs))
    };

    match cli.command {
        Command::Migrate => {
            let mut conn = connection(&pool).await?;
            tracing::info!("Running database migrations...");
            migration::run_migration(&mut conn).await?;
            tracing::info!("Database migrations completed.");
        }
        Command::Serve(args) => serve(pool, args).await?,
        Command::ListArtifacts(args) => list_artifacts(&pool, &ctx, args).await?,
        Command::CheckAvailability(args) => check_availability(&pool, &ctx, args).await?,
        Command::ShowArtifact { id } => show_artifact(&pool, &ctx, id).await?,
        Command::Trigger(args) => trigger(&pool, &ctx, args).await?,
    }

    Ok(())
}

async fn connection(pool: &DbPool) -> anyhow::Result<Object<AsyncPgConnection>> {
    pool.get()
        .await
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn plugin_stage(raw: Option<&str>) -> anyhow::Result<Option<DataSource>> {
    Ok(raw.map(DataSource::parse).transpose()?)
}

async fn serve(pool: DbPool, args: ServeArgs) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(args.metrics_addr)
        .install()
        .map_err(|e| anyhow::anyhow!("prometheus exporter: {e}"))?;
    tracing::info!(addr = %args.metrics_addr, "Metrics exporter listening");

    let provider = Arc::new(KubectlPodStatus::new(args.kubectl, args.kube_context_prefix));
    let terminal = Arc::new(TerminalSessionManager::new(
        TerminalConfig::from_env(),
        pool,
        provider,
    ));
    if let Err(e) = terminal.sync_running_instances().await {
        tracing::error!("Loading running terminal sessions failed: {e}");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sync = tokio::spawn(terminal.clone().run_status_sync(shutdown_rx));

    shutdown_signal().await;
    // The sync task may have exited already.
    let _ = shutdown_tx.send(true);
    if let Err(e) = sync.await {
        tracing::error!("Terminal status sync task failed: {e}");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn list_artifacts(pool: &DbPool, ctx: &RequestContext, args: ListArgs) -> anyhow::Result<()> {
    let parent_stage = ParentStageType::parse(&args.parent_stage)?;
    let stage = WorkflowType::parse(&args.stage)?;
    let mut filter = ArtifactsListFilter::new(args.pipeline_id, args.parent_id, parent_stage, stage);
    filter.plugin_stage = plugin_stage(args.plugin_stage.as_deref())?;
    filter.search_string = args.search;
    filter.exclude_artifact_ids = args.exclude_artifact;
    filter.exclude_wfr_ids = args.exclude_runner;
    filter.limit = args.limit;
    filter.offset = args.offset;
    filter.approvers_count = args.approvers;
    filter.use_cd_stage_query_v2 = args.v2;
    if args.oldest {
        filter.sort_by = SortBy::Oldest;
    }

    let mut conn = connection(pool).await?;
    let listing = match args.mode {
        ListMode::Candidates => service::list_artifacts(&mut conn, ctx, &filter).await,
        ListMode::Approved => service::list_approved_artifacts(&mut conn, ctx, &filter).await,
        ListMode::Rollback => service::list_rollback(&mut conn, ctx, &filter).await,
        ListMode::ApprovedRollback => service::list_approved_rollback(&mut conn, ctx, &filter).await,
    }?;
    print_json(&listing)
}

async fn check_availability(
    pool: &DbPool,
    ctx: &RequestContext,
    args: AvailabilityArgs,
) -> anyhow::Result<()> {
    let query = AvailabilityQuery {
        pipeline_id: args.pipeline_id,
        parent_pipeline_id: args.parent_id,
        artifact_id: args.artifact_id,
        parent_stage: ParentStageType::parse(&args.parent_stage)?,
        plugin_stage: plugin_stage(args.plugin_stage.as_deref())?,
        deploy_stage: WorkflowType::parse(&args.stage)?,
    };
    let mut conn = connection(pool).await?;
    let available = ctx
        .run(oracle::is_artifact_available_for_deployment(&mut conn, &query))
        .await?;
    print_json(&serde_json::json!({ "query": query, "available": available }))
}

async fn show_artifact(pool: &DbPool, ctx: &RequestContext, id: i64) -> anyhow::Result<()> {
    let mut conn = connection(pool).await?;
    let artifact = ctx.run(artifact_repository::get(&mut conn, id)).await?;
    let source = DataSource::parse(&artifact.data_source)?;
    let revisions = if source.is_plugin() {
        Vec::new()
    } else {
        material::parse_material_info(artifact.material_info.as_deref(), source)?
    };
    print_json(&serde_json::json!({ "artifact": artifact, "revisions": revisions }))
}

async fn trigger(pool: &DbPool, ctx: &RequestContext, args: TriggerArgs) -> anyhow::Result<()> {
    let request = TriggerRequest {
        pipeline_id: args.pipeline_id,
        ci_artifact_id: args.artifact_id,
        deployment_type: DeploymentType::parse(&args.deployment_type)?,
        request_identifier: None,
        cd_workflow_id: args.cd_workflow_id,
        additional_override: args.additional_override,
        app_metrics: args.app_metrics,
        availability: None,
        triggered_by: args.user_id,
    };
    let saved = deployment_service::trigger_deployment(pool, ctx, request).await?;
    print_json(&saved)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
