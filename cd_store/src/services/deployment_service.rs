//! Deployment triggers: merged values, release counter and override row in
//! one transaction.

use std::future::Future;
use std::time::Duration;

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use rand::Rng;
use serde::Deserialize;

use crate::context::RequestContext;
use crate::db::{self, DbPool};
use crate::error::{StoreError, StoreResult};
use crate::listing::filter::ParentStageType;
use crate::listing::oracle::{self, AvailabilityQuery};
use crate::metrics;
use crate::models::artifact::DataSource;
use crate::models::pipeline::Pipeline;
use crate::models::pipeline_override::{NewPipelineOverride, PipelineOverride};
use crate::models::status::DeploymentType;
use crate::models::workflow::WorkflowType;
use crate::repository::{
    artifact_repository, chart_repository, pipeline_override_repository, strategy_repository,
};
use crate::schema::{app, environment, pipeline};
use crate::services::merge::{self, MergeInputs, ReleaseContext};

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 20;

/// Where the artifact must come from for the trigger to be admitted.
#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityCheck {
    pub parent_pipeline_id: i64,
    pub parent_stage: ParentStageType,
    pub plugin_stage: Option<DataSource>,
    pub deploy_stage: WorkflowType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRequest {
    pub pipeline_id: i64,
    pub ci_artifact_id: i64,
    pub deployment_type: DeploymentType,
    /// Generated when absent.
    pub request_identifier: Option<String>,
    pub cd_workflow_id: Option<i64>,
    /// Merge-patched over the rendered release override.
    pub additional_override: Option<String>,
    #[serde(default)]
    pub app_metrics: bool,
    pub availability: Option<AvailabilityCheck>,
    pub triggered_by: i64,
}

fn backoff(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS << attempt.min(6);
    let jitter = rand::thread_rng().gen_range(0..=base);
    Duration::from_millis(base + jitter)
}

/// Re-run `op` while it fails transiently, up to [`MAX_ATTEMPTS`] times.
async fn retry_transient<T, F, Fut>(operation: &'static str, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                metrics::release_counter_retry();
                let wait = backoff(attempt);
                tracing::warn!(operation, attempt, wait_ms = wait.as_millis() as u64, "Retrying after transient failure: {e}");
                tokio::time::sleep(wait).await;
            }
            other => return other,
        }
    }
}

/// Record an override with the next release counter, retrying transient failures.
pub async fn create_override(
    pool: &DbPool,
    new: NewPipelineOverride,
) -> StoreResult<PipelineOverride> {
    let saved = retry_transient("create_override", || {
        let pool = pool.clone();
        let new = new.clone();
        async move {
            let mut conn = pool.get().await?;
            pipeline_override_repository::create(&mut conn, new).await
        }
    })
    .await?;
    metrics::release_counter_assigned(&saved.deployment_type);
    Ok(saved)
}

async fn load_pipeline(conn: &mut AsyncPgConnection, pipeline_id: i64) -> StoreResult<Pipeline> {
    pipeline::table
        .find(pipeline_id)
        .filter(pipeline::deleted.eq(false))
        .select(Pipeline::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("pipeline {pipeline_id}")))
}

async fn trigger_in_tx(
    conn: &mut AsyncPgConnection,
    request: &TriggerRequest,
) -> StoreResult<PipelineOverride> {
    let artifact = artifact_repository::get(conn, request.ci_artifact_id).await?;
    let pipeline = load_pipeline(conn, request.pipeline_id).await?;
    let app_name: String = app::table
        .find(pipeline.app_id)
        .select(app::app_name)
        .first(conn)
        .await?;
    let env_name: String = environment::table
        .find(pipeline.environment_id)
        .select(environment::environment_name)
        .first(conn)
        .await?;
    let active =
        chart_repository::find_active_env_override(conn, pipeline.app_id, pipeline.environment_id)
            .await?;
    let strategy = strategy_repository::find_default_strategy(conn, pipeline.id).await?;

    if let Some(check) = &request.availability {
        let query = AvailabilityQuery {
            pipeline_id: pipeline.id,
            parent_pipeline_id: check.parent_pipeline_id,
            artifact_id: artifact.id,
            parent_stage: check.parent_stage,
            plugin_stage: check.plugin_stage,
            deploy_stage: check.deploy_stage,
        };
        if !oracle::is_artifact_available_for_deployment(conn, &query).await? {
            return Err(StoreError::invalid(format!(
                "artifact {} is not available for deployment on pipeline {}",
                artifact.id, pipeline.id
            )));
        }
    }

    let counter = pipeline_override_repository::reserve_release_counter(conn, pipeline.id).await?;
    let release = ReleaseContext {
        image: artifact.image.clone(),
        pipeline_name: pipeline.name.clone(),
        release_version: counter,
        deployment_type: request.deployment_type,
        app_name,
        env_name,
        app_metrics: request.app_metrics,
    };
    let release_override =
        merge::render_release_override(&active.chart.image_descriptor_template, &release)?;
    let merged = merge::merge_chain(&MergeInputs {
        global_override: &active.chart.global_override,
        env_override: active
            .env_override
            .is_override
            .then_some(active.env_override.env_override_yaml.as_str()),
        strategy_config: strategy.as_ref().map(|s| s.config.as_str()),
        release_override: release_override.clone(),
        additional_override: request.additional_override.as_deref(),
    })?;

    let new = NewPipelineOverride {
        request_identifier: request
            .request_identifier
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        env_config_override_id: active.env_override.id,
        pipeline_override_yaml: release_override.to_string(),
        merged_values_yaml: merged.to_string(),
        pipeline_id: pipeline.id,
        ci_artifact_id: artifact.id,
        cd_workflow_id: request.cd_workflow_id,
        deployment_type: request.deployment_type,
        created_by: request.triggered_by,
    };
    pipeline_override_repository::insert_with_counter(conn, new, counter).await
}

/// Trigger a deployment: resolve configuration, optionally consult the
/// availability oracle, then record the override under the next release
/// counter. Everything commits or nothing does.
pub async fn trigger_deployment(
    pool: &DbPool,
    ctx: &RequestContext,
    request: TriggerRequest,
) -> StoreResult<PipelineOverride> {
    // A generated identifier must survive retries.
    let request = TriggerRequest {
        request_identifier: Some(
            request
                .request_identifier
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        ),
        ..request
    };

    let saved = retry_transient("trigger_deployment", || {
        let pool = pool.clone();
        let ctx = ctx.clone();
        let request = request.clone();
        async move {
            let mut conn = ctx.run(async { Ok(pool.get().await?) }).await?;
            let result = ctx
                .run(conn.transaction::<_, StoreError, _>(|conn| {
                    async move { trigger_in_tx(conn, &request).await }.scope_boxed()
                }))
                .await;
            // The transaction may still be open server-side and holding the
            // pipeline lock.
            if matches!(result, Err(StoreError::Cancelled)) {
                db::discard(conn);
            }
            result
        }
    })
    .await?;

    metrics::release_counter_assigned(&saved.deployment_type);
    tracing::info!(
        override_id = saved.id,
        pipeline_id = saved.pipeline_id,
        artifact_id = saved.ci_artifact_id,
        release_counter = saved.pipeline_release_counter,
        deployment_type = %saved.deployment_type,
        "Deployment triggered"
    );
    Ok(saved)
}
