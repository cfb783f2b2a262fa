//! Deployment override ledger: one row per trigger, with a per-pipeline
//! release counter that is gap-free and strictly increasing.
//!
//! Counter assignment takes a transaction-scoped advisory lock keyed on the
//! pipeline, so writers for one pipeline serialize while other pipelines
//! proceed in parallel.

use diesel::dsl::{exists, max};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::error::{StoreError, StoreResult};
use crate::models::artifact::CiArtifact;
use crate::models::pipeline::Pipeline;
use crate::models::pipeline_override::{
    GitCommit, NewPipelineOverride, PipelineOverride, PipelineOverrideWithPipeline,
};
use crate::models::status::ReleaseStatus;
use crate::models::workflow::{WorkflowType, HEALTHY_RUNNER_STATUSES};
use crate::schema::{
    cd_workflow, cd_workflow_runner, ci_artifact, pipeline, pipeline_config_override,
};

/// First key of the two-key advisory lock; the second is the hashed pipeline id.
const RELEASE_COUNTER_LOCK_NAMESPACE: i32 = 0x5043_4f00;

/// Serialize release-counter writers for one pipeline until the enclosing
/// transaction ends. Must run inside a transaction.
pub(crate) async fn lock_pipeline_releases(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
) -> StoreResult<()> {
    diesel::sql_query("SELECT pg_advisory_xact_lock($1, hashint8($2))")
        .bind::<Integer, _>(RELEASE_COUNTER_LOCK_NAMESPACE)
        .bind::<BigInt, _>(pipeline_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Greatest assigned counter for the pipeline, 0 when none.
pub async fn current_release_counter(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
) -> StoreResult<i32> {
    let current: Option<i32> = pipeline_config_override::table
        .filter(pipeline_config_override::pipeline_id.eq(pipeline_id))
        .select(max(pipeline_config_override::pipeline_release_counter))
        .first(conn)
        .await?;
    Ok(current.unwrap_or(0))
}

/// Lock the pipeline and compute its next counter. Must run inside a transaction.
pub(crate) async fn reserve_release_counter(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
) -> StoreResult<i32> {
    lock_pipeline_releases(conn, pipeline_id).await?;
    let next = current_release_counter(conn, pipeline_id).await? + 1;
    Ok(next)
}

pub(crate) async fn insert_with_counter(
    conn: &mut AsyncPgConnection,
    new: NewPipelineOverride,
    release_counter: i32,
) -> StoreResult<PipelineOverride> {
    let row = new.into_row(release_counter);
    let saved = diesel::insert_into(pipeline_config_override::table)
        .values(&row)
        .returning(PipelineOverride::as_returning())
        .get_result(conn)
        .await?;
    Ok(saved)
}

/// Record a trigger with the next release counter of its pipeline.
///
/// Opens a transaction, or a savepoint when the caller already holds one;
/// the advisory lock then lives until the caller's transaction ends.
pub async fn create(
    conn: &mut AsyncPgConnection,
    new: NewPipelineOverride,
) -> StoreResult<PipelineOverride> {
    let saved = conn
        .transaction::<_, StoreError, _>(|conn| {
            async move {
                let counter = reserve_release_counter(conn, new.pipeline_id).await?;
                insert_with_counter(conn, new, counter).await
            }
            .scope_boxed()
        })
        .await?;

    tracing::info!(
        override_id = saved.id,
        pipeline_id = saved.pipeline_id,
        release_counter = saved.pipeline_release_counter,
        artifact_id = saved.ci_artifact_id,
        "Pipeline override recorded"
    );
    Ok(saved)
}

/// Move a row through the status machine.
///
/// Git commit data may only accompany the move to IN_PROGRESS. A row whose
/// status changed underneath the caller is a Conflict.
pub async fn transition_status(
    conn: &mut AsyncPgConnection,
    id: i64,
    next: ReleaseStatus,
    git_commit: Option<GitCommit>,
    actor: i64,
) -> StoreResult<PipelineOverride> {
    let current = find_by_id(conn, id).await?;
    let from = current.release_status()?;
    if !from.can_transition_to(next) {
        return Err(StoreError::invalid(format!(
            "pipeline override {id} cannot move from {} to {}",
            from.as_str(),
            next.as_str()
        )));
    }
    if git_commit.is_some() && next != ReleaseStatus::InProgress {
        return Err(StoreError::invalid(
            "git commit can only be recorded when a deployment starts",
        ));
    }

    let (git_hash, commit_time) = match git_commit {
        Some(commit) => (Some(commit.git_hash), Some(commit.commit_time)),
        None => (current.git_hash.clone(), current.commit_time),
    };

    let updated = diesel::update(
        pipeline_config_override::table
            .find(id)
            .filter(pipeline_config_override::status.eq(from.as_str())),
    )
    .set((
        pipeline_config_override::status.eq(next.as_str()),
        pipeline_config_override::git_hash.eq(git_hash),
        pipeline_config_override::commit_time.eq(commit_time),
        pipeline_config_override::updated_on.eq(chrono::Utc::now()),
        pipeline_config_override::updated_by.eq(actor),
    ))
    .returning(PipelineOverride::as_returning())
    .get_result(conn)
    .await
    .optional()?;

    let updated = updated.ok_or_else(|| {
        StoreError::Conflict(format!(
            "pipeline override {id} left {} concurrently",
            from.as_str()
        ))
    })?;
    tracing::info!(
        override_id = id,
        from = from.as_str(),
        to = next.as_str(),
        "Pipeline override status changed"
    );
    Ok(updated)
}

pub async fn find_by_id(conn: &mut AsyncPgConnection, id: i64) -> StoreResult<PipelineOverride> {
    pipeline_config_override::table
        .find(id)
        .select(PipelineOverride::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("pipeline override {id}")))
}

pub async fn find_with_pipeline(
    conn: &mut AsyncPgConnection,
    id: i64,
) -> StoreResult<PipelineOverrideWithPipeline> {
    let (pipeline_override, pipeline) = pipeline_config_override::table
        .inner_join(pipeline::table)
        .filter(pipeline_config_override::id.eq(id))
        .select((PipelineOverride::as_select(), Pipeline::as_select()))
        .first::<(PipelineOverride, Pipeline)>(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("pipeline override {id}")))?;
    Ok(PipelineOverrideWithPipeline {
        pipeline_override,
        pipeline,
    })
}

pub async fn find_by_request_identifier(
    conn: &mut AsyncPgConnection,
    request_identifier: &str,
) -> StoreResult<Option<PipelineOverride>> {
    let found = pipeline_config_override::table
        .filter(pipeline_config_override::request_identifier.eq(request_identifier))
        .select(PipelineOverride::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// Greatest-id row for a pipeline.
pub async fn latest_for_pipeline(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
) -> StoreResult<Option<PipelineOverride>> {
    let found = pipeline_config_override::table
        .filter(pipeline_config_override::pipeline_id.eq(pipeline_id))
        .order(pipeline_config_override::id.desc())
        .select(PipelineOverride::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// Greatest-id row per pipeline, in one statement.
pub async fn latest_for_pipeline_group(
    conn: &mut AsyncPgConnection,
    pipeline_ids: &[i64],
) -> StoreResult<Vec<PipelineOverride>> {
    if pipeline_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = pipeline_config_override::table
        .filter(pipeline_config_override::pipeline_id.eq_any(pipeline_ids))
        .distinct_on(pipeline_config_override::pipeline_id)
        .order((
            pipeline_config_override::pipeline_id,
            pipeline_config_override::id.desc(),
        ))
        .select(PipelineOverride::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

/// The row that defines what is currently deployed: greatest id among
/// SUCCESS and IN_PROGRESS.
pub async fn current_deployed(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
) -> StoreResult<Option<PipelineOverride>> {
    let live = [
        ReleaseStatus::Success.as_str(),
        ReleaseStatus::InProgress.as_str(),
    ];
    let found = pipeline_config_override::table
        .filter(pipeline_config_override::pipeline_id.eq(pipeline_id))
        .filter(pipeline_config_override::status.eq_any(live))
        .order(pipeline_config_override::id.desc())
        .select(PipelineOverride::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// Artifact of the most recently created override on a pipeline.
pub async fn latest_deployed_artifact(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
) -> StoreResult<Option<CiArtifact>> {
    let found = pipeline_config_override::table
        .inner_join(ci_artifact::table)
        .filter(pipeline_config_override::pipeline_id.eq(pipeline_id))
        .order((
            pipeline_config_override::created_on.desc(),
            pipeline_config_override::id.desc(),
        ))
        .select(CiArtifact::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// Most recent override in (app, env) whose artifact image is one of `images`.
pub async fn deployed_image_on(
    conn: &mut AsyncPgConnection,
    app_id: i64,
    env_id: i64,
    images: &[String],
) -> StoreResult<Option<PipelineOverrideWithPipeline>> {
    if images.is_empty() {
        return Ok(None);
    }
    let found = pipeline_config_override::table
        .inner_join(pipeline::table)
        .inner_join(ci_artifact::table)
        .filter(pipeline::app_id.eq(app_id))
        .filter(pipeline::environment_id.eq(env_id))
        .filter(pipeline::deleted.eq(false))
        .filter(ci_artifact::image.eq_any(images))
        .order(pipeline_config_override::id.desc())
        .select((PipelineOverride::as_select(), Pipeline::as_select()))
        .first::<(PipelineOverride, Pipeline)>(conn)
        .await
        .optional()?;
    Ok(found.map(|(pipeline_override, pipeline)| PipelineOverrideWithPipeline {
        pipeline_override,
        pipeline,
    }))
}

/// Whether a healthy DEPLOY runner exists for the artifact on the pipeline.
pub async fn healthy_deploy_exists(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
    artifact_id: i64,
) -> StoreResult<bool> {
    let found = diesel::select(exists(
        cd_workflow_runner::table
            .inner_join(cd_workflow::table)
            .filter(cd_workflow::pipeline_id.eq(pipeline_id))
            .filter(cd_workflow::ci_artifact_id.eq(artifact_id))
            .filter(cd_workflow_runner::workflow_type.eq(WorkflowType::Deploy.as_str()))
            .filter(cd_workflow_runner::status.eq_any(HEALTHY_RUNNER_STATUSES)),
    ))
    .get_result::<bool>(conn)
    .await?;
    Ok(found)
}

/// Greatest-id row citing an env override, even if that override has since
/// been superseded.
pub async fn latest_for_env_config_override(
    conn: &mut AsyncPgConnection,
    env_config_override_id: i64,
) -> StoreResult<Option<PipelineOverride>> {
    let found = pipeline_config_override::table
        .filter(pipeline_config_override::env_config_override_id.eq(env_config_override_id))
        .order(pipeline_config_override::id.desc())
        .select(PipelineOverride::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// Every override of a pipeline, newest release first.
pub async fn find_all_for_pipeline(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
) -> StoreResult<Vec<PipelineOverride>> {
    let rows = pipeline_config_override::table
        .filter(pipeline_config_override::pipeline_id.eq(pipeline_id))
        .order(pipeline_config_override::pipeline_release_counter.desc())
        .select(PipelineOverride::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}
