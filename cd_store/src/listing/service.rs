//! Artifact listing: dispatch, paging, and deployment enrichment.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::sql_types::{BigInt, Nullable, Text, Timestamptz};
use diesel::QueryableByName;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;

use crate::context::RequestContext;
use crate::db;
use crate::error::StoreResult;
use crate::listing::filter::{ArtifactsListFilter, ParentStageType};
use crate::listing::query_builder::{self, ListingSql};
use crate::metrics;
use crate::models::artifact::CiArtifact;
use crate::repository::artifact_repository;

const LISTING_APP: &str = "devtron";

#[derive(QueryableByName)]
struct ArtifactPageRow {
    #[diesel(embed)]
    artifact: CiArtifact,
    #[diesel(sql_type = BigInt)]
    total_count: i64,
}

#[derive(QueryableByName)]
struct ArtifactIdRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = BigInt)]
    total_count: i64,
}

#[derive(QueryableByName)]
struct RunnerArtifactRow {
    #[diesel(embed)]
    artifact: CiArtifact,
    #[diesel(sql_type = Nullable<BigInt>)]
    cd_workflow_runner_id: Option<i64>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    runner_started_on: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<BigInt>)]
    runner_triggered_by: Option<i64>,
    #[diesel(sql_type = BigInt)]
    total_count: i64,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    total_count: i64,
}

#[derive(QueryableByName)]
struct EnrichmentRow {
    #[diesel(sql_type = BigInt)]
    ci_artifact_id: i64,
    #[diesel(sql_type = Timestamptz)]
    deployed_time: DateTime<Utc>,
    #[diesel(sql_type = BigInt)]
    max_id: i64,
    #[diesel(sql_type = Nullable<BigInt>)]
    latest_id: Option<i64>,
}

/// The stage run a rollback candidate comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerRef {
    pub cd_workflow_runner_id: i64,
    pub started_on: Option<DateTime<Utc>>,
    pub triggered_by: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListedArtifact {
    #[serde(flatten)]
    pub artifact: CiArtifact,
    /// Has at least one deployment override on the target pipeline.
    pub deployed: bool,
    pub deployed_time: Option<DateTime<Utc>>,
    /// Owns the greatest-id deployment override of the target pipeline.
    pub latest: bool,
    pub runner: Option<RunnerRef>,
}

impl ListedArtifact {
    fn plain(artifact: CiArtifact) -> Self {
        Self {
            artifact,
            deployed: false,
            deployed_time: None,
            latest: false,
            runner: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactListing {
    pub artifacts: Vec<ListedArtifact>,
    /// Unpaginated match count.
    pub total_count: i64,
}

async fn load_rows<R>(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    operation: &'static str,
    sql: &str,
    pattern: Option<&str>,
) -> StoreResult<Vec<R>>
where
    R: QueryableByName<Pg> + Send + 'static,
{
    let fut = async {
        let rows = match pattern {
            Some(pattern) => {
                diesel::sql_query(sql)
                    .bind::<Text, _>(pattern.to_string())
                    .load::<R>(conn)
                    .await?
            }
            None => diesel::sql_query(sql).load::<R>(conn).await?,
        };
        Ok(rows)
    };
    ctx.run(db::logged(operation, sql, fut)).await
}

/// Total from the window column, or from the count statement when the page
/// is empty only because of paging.
async fn resolve_total(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    filter: &ArtifactsListFilter,
    sql: &ListingSql,
    page_total: Option<i64>,
) -> StoreResult<i64> {
    if let Some(total) = page_total {
        return Ok(total);
    }
    if filter.offset == 0 && filter.limit > 0 {
        return Ok(0);
    }
    let pattern = filter.search_pattern();
    let rows: Vec<CountRow> =
        load_rows(conn, ctx, "artifact_listing_count", &sql.count, Some(&pattern)).await?;
    Ok(rows.get(0).map(|r| r.total_count).unwrap_or(0))
}

/// Set `deployed`, `deployed_time` and `latest` from one batched query.
async fn enrich(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    pipeline_id: i64,
    artifacts: &mut [ListedArtifact],
) -> StoreResult<()> {
    if artifacts.is_empty() {
        return Ok(());
    }
    let mut ids: Vec<i64> = artifacts.iter().map(|a| a.artifact.id).collect();
    ids.sort_unstable();
    ids.dedup();
    let sql = query_builder::deployment_enrichment(pipeline_id, &ids);
    let rows: Vec<EnrichmentRow> =
        load_rows(conn, ctx, "artifact_listing_enrichment", &sql, None).await?;

    let by_artifact: HashMap<i64, &EnrichmentRow> =
        rows.iter().map(|r| (r.ci_artifact_id, r)).collect();
    for listed in artifacts.iter_mut() {
        if let Some(row) = by_artifact.get(&listed.artifact.id) {
            listed.deployed = true;
            listed.deployed_time = Some(row.deployed_time);
            listed.latest = row.latest_id == Some(row.max_id);
        }
    }
    Ok(())
}

async fn finish(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    filter: &ArtifactsListFilter,
    sql: &ListingSql,
    mut artifacts: Vec<ListedArtifact>,
    page_total: Option<i64>,
) -> StoreResult<ArtifactListing> {
    let total_count = resolve_total(conn, ctx, filter, sql, page_total).await?;
    enrich(conn, ctx, filter.pipeline_id, &mut artifacts).await?;
    Ok(ArtifactListing {
        artifacts,
        total_count,
    })
}

async fn list_rows(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    operation: &'static str,
    filter: &ArtifactsListFilter,
    sql: ListingSql,
) -> StoreResult<ArtifactListing> {
    let pattern = filter.search_pattern();
    let rows: Vec<ArtifactPageRow> = load_rows(conn, ctx, operation, &sql.page, Some(&pattern)).await?;
    let page_total = rows.get(0).map(|r| r.total_count);
    let artifacts = rows
        .into_iter()
        .map(|r| ListedArtifact::plain(r.artifact))
        .collect();
    finish(conn, ctx, filter, &sql, artifacts, page_total).await
}

async fn list_runner_rows(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    operation: &'static str,
    filter: &ArtifactsListFilter,
    sql: ListingSql,
) -> StoreResult<ArtifactListing> {
    let pattern = filter.search_pattern();
    let rows: Vec<RunnerArtifactRow> =
        load_rows(conn, ctx, operation, &sql.page, Some(&pattern)).await?;
    let page_total = rows.get(0).map(|r| r.total_count);
    let artifacts = rows
        .into_iter()
        .map(|r| {
            let runner = r.cd_workflow_runner_id.map(|id| RunnerRef {
                cd_workflow_runner_id: id,
                started_on: r.runner_started_on,
                triggered_by: r.runner_triggered_by,
            });
            ListedArtifact {
                runner,
                ..ListedArtifact::plain(r.artifact)
            }
        })
        .collect();
    finish(conn, ctx, filter, &sql, artifacts, page_total).await
}

/// Ids first, then rows in the same order.
async fn list_by_ids(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    filter: &ArtifactsListFilter,
    sql: ListingSql,
) -> StoreResult<ArtifactListing> {
    let pattern = filter.search_pattern();
    let id_rows: Vec<ArtifactIdRow> =
        load_rows(conn, ctx, "artifacts_for_cd_stage", &sql.page, Some(&pattern)).await?;
    let page_total = id_rows.get(0).map(|r| r.total_count);
    let ids: Vec<i64> = id_rows.iter().map(|r| r.id).collect();

    let loaded = ctx
        .run(artifact_repository::find_by_ids(conn, &ids))
        .await?;
    let mut by_id: HashMap<i64, CiArtifact> = loaded.into_iter().map(|a| (a.id, a)).collect();
    let artifacts = ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(ListedArtifact::plain)
        .collect();
    finish(conn, ctx, filter, &sql, artifacts, page_total).await
}

fn record(operation: &str, started: Instant) {
    metrics::app_listing_duration(operation, LISTING_APP, started.elapsed());
}

/// Deployment candidates for the filter's target stage.
///
/// CI and webhook parents list first-stage candidates; CD-stage parents list
/// later-stage candidates.
pub async fn list_artifacts(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    filter: &ArtifactsListFilter,
) -> StoreResult<ArtifactListing> {
    filter.validate()?;
    let started = Instant::now();
    let listing = match filter.parent_stage_type {
        ParentStageType::Ci | ParentStageType::Webhook => {
            let sql = query_builder::parent_type_ci_or_webhook(filter)?;
            list_rows(conn, ctx, "parent_type_ci_or_webhook", filter, sql).await?
        }
        _ if filter.use_cd_stage_query_v2 => {
            let sql = query_builder::artifacts_for_cd_stage_rows(filter)?;
            list_rows(conn, ctx, "artifacts_for_cd_stage_v2", filter, sql).await?
        }
        _ => {
            let sql = query_builder::artifacts_for_cd_stage_ids(filter)?;
            list_by_ids(conn, ctx, filter, sql).await?
        }
    };
    record("artifacts_list", started);
    tracing::debug!(
        pipeline_id = filter.pipeline_id,
        returned = listing.artifacts.len(),
        total = listing.total_count,
        "Artifacts listed"
    );
    Ok(listing)
}

/// Candidates whose pending approval has collected `approvers_count` votes.
pub async fn list_approved_artifacts(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    filter: &ArtifactsListFilter,
) -> StoreResult<ArtifactListing> {
    filter.validate()?;
    let started = Instant::now();
    let sql = query_builder::approved_only_for_filter(filter);
    let listing = list_rows(conn, ctx, "approved_only_for_filter", filter, sql).await?;
    record("approved_artifacts_list", started);
    Ok(listing)
}

/// Earlier runs of the target stage, newest runner first.
pub async fn list_rollback(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    filter: &ArtifactsListFilter,
) -> StoreResult<ArtifactListing> {
    filter.validate()?;
    let started = Instant::now();
    let sql = query_builder::artifacts_for_rollback(filter);
    let listing = list_runner_rows(conn, ctx, "artifacts_for_rollback", filter, sql).await?;
    record("rollback_list", started);
    Ok(listing)
}

/// Approved and already-deployed artifacts, with their latest DEPLOY run.
pub async fn list_approved_rollback(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    filter: &ArtifactsListFilter,
) -> StoreResult<ArtifactListing> {
    filter.validate()?;
    let started = Instant::now();
    let sql = query_builder::approved_artifacts_for_rollback(filter);
    let listing =
        list_runner_rows(conn, ctx, "approved_artifacts_for_rollback", filter, sql).await?;
    record("approved_rollback_list", started);
    Ok(listing)
}
