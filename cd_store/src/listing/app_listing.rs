//! App/environment overview listing.
//!
//! `$1` is the app-name LIKE pattern and `$2` the app-status filter array in
//! every statement that takes a filter.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use diesel::sql_types::{Array, BigInt, Bool, Int4, Nullable, Text, Timestamptz, Varchar};
use diesel::QueryableByName;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::db::{self, id_list};
use crate::error::StoreResult;
use crate::metrics;
use crate::models::artifact::DataSource;
use crate::services::material::{parse_material_info, SourceRevision};

const LISTING_APP: &str = "devtron";
/// `app.app_type` of CI/CD apps.
const CUSTOM_APP: i32 = 0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppSortBy {
    #[default]
    AppName,
    LastDeployed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppListingFilter {
    pub environments: Vec<i64>,
    pub teams: Vec<i64>,
    pub app_statuses: Vec<String>,
    pub app_name_search: String,
    pub sort_by: AppSortBy,
    pub sort_order: SortOrder,
    pub offset: i64,
    pub size: i64,
    /// Restricts the listing to a page of app ids.
    pub app_ids: Vec<i64>,
}

impl AppListingFilter {
    fn name_pattern(&self) -> String {
        if self.app_name_search.is_empty() {
            "%".to_string()
        } else {
            format!("%{}%", self.app_name_search)
        }
    }
}

fn where_condition(filter: &AppListingFilter) -> String {
    let mut clause = format!(
        "WHERE a.active = true AND a.app_type = {CUSTOM_APP} AND a.app_name LIKE $1 \
         AND (cardinality($2::text[]) = 0 OR aps.status = ANY($2::text[]))"
    );
    if !filter.environments.is_empty() {
        clause.push_str(&format!(
            " AND p.environment_id IN ({})",
            id_list(&filter.environments)
        ));
    }
    if !filter.teams.is_empty() {
        clause.push_str(&format!(" AND a.team_id IN ({})", id_list(&filter.teams)));
    }
    if !filter.app_ids.is_empty() {
        clause.push_str(&format!(" AND a.id IN ({})", id_list(&filter.app_ids)));
    }
    clause
}

fn order_by_app_name(filter: &AppListingFilter) -> String {
    format!(" ORDER BY a.app_name {}", filter.sort_order.as_sql())
}

fn app_join(filter: &AppListingFilter) -> String {
    format!(
        " LEFT JOIN pipeline p ON a.id = p.app_id AND p.deleted = false \
         LEFT JOIN app_status aps ON aps.app_id = a.id AND p.environment_id = aps.env_id {}",
        where_condition(filter)
    )
}

/// One row per (app, environment) with pipeline, status, team and cluster.
/// Apps without pipelines appear once with empty environment columns.
pub fn build_app_listing_query(filter: &AppListingFilter) -> String {
    format!(
        "SELECT env.id AS environment_id, env.environment_name, env.namespace, \
         a.id AS app_id, a.app_name, env.\"default\" AS is_default, aps.status AS app_status, \
         p.id AS pipeline_id, env.active AS environment_active, a.team_id, t.name AS team_name, \
         cluster.cluster_name \
         FROM pipeline p \
         INNER JOIN environment env ON env.id = p.environment_id \
         INNER JOIN cluster cluster ON cluster.id = env.cluster_id \
         RIGHT JOIN app a ON a.id = p.app_id AND p.deleted = false \
         RIGHT JOIN team t ON t.id = a.team_id \
         LEFT JOIN app_status aps ON aps.app_id = a.id AND p.environment_id = aps.env_id \
         {}{}",
        where_condition(filter),
        order_by_app_name(filter)
    )
}

/// The newest override per pipeline with its artifact's provenance.
pub fn build_app_listing_query_last_deployment_time(pipeline_ids: &[i64]) -> String {
    let scope = if pipeline_ids.is_empty() {
        String::new()
    } else {
        format!(" WHERE pco.pipeline_id IN ({})", id_list(pipeline_ids))
    };
    format!(
        "SELECT DISTINCT ON (pco.pipeline_id) pco.pipeline_id, pco.pipeline_release_counter, \
         pco.created_on AS last_deployed_time, cia.data_source, cia.material_info, \
         cia.id AS ci_artifact_id \
         FROM pipeline_config_override pco \
         INNER JOIN ci_artifact cia ON cia.id = pco.ci_artifact_id{scope} \
         ORDER BY pco.pipeline_id, pco.pipeline_release_counter DESC"
    )
}

/// A page of app ids ordered by their most recent deployment. Never-deployed
/// apps sort last when descending and first when ascending.
pub fn app_ids_query_with_pagination_for_last_deployed_search(filter: &AppListingFilter) -> String {
    let join = app_join(filter);
    let nulls = match filter.sort_order {
        SortOrder::Desc => "LAST",
        SortOrder::Asc => "FIRST",
    };
    format!(
        "SELECT a.id AS app_id, MAX(pco.id) AS last_deployed, \
         (SELECT COUNT(DISTINCT a.id) FROM app a{join}) AS total_count \
         FROM pipeline p \
         INNER JOIN pipeline_config_override pco ON pco.pipeline_id = p.id AND p.deleted = false \
         RIGHT JOIN (SELECT DISTINCT a.id AS id FROM app a{join}) da ON p.app_id = da.id AND p.deleted = false \
         INNER JOIN app a ON da.id = a.id \
         GROUP BY a.id ORDER BY last_deployed {} NULLS {nulls} \
         LIMIT {} OFFSET {}",
        filter.sort_order.as_sql(),
        filter.size,
        filter.offset
    )
}

/// A page of app ids ordered by app name.
pub fn app_ids_query_with_pagination_for_app_name_search(filter: &AppListingFilter) -> String {
    let join = app_join(filter);
    format!(
        "SELECT DISTINCT a.id AS app_id, a.app_name, \
         (SELECT COUNT(DISTINCT a.id) FROM app a{join}) AS total_count \
         FROM app a{join}{} LIMIT {} OFFSET {}",
        order_by_app_name(filter),
        filter.size,
        filter.offset
    )
}

/// Matching app count, for pages that come back empty.
pub fn app_count_query(filter: &AppListingFilter) -> String {
    format!(
        "SELECT COUNT(DISTINCT a.id) AS total_count FROM app a{}",
        app_join(filter)
    )
}

#[derive(QueryableByName)]
struct AppCountRow {
    #[diesel(sql_type = BigInt)]
    total_count: i64,
}

#[derive(QueryableByName)]
struct AppIdRow {
    #[diesel(sql_type = BigInt)]
    app_id: i64,
    #[diesel(sql_type = BigInt)]
    total_count: i64,
}

#[derive(QueryableByName)]
struct LastDeploymentRow {
    #[diesel(sql_type = BigInt)]
    pipeline_id: i64,
    #[diesel(sql_type = Int4)]
    pipeline_release_counter: i32,
    #[diesel(sql_type = Timestamptz)]
    last_deployed_time: DateTime<Utc>,
    #[diesel(sql_type = Varchar)]
    data_source: String,
    #[diesel(sql_type = Nullable<Text>)]
    material_info: Option<String>,
    #[diesel(sql_type = BigInt)]
    ci_artifact_id: i64,
}

#[derive(QueryableByName)]
struct AppEnvironmentRow {
    #[diesel(sql_type = Nullable<BigInt>)]
    environment_id: Option<i64>,
    #[diesel(sql_type = Nullable<Varchar>)]
    environment_name: Option<String>,
    #[diesel(sql_type = Nullable<Varchar>)]
    namespace: Option<String>,
    #[diesel(sql_type = BigInt)]
    app_id: i64,
    #[diesel(sql_type = Varchar)]
    app_name: String,
    #[diesel(sql_type = Nullable<Bool>)]
    is_default: Option<bool>,
    #[diesel(sql_type = Nullable<Varchar>)]
    app_status: Option<String>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pipeline_id: Option<i64>,
    #[diesel(sql_type = Nullable<Bool>)]
    environment_active: Option<bool>,
    #[diesel(sql_type = BigInt)]
    team_id: i64,
    #[diesel(sql_type = Varchar)]
    team_name: String,
    #[diesel(sql_type = Nullable<Varchar>)]
    cluster_name: Option<String>,
}

/// Last deployment of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastDeployment {
    pub pipeline_id: i64,
    pub release_counter: i32,
    pub deployed_time: DateTime<Utc>,
    pub data_source: String,
    pub material_info: Option<String>,
    pub ci_artifact_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppEnvironmentContainer {
    pub app_id: i64,
    pub app_name: String,
    pub team_id: i64,
    pub team_name: String,
    pub environment_id: Option<i64>,
    pub environment_name: Option<String>,
    pub namespace: Option<String>,
    pub is_default: bool,
    pub cluster_name: Option<String>,
    pub app_status: Option<String>,
    pub pipeline_id: Option<i64>,
    pub last_deployed_time: Option<DateTime<Utc>>,
    pub data_source: Option<String>,
    pub ci_artifact_id: Option<i64>,
    pub material_info: Vec<SourceRevision>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppListingPage {
    pub apps: Vec<AppEnvironmentContainer>,
    pub total_count: i64,
}

async fn timed<T, F>(
    ctx: &RequestContext,
    operation: &'static str,
    sql: &str,
    fut: F,
) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    let started = Instant::now();
    let result = ctx.run(db::logged(operation, sql, fut)).await;
    metrics::app_listing_duration(operation, LISTING_APP, started.elapsed());
    result
}

/// Newest override of each pipeline; all pipelines when `pipeline_ids` is empty.
pub async fn last_deployed_per_pipeline(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    pipeline_ids: &[i64],
) -> StoreResult<Vec<LastDeployment>> {
    let sql = build_app_listing_query_last_deployment_time(pipeline_ids);
    let rows: Vec<LastDeploymentRow> = timed(
        ctx,
        "buildAppListingQueryLastDeploymentTime",
        &sql,
        async {
            Ok(diesel::sql_query(sql.as_str())
                .load::<LastDeploymentRow>(conn)
                .await?)
        },
    )
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| LastDeployment {
            pipeline_id: r.pipeline_id,
            release_counter: r.pipeline_release_counter,
            deployed_time: r.last_deployed_time,
            data_source: r.data_source,
            material_info: r.material_info,
            ci_artifact_id: r.ci_artifact_id,
        })
        .collect())
}

/// Resolve a page of app ids under the filter's sort.
async fn page_app_ids(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    filter: &AppListingFilter,
) -> StoreResult<(Vec<i64>, i64)> {
    let (operation, sql) = match filter.sort_by {
        AppSortBy::LastDeployed => (
            "getAppIdsQueryWithPaginationForLastDeployedSearch",
            app_ids_query_with_pagination_for_last_deployed_search(filter),
        ),
        AppSortBy::AppName => (
            "getAppIdsQueryWithPaginationForAppNameSearch",
            app_ids_query_with_pagination_for_app_name_search(filter),
        ),
    };
    let pattern = filter.name_pattern();
    let statuses = filter.app_statuses.clone();
    let rows: Vec<AppIdRow> = timed(ctx, operation, &sql, async {
        Ok(diesel::sql_query(sql.as_str())
            .bind::<Text, _>(pattern)
            .bind::<Array<Text>, _>(statuses)
            .load::<AppIdRow>(conn)
            .await?)
    })
    .await?;
    let total = match rows.get(0) {
        Some(row) => row.total_count,
        None if filter.offset == 0 && filter.size > 0 => 0,
        None => count_apps(conn, ctx, filter).await?,
    };
    Ok((rows.into_iter().map(|r| r.app_id).collect(), total))
}

async fn count_apps(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    filter: &AppListingFilter,
) -> StoreResult<i64> {
    let sql = app_count_query(filter);
    let pattern = filter.name_pattern();
    let statuses = filter.app_statuses.clone();
    let rows: Vec<AppCountRow> = timed(ctx, "getAppCount", &sql, async {
        Ok(diesel::sql_query(sql.as_str())
            .bind::<Text, _>(pattern)
            .bind::<Array<Text>, _>(statuses)
            .load::<AppCountRow>(conn)
            .await?)
    })
    .await?;
    Ok(rows.get(0).map(|r| r.total_count).unwrap_or(0))
}

/// The app/environment overview for one page of apps.
///
/// Rows whose environment has been deactivated are skipped, and each
/// (app, environment) appears once, carrying the last deployment of its
/// pipeline.
pub async fn fetch_apps_by_environment(
    conn: &mut AsyncPgConnection,
    ctx: &RequestContext,
    filter: &AppListingFilter,
) -> StoreResult<AppListingPage> {
    let (app_ids, total_count) = page_app_ids(conn, ctx, filter).await?;
    if app_ids.is_empty() {
        return Ok(AppListingPage {
            apps: Vec::new(),
            total_count,
        });
    }

    let last_deployments: HashMap<i64, LastDeployment> =
        last_deployed_per_pipeline(conn, ctx, &[])
            .await?
            .into_iter()
            .map(|d| (d.pipeline_id, d))
            .collect();

    let page_filter = AppListingFilter {
        app_ids,
        ..filter.clone()
    };
    let sql = build_app_listing_query(&page_filter);
    let pattern = page_filter.name_pattern();
    let statuses = page_filter.app_statuses.clone();
    let rows: Vec<AppEnvironmentRow> = timed(ctx, "buildAppListingQuery", &sql, async {
        Ok(diesel::sql_query(sql.as_str())
            .bind::<Text, _>(pattern)
            .bind::<Array<Text>, _>(statuses)
            .load::<AppEnvironmentRow>(conn)
            .await?)
    })
    .await?;

    let mut seen = HashSet::new();
    let mut apps = Vec::with_capacity(rows.len());
    for row in rows {
        let linked = row.environment_id.is_some() && row.pipeline_id.is_some();
        if linked && row.environment_active == Some(false) {
            continue;
        }
        if !seen.insert((row.app_id, row.environment_id)) {
            continue;
        }
        let last = row.pipeline_id.and_then(|p| last_deployments.get(&p));
        let material_info = last
            .and_then(|d| {
                let source = DataSource::parse(&d.data_source).ok()?;
                parse_material_info(d.material_info.as_deref(), source).ok()
            })
            .unwrap_or_default();
        apps.push(AppEnvironmentContainer {
            app_id: row.app_id,
            app_name: row.app_name,
            team_id: row.team_id,
            team_name: row.team_name,
            environment_id: row.environment_id,
            environment_name: row.environment_name,
            namespace: row.namespace,
            is_default: row.is_default.unwrap_or(false),
            cluster_name: row.cluster_name,
            app_status: row.app_status,
            pipeline_id: row.pipeline_id,
            last_deployed_time: last.map(|d| d.deployed_time),
            data_source: last.map(|d| d.data_source.clone()),
            ci_artifact_id: last.map(|d| d.ci_artifact_id),
            material_info,
        });
    }

    tracing::debug!(apps = apps.len(), total = total_count, "App listing fetched");
    Ok(AppListingPage { apps, total_count })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> AppListingFilter {
        AppListingFilter {
            size: 20,
            ..Default::default()
        }
    }

    #[test]
    fn where_condition_inlines_ids_and_binds_text() {
        let mut f = filter();
        f.environments = vec![3, 4];
        f.teams = vec![2];
        let clause = where_condition(&f);
        assert!(clause.starts_with("WHERE a.active = true AND a.app_type = 0 AND a.app_name LIKE $1"));
        assert!(clause.contains("aps.status = ANY($2::text[])"));
        assert!(clause.contains(" AND p.environment_id IN (3,4)"));
        assert!(clause.contains(" AND a.team_id IN (2)"));
        assert!(!clause.contains("a.id IN"));
    }

    #[test]
    fn app_listing_query_right_joins_app_and_team() {
        let mut f = filter();
        f.app_ids = vec![7, 8];
        f.sort_order = SortOrder::Desc;
        let sql = build_app_listing_query(&f);
        assert!(sql.contains("RIGHT JOIN app a ON a.id = p.app_id AND p.deleted = false"));
        assert!(sql.contains("RIGHT JOIN team t ON t.id = a.team_id"));
        assert!(sql.contains("AND a.id IN (7,8)"));
        assert!(sql.ends_with("ORDER BY a.app_name DESC"));
    }

    #[test]
    fn last_deployment_query_keeps_newest_counter_per_pipeline() {
        let sql = build_app_listing_query_last_deployment_time(&[]);
        assert!(sql.starts_with("SELECT DISTINCT ON (pco.pipeline_id)"));
        assert!(sql.ends_with("ORDER BY pco.pipeline_id, pco.pipeline_release_counter DESC"));
        assert!(!sql.contains("WHERE"));
        let scoped = build_app_listing_query_last_deployment_time(&[10, 11]);
        assert!(scoped.contains("WHERE pco.pipeline_id IN (10,11)"));
    }

    #[test]
    fn last_deployed_search_places_never_deployed_apps() {
        let mut f = filter();
        f.sort_order = SortOrder::Desc;
        f.offset = 40;
        let sql = app_ids_query_with_pagination_for_last_deployed_search(&f);
        assert!(sql.contains("ORDER BY last_deployed DESC NULLS LAST"));
        assert!(sql.ends_with("LIMIT 20 OFFSET 40"));
        f.sort_order = SortOrder::Asc;
        let sql = app_ids_query_with_pagination_for_last_deployed_search(&f);
        assert!(sql.contains("NULLS FIRST"));
    }

    #[test]
    fn app_name_search_counts_distinct_apps() {
        let mut f = filter();
        f.app_name_search = "pay".into();
        let sql = app_ids_query_with_pagination_for_app_name_search(&f);
        assert!(sql.starts_with("SELECT DISTINCT a.id AS app_id, a.app_name"));
        assert!(sql.contains("(SELECT COUNT(DISTINCT a.id) FROM app a LEFT JOIN pipeline p"));
        assert!(sql.contains("ORDER BY a.app_name ASC LIMIT 20 OFFSET 0"));
        assert!(!sql.contains("pay"));
        assert_eq!(f.name_pattern(), "%pay%");
    }

    #[test]
    fn count_query_shares_the_page_filter() {
        let mut f = filter();
        f.teams = vec![2];
        let sql = app_count_query(&f);
        assert!(sql.starts_with("SELECT COUNT(DISTINCT a.id) AS total_count FROM app a LEFT JOIN pipeline p"));
        assert!(sql.ends_with(&where_condition(&f)));
        assert!(!sql.contains("LIMIT"));
    }
}
