//! Chart config ledger: per-app charts and per-environment overrides.
//!
//! The `latest` flag moves in one transaction: clear it on the current
//! holder, mark that row `previous`, then set it on the new row. Writers for
//! one app serialize on `FOR UPDATE` locks of that app's charts.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::error::{StoreError, StoreResult};
use crate::models::chart::{
    ActiveEnvConfig, Chart, ChartChanges, EnvConfigOverride, NewChart, NewEnvConfigOverride,
};
use crate::models::status::ReleaseStatus;
use crate::schema::{chart_env_config_override, charts};

/// Lock every chart row of an app for the rest of the transaction.
async fn lock_app_charts(conn: &mut AsyncPgConnection, app_id: i64) -> StoreResult<Vec<i64>> {
    let ids = charts::table
        .filter(charts::app_id.eq(app_id))
        .select(charts::id)
        .for_update()
        .load::<i64>(conn)
        .await?;
    Ok(ids)
}

/// Clear `latest` on the app's current chart and demote it to `previous`.
async fn demote_latest_chart(
    conn: &mut AsyncPgConnection,
    app_id: i64,
    keep_id: Option<i64>,
    actor: i64,
) -> StoreResult<()> {
    let now = chrono::Utc::now();
    let current: Option<i64> = charts::table
        .filter(charts::app_id.eq(app_id))
        .filter(charts::latest.eq(true))
        .select(charts::id)
        .first(conn)
        .await
        .optional()?;
    let Some(current) = current else {
        return Ok(());
    };
    if Some(current) == keep_id {
        return Ok(());
    }
    diesel::update(
        charts::table
            .filter(charts::app_id.eq(app_id))
            .filter(charts::previous.eq(true)),
    )
    .set((charts::previous.eq(false), charts::updated_on.eq(now)))
    .execute(conn)
    .await?;
    diesel::update(charts::table.find(current))
        .set((
            charts::latest.eq(false),
            charts::previous.eq(true),
            charts::updated_on.eq(now),
            charts::updated_by.eq(actor),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Insert a chart as the app's new latest chart.
pub async fn create_chart(conn: &mut AsyncPgConnection, new: NewChart) -> StoreResult<Chart> {
    let app_id = new.app_id;
    let chart = conn
        .transaction::<_, StoreError, _>(|conn| {
            async move {
                lock_app_charts(conn, new.app_id).await?;
                demote_latest_chart(conn, new.app_id, None, new.created_by).await?;
                let row = NewChart {
                    latest: true,
                    previous: false,
                    ..new
                };
                let chart = diesel::insert_into(charts::table)
                    .values(&row)
                    .returning(Chart::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(chart)
            }
            .scope_boxed()
        })
        .await?;

    tracing::info!(app_id, chart_id = chart.id, "Chart created as latest");
    Ok(chart)
}

/// Move the `latest` flag to an existing chart of the same app.
pub async fn mark_chart_latest(
    conn: &mut AsyncPgConnection,
    chart_id: i64,
    actor: i64,
) -> StoreResult<Chart> {
    conn.transaction::<_, StoreError, _>(|conn| {
        async move {
            let target = find_chart(conn, chart_id).await?;
            lock_app_charts(conn, target.app_id).await?;
            demote_latest_chart(conn, target.app_id, Some(chart_id), actor).await?;
            let chart = diesel::update(charts::table.find(chart_id))
                .set((
                    charts::latest.eq(true),
                    charts::previous.eq(false),
                    charts::updated_on.eq(chrono::Utc::now()),
                    charts::updated_by.eq(actor),
                ))
                .returning(Chart::as_returning())
                .get_result(conn)
                .await?;
            Ok(chart)
        }
        .scope_boxed()
    })
    .await
}

pub async fn update_chart(
    conn: &mut AsyncPgConnection,
    chart_id: i64,
    changes: &ChartChanges,
    actor: i64,
) -> StoreResult<Chart> {
    diesel::update(charts::table.find(chart_id))
        .set((
            changes,
            charts::updated_on.eq(chrono::Utc::now()),
            charts::updated_by.eq(actor),
        ))
        .returning(Chart::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("chart {chart_id}")))
}

pub async fn update_chart_status(
    conn: &mut AsyncPgConnection,
    chart_id: i64,
    status: ReleaseStatus,
    actor: i64,
) -> StoreResult<()> {
    let updated = diesel::update(charts::table.find(chart_id))
        .set((
            charts::status.eq(status.as_str()),
            charts::updated_on.eq(chrono::Utc::now()),
            charts::updated_by.eq(actor),
        ))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Err(StoreError::not_found(format!("chart {chart_id}")));
    }
    Ok(())
}

pub async fn find_chart(conn: &mut AsyncPgConnection, chart_id: i64) -> StoreResult<Chart> {
    charts::table
        .find(chart_id)
        .select(Chart::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("chart {chart_id}")))
}

pub async fn find_latest_chart_for_app(
    conn: &mut AsyncPgConnection,
    app_id: i64,
) -> StoreResult<Chart> {
    charts::table
        .filter(charts::app_id.eq(app_id))
        .filter(charts::latest.eq(true))
        .select(Chart::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("latest chart for app {app_id}")))
}

pub async fn find_previous_chart(
    conn: &mut AsyncPgConnection,
    app_id: i64,
) -> StoreResult<Option<Chart>> {
    let chart = charts::table
        .filter(charts::app_id.eq(app_id))
        .filter(charts::previous.eq(true))
        .select(Chart::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(chart)
}

pub async fn find_chart_by_app_and_ref(
    conn: &mut AsyncPgConnection,
    app_id: i64,
    chart_ref_id: i64,
) -> StoreResult<Option<Chart>> {
    let chart = charts::table
        .filter(charts::app_id.eq(app_id))
        .filter(charts::chart_ref_id.eq(chart_ref_id))
        .order(charts::id.desc())
        .select(Chart::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(chart)
}

/// Overwrite `values_yaml` on the latest chart of each app.
pub async fn bulk_update_values_by_app_ids(
    conn: &mut AsyncPgConnection,
    app_ids: &[i64],
    values_yaml: &str,
    actor: i64,
) -> StoreResult<usize> {
    if app_ids.is_empty() {
        return Ok(0);
    }
    let updated = diesel::update(
        charts::table
            .filter(charts::app_id.eq_any(app_ids))
            .filter(charts::latest.eq(true)),
    )
    .set((
        charts::values_yaml.eq(values_yaml),
        charts::global_override.eq(values_yaml),
        charts::updated_on.eq(chrono::Utc::now()),
        charts::updated_by.eq(actor),
    ))
    .execute(conn)
    .await?;
    tracing::info!(apps = app_ids.len(), updated, "Bulk chart values update");
    Ok(updated)
}

// ---- env overrides ----

/// Lock the app's charts, then clear `latest` on the env override currently
/// holding it for (app, env), demoting it to `previous`.
async fn demote_latest_env_override(
    conn: &mut AsyncPgConnection,
    app_id: i64,
    env_id: i64,
    keep_id: Option<i64>,
    actor: i64,
) -> StoreResult<()> {
    let chart_ids = lock_app_charts(conn, app_id).await?;
    if chart_ids.is_empty() {
        return Ok(());
    }
    let now = chrono::Utc::now();
    let scope = chart_env_config_override::table
        .filter(chart_env_config_override::chart_id.eq_any(chart_ids.clone()))
        .filter(chart_env_config_override::target_environment.eq(env_id));

    let current: Vec<i64> = scope
        .filter(chart_env_config_override::latest.eq(true))
        .select(chart_env_config_override::id)
        .load(conn)
        .await?;
    let demote: Vec<i64> = current
        .into_iter()
        .filter(|id| Some(*id) != keep_id)
        .collect();
    if demote.is_empty() {
        return Ok(());
    }

    diesel::update(
        chart_env_config_override::table
            .filter(chart_env_config_override::chart_id.eq_any(chart_ids))
            .filter(chart_env_config_override::target_environment.eq(env_id))
            .filter(chart_env_config_override::previous.eq(true)),
    )
    .set((
        chart_env_config_override::previous.eq(false),
        chart_env_config_override::updated_on.eq(now),
    ))
    .execute(conn)
    .await?;
    diesel::update(chart_env_config_override::table.filter(chart_env_config_override::id.eq_any(demote)))
        .set((
            chart_env_config_override::latest.eq(false),
            chart_env_config_override::previous.eq(true),
            chart_env_config_override::updated_on.eq(now),
            chart_env_config_override::updated_by.eq(actor),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Insert an env override as the latest one for its (app, env).
pub async fn create_env_override(
    conn: &mut AsyncPgConnection,
    new: NewEnvConfigOverride,
) -> StoreResult<EnvConfigOverride> {
    let created = conn
        .transaction::<_, StoreError, _>(|conn| {
            async move {
                let chart = find_chart(conn, new.chart_id).await?;
                demote_latest_env_override(
                    conn,
                    chart.app_id,
                    new.target_environment,
                    None,
                    new.created_by,
                )
                .await?;
                let row = NewEnvConfigOverride {
                    latest: true,
                    previous: false,
                    ..new
                };
                let created = diesel::insert_into(chart_env_config_override::table)
                    .values(&row)
                    .returning(EnvConfigOverride::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(created)
            }
            .scope_boxed()
        })
        .await?;

    tracing::info!(
        env_override_id = created.id,
        chart_id = created.chart_id,
        env_id = created.target_environment,
        "Env override created as latest"
    );
    Ok(created)
}

/// Move the `latest` flag to an existing env override.
pub async fn mark_env_override_latest(
    conn: &mut AsyncPgConnection,
    env_override_id: i64,
    actor: i64,
) -> StoreResult<EnvConfigOverride> {
    conn.transaction::<_, StoreError, _>(|conn| {
        async move {
            let target = find_env_override(conn, env_override_id).await?;
            let chart = find_chart(conn, target.chart_id).await?;
            demote_latest_env_override(
                conn,
                chart.app_id,
                target.target_environment,
                Some(env_override_id),
                actor,
            )
            .await?;
            let updated = diesel::update(chart_env_config_override::table.find(env_override_id))
                .set((
                    chart_env_config_override::latest.eq(true),
                    chart_env_config_override::previous.eq(false),
                    chart_env_config_override::updated_on.eq(chrono::Utc::now()),
                    chart_env_config_override::updated_by.eq(actor),
                ))
                .returning(EnvConfigOverride::as_returning())
                .get_result(conn)
                .await?;
            Ok(updated)
        }
        .scope_boxed()
    })
    .await
}

pub async fn update_env_override_yaml(
    conn: &mut AsyncPgConnection,
    env_override_id: i64,
    env_override_yaml: &str,
    is_override: bool,
    actor: i64,
) -> StoreResult<EnvConfigOverride> {
    diesel::update(chart_env_config_override::table.find(env_override_id))
        .set((
            chart_env_config_override::env_override_yaml.eq(env_override_yaml),
            chart_env_config_override::is_override.eq(is_override),
            chart_env_config_override::updated_on.eq(chrono::Utc::now()),
            chart_env_config_override::updated_by.eq(actor),
        ))
        .returning(EnvConfigOverride::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("env override {env_override_id}")))
}

pub async fn update_env_override_status(
    conn: &mut AsyncPgConnection,
    env_override_id: i64,
    status: ReleaseStatus,
    actor: i64,
) -> StoreResult<()> {
    let updated = diesel::update(chart_env_config_override::table.find(env_override_id))
        .set((
            chart_env_config_override::status.eq(status.as_str()),
            chart_env_config_override::updated_on.eq(chrono::Utc::now()),
            chart_env_config_override::updated_by.eq(actor),
        ))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Err(StoreError::not_found(format!("env override {env_override_id}")));
    }
    Ok(())
}

pub async fn find_env_override(
    conn: &mut AsyncPgConnection,
    env_override_id: i64,
) -> StoreResult<EnvConfigOverride> {
    chart_env_config_override::table
        .find(env_override_id)
        .select(EnvConfigOverride::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("env override {env_override_id}")))
}

/// Latest env override for (app, env), across every chart of the app.
pub async fn find_latest_env_override(
    conn: &mut AsyncPgConnection,
    app_id: i64,
    env_id: i64,
) -> StoreResult<Option<EnvConfigOverride>> {
    let found = chart_env_config_override::table
        .inner_join(charts::table)
        .filter(charts::app_id.eq(app_id))
        .filter(chart_env_config_override::target_environment.eq(env_id))
        .filter(chart_env_config_override::latest.eq(true))
        .select(EnvConfigOverride::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// Latest chart of the app joined with the latest active override for env.
pub async fn find_active_env_override(
    conn: &mut AsyncPgConnection,
    app_id: i64,
    env_id: i64,
) -> StoreResult<ActiveEnvConfig> {
    let found = chart_env_config_override::table
        .inner_join(charts::table)
        .filter(charts::app_id.eq(app_id))
        .filter(charts::latest.eq(true))
        .filter(chart_env_config_override::target_environment.eq(env_id))
        .filter(chart_env_config_override::latest.eq(true))
        .filter(chart_env_config_override::active.eq(true))
        .select((Chart::as_select(), EnvConfigOverride::as_select()))
        .first::<(Chart, EnvConfigOverride)>(conn)
        .await
        .optional()?;
    let (chart, env_override) = found.ok_or_else(|| {
        StoreError::not_found(format!("active env override for app {app_id} env {env_id}"))
    })?;
    Ok(ActiveEnvConfig {
        chart,
        env_override,
    })
}

/// Overwrite env override values for the latest overrides of `chart_ids` in one env.
pub async fn bulk_update_env_override_by_chart_ids(
    conn: &mut AsyncPgConnection,
    chart_ids: &[i64],
    env_id: i64,
    env_override_yaml: &str,
    actor: i64,
) -> StoreResult<usize> {
    if chart_ids.is_empty() {
        return Ok(0);
    }
    let updated = diesel::update(
        chart_env_config_override::table
            .filter(chart_env_config_override::chart_id.eq_any(chart_ids))
            .filter(chart_env_config_override::target_environment.eq(env_id))
            .filter(chart_env_config_override::latest.eq(true)),
    )
    .set((
        chart_env_config_override::env_override_yaml.eq(env_override_yaml),
        chart_env_config_override::updated_on.eq(chrono::Utc::now()),
        chart_env_config_override::updated_by.eq(actor),
    ))
    .execute(conn)
    .await?;
    tracing::info!(charts = chart_ids.len(), env_id, updated, "Bulk env override update");
    Ok(updated)
}
