//! Notification settings and rules.
//!
//! A setting's scope columns (team, app, env, pipeline) act as wildcards when
//! NULL. An event matches a setting when, for some non-empty subset of the
//! event's scopes, the setting pins exactly that subset to the event's values
//! and leaves every other scope NULL. The subsets are disjoint, so each
//! setting matches at most once.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Nullable, Text, Timestamptz};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::db;
use crate::error::{StoreError, StoreResult};
use crate::models::notification::{
    ConditionType, NewNotificationRule, NewNotificationSetting, NotificationRule,
    NotificationSetting, NotificationSettingWithRule, PipelineType,
};
use crate::schema::{notification_rule, notification_settings};

/// An incoming pipeline event.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub pipeline_type: PipelineType,
    pub event_type_id: i32,
    pub team_id: Option<i64>,
    pub app_id: Option<i64>,
    pub env_id: Option<i64>,
    pub pipeline_id: Option<i64>,
}

const SCOPE_COLUMNS: [&str; 4] = ["team_id", "app_id", "env_id", "pipeline_id"];

impl NotificationEvent {
    fn scopes(&self) -> [Option<i64>; 4] {
        [self.team_id, self.app_id, self.env_id, self.pipeline_id]
    }
}

/// Disjunction of one group per non-empty subset of the event's scopes.
/// `None` when the event carries no scope at all.
pub(crate) fn scope_match_clause(event: &NotificationEvent) -> Option<String> {
    let scopes = event.scopes();
    let present: Vec<usize> = (0..SCOPE_COLUMNS.len())
        .filter(|i| scopes[*i].is_some())
        .collect();
    if present.is_empty() {
        return None;
    }

    let mut groups = Vec::new();
    for mask in 1u32..(1 << present.len()) {
        let mut terms = Vec::with_capacity(SCOPE_COLUMNS.len());
        for (col_idx, column) in SCOPE_COLUMNS.iter().enumerate() {
            let pinned = present
                .iter()
                .position(|p| *p == col_idx)
                .filter(|bit| mask & (1 << bit) != 0)
                .and(scopes[col_idx]);
            match pinned {
                Some(value) => terms.push(format!("ns.{column} = {value}")),
                None => terms.push(format!("ns.{column} IS NULL")),
            }
        }
        groups.push(format!("({})", terms.join(" AND ")));
    }
    Some(format!("({})", groups.join(" OR ")))
}

pub(crate) fn build_match_query(event: &NotificationEvent) -> Option<String> {
    let scope = scope_match_clause(event)?;
    Some(format!(
        "SELECT ns.*, \
         nr.id AS rule_id, nr.condition_type AS rule_condition_type, \
         nr.expression AS rule_expression, nr.created_on AS rule_created_on, \
         nr.created_by AS rule_created_by, nr.updated_on AS rule_updated_on, \
         nr.updated_by AS rule_updated_by \
         FROM notification_settings ns \
         LEFT JOIN notification_rule nr ON nr.id = ns.notification_rule_id \
         WHERE ns.pipeline_type = $1 AND ns.event_type_id = $2 AND {scope} \
         ORDER BY ns.id"
    ))
}

#[derive(QueryableByName)]
struct MatchedSettingRow {
    #[diesel(embed)]
    setting: NotificationSetting,
    #[diesel(sql_type = Nullable<BigInt>)]
    rule_id: Option<i64>,
    #[diesel(sql_type = Nullable<Integer>)]
    rule_condition_type: Option<i32>,
    #[diesel(sql_type = Nullable<Text>)]
    rule_expression: Option<String>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    rule_created_on: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<BigInt>)]
    rule_created_by: Option<i64>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    rule_updated_on: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<BigInt>)]
    rule_updated_by: Option<i64>,
}

impl MatchedSettingRow {
    fn into_match(self) -> NotificationSettingWithRule {
        let rule = match (
            self.rule_id,
            self.rule_condition_type,
            self.rule_expression,
            self.rule_created_on,
            self.rule_created_by,
            self.rule_updated_on,
            self.rule_updated_by,
        ) {
            (
                Some(id),
                Some(condition_type),
                Some(expression),
                Some(created_on),
                Some(created_by),
                Some(updated_on),
                Some(updated_by),
            ) => Some(NotificationRule {
                id,
                condition_type,
                expression,
                created_on,
                created_by,
                updated_on,
                updated_by,
            }),
            _ => None,
        };
        NotificationSettingWithRule {
            setting: self.setting,
            rule,
        }
    }
}

/// Every setting matching the event, each once, with its rule.
pub async fn find_matching(
    conn: &mut AsyncPgConnection,
    event: &NotificationEvent,
) -> StoreResult<Vec<NotificationSettingWithRule>> {
    let Some(sql) = build_match_query(event) else {
        return Ok(Vec::new());
    };
    let query = diesel::sql_query(sql.clone())
        .bind::<Text, _>(event.pipeline_type.as_str())
        .bind::<Integer, _>(event.event_type_id);
    let rows: Vec<MatchedSettingRow> = db::logged("notification_match", &sql, async {
        Ok(query.load::<MatchedSettingRow>(conn).await?)
    })
    .await?;
    Ok(rows.into_iter().map(MatchedSettingRow::into_match).collect())
}

/// Insert a batch of settings atomically.
pub async fn save_all(
    conn: &mut AsyncPgConnection,
    batch: Vec<NewNotificationSetting>,
) -> StoreResult<Vec<NotificationSetting>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    for new in &batch {
        serde_json::from_str::<serde_json::Value>(&new.config)?;
    }
    let saved = conn
        .transaction::<_, StoreError, _>(|conn| {
            async move {
                let rows = diesel::insert_into(notification_settings::table)
                    .values(&batch)
                    .returning(NotificationSetting::as_returning())
                    .get_results(conn)
                    .await?;
                Ok(rows)
            }
            .scope_boxed()
        })
        .await?;
    tracing::info!(count = saved.len(), "Notification settings saved");
    Ok(saved)
}

pub async fn find_by_ids(
    conn: &mut AsyncPgConnection,
    ids: &[i64],
) -> StoreResult<Vec<NotificationSetting>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = notification_settings::table
        .filter(notification_settings::id.eq_any(ids))
        .order(notification_settings::id)
        .select(NotificationSetting::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

/// Replace a setting's destination config. The config must be JSON.
pub async fn update_config(
    conn: &mut AsyncPgConnection,
    id: i64,
    config: &str,
    actor: i64,
) -> StoreResult<NotificationSetting> {
    serde_json::from_str::<serde_json::Value>(config)?;
    diesel::update(notification_settings::table.find(id))
        .set((
            notification_settings::config.eq(config),
            notification_settings::updated_on.eq(Utc::now()),
            notification_settings::updated_by.eq(actor),
        ))
        .returning(NotificationSetting::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("notification setting {id}")))
}

pub async fn delete_by_ids(conn: &mut AsyncPgConnection, ids: &[i64]) -> StoreResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let deleted = diesel::delete(notification_settings::table.filter(notification_settings::id.eq_any(ids)))
        .execute(conn)
        .await?;
    tracing::info!(requested = ids.len(), deleted, "Notification settings deleted");
    Ok(deleted)
}

pub async fn create_rule(
    conn: &mut AsyncPgConnection,
    condition: ConditionType,
    expression: &str,
    actor: i64,
) -> StoreResult<NotificationRule> {
    let new = NewNotificationRule {
        condition_type: condition.code(),
        expression: expression.to_string(),
        created_by: actor,
        updated_by: actor,
    };
    let saved = diesel::insert_into(notification_rule::table)
        .values(&new)
        .returning(NotificationRule::as_returning())
        .get_result(conn)
        .await?;
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(team: Option<i64>, app: Option<i64>, env: Option<i64>, pipeline: Option<i64>) -> NotificationEvent {
        NotificationEvent {
            pipeline_type: PipelineType::Cd,
            event_type_id: 2,
            team_id: team,
            app_id: app,
            env_id: env,
            pipeline_id: pipeline,
        }
    }

    #[test]
    fn one_group_per_non_empty_subset() {
        let clause = scope_match_clause(&event(Some(2), Some(7), Some(3), Some(10))).unwrap();
        assert_eq!(clause.matches(") OR (").count() + 1, 15);
    }

    #[test]
    fn absent_scopes_are_always_null() {
        let clause = scope_match_clause(&event(None, Some(7), None, None)).unwrap();
        assert_eq!(
            clause,
            "((ns.team_id IS NULL AND ns.app_id = 7 AND ns.env_id IS NULL AND ns.pipeline_id IS NULL))"
        );
    }

    #[test]
    fn every_group_pins_a_distinct_subset() {
        let clause = scope_match_clause(&event(Some(2), Some(7), None, None)).unwrap();
        assert!(clause.contains("(ns.team_id = 2 AND ns.app_id IS NULL AND ns.env_id IS NULL AND ns.pipeline_id IS NULL)"));
        assert!(clause.contains("(ns.team_id IS NULL AND ns.app_id = 7 AND ns.env_id IS NULL AND ns.pipeline_id IS NULL)"));
        assert!(clause.contains("(ns.team_id = 2 AND ns.app_id = 7 AND ns.env_id IS NULL AND ns.pipeline_id IS NULL)"));
        assert!(!clause.contains("ns.team_id IS NULL AND ns.app_id IS NULL"));
    }

    #[test]
    fn scopeless_event_matches_nothing() {
        assert!(build_match_query(&event(None, None, None, None)).is_none());
    }

    #[test]
    fn query_joins_rule_and_binds_type_and_event() {
        let sql = build_match_query(&event(Some(2), None, None, None)).unwrap();
        assert!(sql.contains("LEFT JOIN notification_rule nr ON nr.id = ns.notification_rule_id"));
        assert!(sql.contains("ns.pipeline_type = $1 AND ns.event_type_id = $2"));
        assert!(!sql.contains("DISTINCT"));
    }
}
