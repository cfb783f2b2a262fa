//! notification_settings and notification_rule.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::schema::{notification_rule, notification_settings};

/// Numeric encoding is persisted: 0 = FAIL, 1 = PASS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Fail = 0,
    Pass = 1,
}

impl ConditionType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> StoreResult<Self> {
        match code {
            0 => Ok(ConditionType::Fail),
            1 => Ok(ConditionType::Pass),
            other => Err(StoreError::invalid(format!("unknown condition type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineType {
    Ci,
    Cd,
}

impl PipelineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineType::Ci => "CI",
            PipelineType::Cd => "CD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, QueryableByName, Serialize, Deserialize)]
#[diesel(table_name = notification_rule)]
pub struct NotificationRule {
    pub id: i64,
    pub condition_type: i32,
    pub expression: String,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notification_rule)]
pub struct NewNotificationRule {
    pub condition_type: i32,
    pub expression: String,
    pub created_by: i64,
    pub updated_by: i64,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, QueryableByName, Serialize, Deserialize)]
#[diesel(table_name = notification_settings)]
pub struct NotificationSetting {
    pub id: i64,
    pub team_id: Option<i64>,
    pub app_id: Option<i64>,
    pub env_id: Option<i64>,
    pub pipeline_id: Option<i64>,
    pub pipeline_type: String,
    pub event_type_id: i32,
    /// Destination config, opaque JSON.
    pub config: String,
    pub view_id: Option<i64>,
    pub notification_rule_id: Option<i64>,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Default, Insertable)]
#[diesel(table_name = notification_settings)]
pub struct NewNotificationSetting {
    pub team_id: Option<i64>,
    pub app_id: Option<i64>,
    pub env_id: Option<i64>,
    pub pipeline_id: Option<i64>,
    pub pipeline_type: String,
    pub event_type_id: i32,
    pub config: String,
    pub view_id: Option<i64>,
    pub notification_rule_id: Option<i64>,
    pub created_by: i64,
    pub updated_by: i64,
}

/// A matched setting with its rule, loaded in the same round trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationSettingWithRule {
    pub setting: NotificationSetting,
    pub rule: Option<NotificationRule>,
}
