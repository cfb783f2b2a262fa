//! charts — per-app chart values, and chart_env_config_override — per-env values.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{chart_env_config_override, charts};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = charts)]
pub struct Chart {
    pub id: i64,
    pub app_id: i64,
    pub chart_ref_id: i64,
    pub chart_name: String,
    pub chart_version: String,
    pub values_yaml: String,
    pub global_override: String,
    pub release_override: String,
    pub pipeline_override: String,
    pub image_descriptor_template: String,
    pub status: String,
    pub active: bool,
    pub latest: bool,
    pub previous: bool,
    pub git_repo_url: String,
    pub chart_location: String,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

/// A chart about to become the latest for its app. `latest` and `previous`
/// are owned by the ledger and set on insert.
#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = charts)]
pub struct NewChart {
    pub app_id: i64,
    pub chart_ref_id: i64,
    pub chart_name: String,
    pub chart_version: String,
    pub values_yaml: String,
    pub global_override: String,
    pub release_override: String,
    pub pipeline_override: String,
    pub image_descriptor_template: String,
    pub status: String,
    pub active: bool,
    pub latest: bool,
    pub previous: bool,
    pub git_repo_url: String,
    pub chart_location: String,
    pub created_by: i64,
    pub updated_by: i64,
}

/// Editable chart properties.
#[derive(Debug, Clone, Default, AsChangeset, Deserialize)]
#[diesel(table_name = charts)]
pub struct ChartChanges {
    pub values_yaml: Option<String>,
    pub global_override: Option<String>,
    pub release_override: Option<String>,
    pub pipeline_override: Option<String>,
    pub image_descriptor_template: Option<String>,
    pub git_repo_url: Option<String>,
    pub chart_location: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = chart_env_config_override)]
pub struct EnvConfigOverride {
    pub id: i64,
    pub chart_id: i64,
    pub target_environment: i64,
    pub env_override_yaml: String,
    pub status: String,
    pub reviewed: bool,
    pub active: bool,
    pub namespace: String,
    pub latest: bool,
    pub previous: bool,
    /// When false the environment inherits the chart's global override.
    pub is_override: bool,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = chart_env_config_override)]
pub struct NewEnvConfigOverride {
    pub chart_id: i64,
    pub target_environment: i64,
    pub env_override_yaml: String,
    pub status: String,
    pub reviewed: bool,
    pub active: bool,
    pub namespace: String,
    pub latest: bool,
    pub previous: bool,
    pub is_override: bool,
    pub created_by: i64,
    pub updated_by: i64,
}

/// Latest chart joined with the active env override for one environment.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveEnvConfig {
    pub chart: Chart,
    pub env_override: EnvConfigOverride,
}
