//! pipeline — a CD pipeline deploying one app into one environment.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::pipeline;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = pipeline)]
pub struct Pipeline {
    pub id: i64,
    pub app_id: i64,
    pub environment_id: i64,
    pub ci_pipeline_id: Option<i64>,
    pub name: String,
    pub deployment_app_type: String,
    pub deleted: bool,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = pipeline)]
pub struct NewPipeline {
    pub id: Option<i64>,
    pub app_id: i64,
    pub environment_id: i64,
    pub ci_pipeline_id: Option<i64>,
    pub name: String,
    pub deployment_app_type: String,
    pub deleted: bool,
    pub created_by: i64,
    pub updated_by: i64,
}
