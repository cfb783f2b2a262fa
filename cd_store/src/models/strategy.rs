//! pipeline_strategy — deployment strategy config per CD pipeline.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::pipeline_strategy;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = pipeline_strategy)]
pub struct PipelineStrategy {
    pub id: i64,
    pub pipeline_id: i64,
    pub strategy: String,
    pub config: String,
    pub is_default: bool,
    pub deleted: bool,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = pipeline_strategy)]
pub struct NewPipelineStrategy {
    pub pipeline_id: i64,
    pub strategy: String,
    pub config: String,
    pub is_default: bool,
    pub deleted: bool,
    pub created_by: i64,
    pub updated_by: i64,
}
