//! cd_workflow and cd_workflow_runner — stage executions, read-only here.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::schema::{cd_workflow, cd_workflow_runner};

/// Runner statuses that count as a healthy deployment.
pub const HEALTHY_RUNNER_STATUSES: [&str; 2] = ["Healthy", "Succeeded"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowType {
    Pre,
    Deploy,
    Post,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::Pre => "PRE",
            WorkflowType::Deploy => "DEPLOY",
            WorkflowType::Post => "POST",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "PRE" => Ok(WorkflowType::Pre),
            "DEPLOY" => Ok(WorkflowType::Deploy),
            "POST" => Ok(WorkflowType::Post),
            other => Err(StoreError::invalid(format!("unknown workflow type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = cd_workflow)]
pub struct CdWorkflow {
    pub id: i64,
    pub pipeline_id: i64,
    pub ci_artifact_id: i64,
    pub workflow_status: Option<String>,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = cd_workflow)]
pub struct NewCdWorkflow {
    pub pipeline_id: i64,
    pub ci_artifact_id: i64,
    pub workflow_status: Option<String>,
    pub created_by: i64,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = cd_workflow_runner)]
pub struct CdWorkflowRunner {
    pub id: i64,
    pub name: String,
    pub workflow_type: String,
    pub status: String,
    pub cd_workflow_id: i64,
    pub started_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub triggered_by: i64,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = cd_workflow_runner)]
pub struct NewCdWorkflowRunner {
    pub name: String,
    pub workflow_type: String,
    pub status: String,
    pub cd_workflow_id: i64,
    pub started_on: Option<DateTime<Utc>>,
    pub triggered_by: i64,
    pub created_by: i64,
    pub updated_by: i64,
}
