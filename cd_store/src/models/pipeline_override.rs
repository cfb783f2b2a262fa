//! pipeline_config_override — one row per deployment trigger.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::models::pipeline::Pipeline;
use crate::models::status::{DeploymentType, ReleaseStatus};
use crate::schema::pipeline_config_override;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = pipeline_config_override)]
pub struct PipelineOverride {
    pub id: i64,
    pub request_identifier: String,
    pub env_config_override_id: i64,
    pub pipeline_override_yaml: String,
    pub merged_values_yaml: String,
    pub status: String,
    pub git_hash: Option<String>,
    pub commit_time: Option<DateTime<Utc>>,
    pub pipeline_id: i64,
    pub ci_artifact_id: i64,
    pub pipeline_release_counter: i32,
    pub cd_workflow_id: Option<i64>,
    pub deployment_type: String,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

impl PipelineOverride {
    pub fn release_status(&self) -> StoreResult<ReleaseStatus> {
        ReleaseStatus::parse(&self.status)
    }

    pub fn kind(&self) -> StoreResult<DeploymentType> {
        DeploymentType::parse(&self.deployment_type)
    }
}

/// A ledger row with its CD pipeline loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOverrideWithPipeline {
    pub pipeline_override: PipelineOverride,
    pub pipeline: Pipeline,
}

/// Insert shape. The release counter is assigned by the ledger, never by callers.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = pipeline_config_override)]
pub(crate) struct NewPipelineOverrideRow {
    pub request_identifier: String,
    pub env_config_override_id: i64,
    pub pipeline_override_yaml: String,
    pub merged_values_yaml: String,
    pub status: String,
    pub pipeline_id: i64,
    pub ci_artifact_id: i64,
    pub pipeline_release_counter: i32,
    pub cd_workflow_id: Option<i64>,
    pub deployment_type: String,
    pub created_by: i64,
    pub updated_by: i64,
}

/// What a trigger knows before its release counter is assigned.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPipelineOverride {
    pub request_identifier: String,
    pub env_config_override_id: i64,
    pub pipeline_override_yaml: String,
    pub merged_values_yaml: String,
    pub pipeline_id: i64,
    pub ci_artifact_id: i64,
    pub cd_workflow_id: Option<i64>,
    pub deployment_type: DeploymentType,
    pub created_by: i64,
}

impl NewPipelineOverride {
    pub(crate) fn into_row(self, release_counter: i32) -> NewPipelineOverrideRow {
        NewPipelineOverrideRow {
            request_identifier: self.request_identifier,
            env_config_override_id: self.env_config_override_id,
            pipeline_override_yaml: self.pipeline_override_yaml,
            merged_values_yaml: self.merged_values_yaml,
            status: ReleaseStatus::New.as_str().to_string(),
            pipeline_id: self.pipeline_id,
            ci_artifact_id: self.ci_artifact_id,
            pipeline_release_counter: release_counter,
            cd_workflow_id: self.cd_workflow_id,
            deployment_type: self.deployment_type.as_str().to_string(),
            created_by: self.created_by,
            updated_by: self.created_by,
        }
    }
}

/// Git commit recorded when a deployment moves to IN_PROGRESS.
#[derive(Debug, Clone, Deserialize)]
pub struct GitCommit {
    pub git_hash: String,
    pub commit_time: DateTime<Utc>,
}
