//! deployment_approval_request and its per-user votes.
//!
//! A request is pending while `active` and its deployment has not been
//! triggered. A vote row with `user_response IS NULL` counts towards the
//! approval count.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{deployment_approval_request, deployment_approval_user_data};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deployment_approval_request)]
pub struct DeploymentApprovalRequest {
    pub id: i64,
    pub pipeline_id: i64,
    pub ci_artifact_id: i64,
    pub active: bool,
    pub artifact_deployment_triggered: bool,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = deployment_approval_request)]
pub struct NewDeploymentApprovalRequest {
    pub pipeline_id: i64,
    pub ci_artifact_id: i64,
    pub active: bool,
    pub artifact_deployment_triggered: bool,
    pub created_by: i64,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = deployment_approval_user_data)]
pub struct NewDeploymentApprovalUserData {
    pub approval_request_id: i64,
    pub user_id: i64,
    pub user_response: Option<i32>,
    pub comments: Option<String>,
    pub created_by: i64,
    pub updated_by: i64,
}
