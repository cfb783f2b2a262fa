//! docker_artifact_store — container registries, at most one default.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::docker_artifact_store;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = docker_artifact_store)]
pub struct DockerArtifactStore {
    pub id: String,
    pub plugin_id: String,
    pub registry_url: String,
    pub registry_type: String,
    pub is_default: bool,
    pub active: bool,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = docker_artifact_store)]
pub struct NewDockerArtifactStore {
    pub id: String,
    pub plugin_id: String,
    pub registry_url: String,
    pub registry_type: String,
    pub is_default: bool,
    pub active: bool,
    pub created_by: i64,
    pub updated_by: i64,
}
