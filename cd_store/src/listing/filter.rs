//! Artifact listing filter.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::models::artifact::DataSource;
use crate::models::workflow::WorkflowType;

/// What kind of pipeline feeds the target CD pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentStageType {
    Ci,
    Webhook,
    Pre,
    Deploy,
    Post,
}

impl ParentStageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentStageType::Ci => "CI",
            ParentStageType::Webhook => "WEBHOOK",
            ParentStageType::Pre => "PRE",
            ParentStageType::Deploy => "DEPLOY",
            ParentStageType::Post => "POST",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CI" | "CI_BUILD" => Ok(ParentStageType::Ci),
            "WEBHOOK" => Ok(ParentStageType::Webhook),
            "PRE" => Ok(ParentStageType::Pre),
            "DEPLOY" => Ok(ParentStageType::Deploy),
            "POST" => Ok(ParentStageType::Post),
            other => Err(StoreError::invalid(format!("unknown parent stage type {other:?}"))),
        }
    }

    /// The CD stage a parent stage denotes, `None` for CI and webhook parents.
    pub fn cd_stage(self) -> Option<WorkflowType> {
        match self {
            ParentStageType::Pre => Some(WorkflowType::Pre),
            ParentStageType::Deploy => Some(WorkflowType::Deploy),
            ParentStageType::Post => Some(WorkflowType::Post),
            ParentStageType::Ci | ParentStageType::Webhook => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    Newest,
    Oldest,
}

impl SortBy {
    pub fn direction(self) -> &'static str {
        match self {
            SortBy::Newest => "DESC",
            SortBy::Oldest => "ASC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsListFilter {
    /// Target CD pipeline.
    pub pipeline_id: i64,
    /// Parent CI, external CI or CD pipeline.
    pub parent_id: i64,
    pub parent_stage_type: ParentStageType,
    pub stage_type: WorkflowType,
    /// Data source of plugin-produced artifacts admitted at CD stages.
    pub plugin_stage: Option<DataSource>,
    /// Substring on image.
    pub search_string: String,
    pub exclude_artifact_ids: Vec<i64>,
    /// Runner ids dropped from rollback listings.
    pub exclude_wfr_ids: Vec<i64>,
    pub limit: i64,
    pub offset: i64,
    pub use_cd_stage_query_v2: bool,
    /// Approval gating is on when positive.
    pub approvers_count: i64,
    pub sort_by: SortBy,
}

impl ArtifactsListFilter {
    pub fn new(
        pipeline_id: i64,
        parent_id: i64,
        parent_stage_type: ParentStageType,
        stage_type: WorkflowType,
    ) -> Self {
        Self {
            pipeline_id,
            parent_id,
            parent_stage_type,
            stage_type,
            plugin_stage: None,
            search_string: String::new(),
            exclude_artifact_ids: Vec::new(),
            exclude_wfr_ids: Vec::new(),
            limit: 10,
            offset: 0,
            use_cd_stage_query_v2: false,
            approvers_count: 0,
            sort_by: SortBy::Newest,
        }
    }

    pub fn approval_gated(&self) -> bool {
        self.approvers_count > 0
    }

    /// LIKE pattern for the image column; an empty search matches everything.
    pub fn search_pattern(&self) -> String {
        if self.search_string.is_empty() {
            "%".to_string()
        } else {
            format!("%{}%", self.search_string)
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.limit < 0 || self.offset < 0 {
            return Err(StoreError::invalid("limit and offset must not be negative"));
        }
        if self.approvers_count < 0 {
            return Err(StoreError::invalid("approvers count must not be negative"));
        }
        if let Some(stage) = self.plugin_stage {
            if !stage.is_plugin() {
                return Err(StoreError::invalid(format!(
                    "{} is not a plugin data source",
                    stage.as_str()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_pattern_wraps_substring() {
        let mut filter = ArtifactsListFilter::new(10, 5, ParentStageType::Ci, WorkflowType::Deploy);
        assert_eq!(filter.search_pattern(), "%");
        filter.search_string = "img:2".into();
        assert_eq!(filter.search_pattern(), "%img:2%");
    }

    #[test]
    fn gating_follows_approvers_count() {
        let mut filter = ArtifactsListFilter::new(10, 5, ParentStageType::Ci, WorkflowType::Deploy);
        assert!(!filter.approval_gated());
        filter.approvers_count = 2;
        assert!(filter.approval_gated());
    }

    #[test]
    fn parent_stage_parsing() {
        assert_eq!(ParentStageType::parse("webhook").unwrap(), ParentStageType::Webhook);
        assert_eq!(ParentStageType::parse("CI_BUILD").unwrap(), ParentStageType::Ci);
        assert_eq!(ParentStageType::Post.cd_stage(), Some(WorkflowType::Post));
        assert!(ParentStageType::Ci.cd_stage().is_none());
        assert!(ParentStageType::parse("JOB").is_err());
    }

    #[test]
    fn rejects_negative_paging_and_non_plugin_stage() {
        let mut filter = ArtifactsListFilter::new(10, 5, ParentStageType::Ci, WorkflowType::Deploy);
        filter.offset = -1;
        assert!(filter.validate().is_err());
        filter.offset = 0;
        filter.plugin_stage = Some(DataSource::CiRunner);
        assert!(filter.validate().is_err());
        filter.plugin_stage = Some(DataSource::PostCi);
        assert!(filter.validate().is_ok());
    }
}
