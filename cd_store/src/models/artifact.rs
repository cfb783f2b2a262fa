//! ci_artifact — an immutable record of a built container image.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::schema::ci_artifact;

/// Where an artifact came from. Stored in `ci_artifact.data_source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    CiRunner,
    External,
    PostCi,
    PreCd,
    PostCd,
    GoCd,
    /// Deprecated spelling of `External`; readers treat both alike.
    LegacyExt,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::CiRunner => "CI-RUNNER",
            DataSource::External => "EXTERNAL",
            DataSource::PostCi => "post_ci",
            DataSource::PreCd => "pre_cd",
            DataSource::PostCd => "post_cd",
            DataSource::GoCd => "GOCD",
            DataSource::LegacyExt => "ext",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "CI-RUNNER" => Ok(DataSource::CiRunner),
            "EXTERNAL" => Ok(DataSource::External),
            "post_ci" => Ok(DataSource::PostCi),
            "pre_cd" => Ok(DataSource::PreCd),
            "post_cd" => Ok(DataSource::PostCd),
            "GOCD" => Ok(DataSource::GoCd),
            "ext" => Ok(DataSource::LegacyExt),
            other => Err(StoreError::invalid(format!("unknown data source {other:?}"))),
        }
    }

    /// Produced by a plugin stage rather than a pipeline build.
    pub fn is_plugin(&self) -> bool {
        matches!(
            self,
            DataSource::PostCi | DataSource::PreCd | DataSource::PostCd
        )
    }

    pub fn is_external(&self) -> bool {
        matches!(self, DataSource::External | DataSource::LegacyExt)
    }

    /// The value writers emit.
    pub fn canonical(self) -> Self {
        match self {
            DataSource::LegacyExt => DataSource::External,
            other => other,
        }
    }
}

/// The single origin reference every artifact carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    CiPipeline(i64),
    ExternalCi(i64),
    Plugin { component_id: i64, stage: DataSource },
}

fn resolve_origin(
    pipeline_id: Option<i64>,
    external_ci_pipeline_id: Option<i64>,
    component_id: Option<i64>,
    data_source: &str,
) -> StoreResult<ArtifactOrigin> {
    let source = DataSource::parse(data_source)?;
    match (pipeline_id, external_ci_pipeline_id, component_id) {
        (Some(id), None, None) if !source.is_plugin() => Ok(ArtifactOrigin::CiPipeline(id)),
        (None, Some(id), None) if !source.is_plugin() => Ok(ArtifactOrigin::ExternalCi(id)),
        (None, None, Some(component_id)) if source.is_plugin() => Ok(ArtifactOrigin::Plugin {
            component_id,
            stage: source,
        }),
        (None, None, Some(_)) => Err(StoreError::invalid(format!(
            "component origin requires a plugin data source, got {data_source}"
        ))),
        (Some(_), None, None) | (None, Some(_), None) => Err(StoreError::invalid(format!(
            "plugin data source {data_source} requires a component origin"
        ))),
        _ => Err(StoreError::invalid(
            "artifact must reference exactly one of ci pipeline, external ci pipeline or component",
        )),
    }
}

#[derive(
    Debug, Clone, PartialEq, Queryable, Selectable, QueryableByName, Serialize, Deserialize,
)]
#[diesel(table_name = ci_artifact)]
pub struct CiArtifact {
    pub id: i64,
    pub pipeline_id: Option<i64>,
    pub image: String,
    pub image_digest: String,
    pub material_info: Option<String>,
    pub data_source: String,
    pub ci_workflow_id: Option<i64>,
    /// 0 when this row is a chain root.
    pub parent_ci_artifact: i64,
    pub scan_enabled: bool,
    pub scanned: bool,
    pub external_ci_pipeline_id: Option<i64>,
    pub is_artifact_uploaded: bool,
    pub credentials_source_type: Option<String>,
    pub credentials_source_value: Option<String>,
    pub component_id: Option<i64>,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

impl CiArtifact {
    pub fn origin(&self) -> StoreResult<ArtifactOrigin> {
        resolve_origin(
            self.pipeline_id,
            self.external_ci_pipeline_id,
            self.component_id,
            &self.data_source,
        )
    }

    pub fn source(&self) -> StoreResult<DataSource> {
        DataSource::parse(&self.data_source)
    }

    /// Root of the copy chain this artifact belongs to.
    pub fn chain_root_id(&self) -> i64 {
        if self.parent_ci_artifact != 0 {
            self.parent_ci_artifact
        } else {
            self.id
        }
    }
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = ci_artifact)]
pub struct NewCiArtifact {
    pub pipeline_id: Option<i64>,
    pub image: String,
    pub image_digest: String,
    pub material_info: Option<String>,
    pub data_source: String,
    pub ci_workflow_id: Option<i64>,
    pub parent_ci_artifact: i64,
    pub scan_enabled: bool,
    pub scanned: bool,
    pub external_ci_pipeline_id: Option<i64>,
    pub is_artifact_uploaded: bool,
    pub credentials_source_type: Option<String>,
    pub credentials_source_value: Option<String>,
    pub component_id: Option<i64>,
    pub created_by: i64,
    pub updated_by: i64,
}

impl NewCiArtifact {
    fn base(image: &str, digest: &str, source: DataSource, actor: i64) -> Self {
        Self {
            pipeline_id: None,
            image: image.to_string(),
            image_digest: digest.to_string(),
            material_info: None,
            data_source: source.canonical().as_str().to_string(),
            ci_workflow_id: None,
            parent_ci_artifact: 0,
            scan_enabled: false,
            scanned: false,
            external_ci_pipeline_id: None,
            is_artifact_uploaded: false,
            credentials_source_type: None,
            credentials_source_value: None,
            component_id: None,
            created_by: actor,
            updated_by: actor,
        }
    }

    /// An image built by a CI pipeline run.
    pub fn from_ci(
        pipeline_id: i64,
        ci_workflow_id: Option<i64>,
        image: &str,
        digest: &str,
        actor: i64,
    ) -> Self {
        Self {
            pipeline_id: Some(pipeline_id),
            ci_workflow_id,
            ..Self::base(image, digest, DataSource::CiRunner, actor)
        }
    }

    /// An image pushed through an external CI webhook.
    pub fn from_webhook(external_ci_pipeline_id: i64, image: &str, digest: &str, actor: i64) -> Self {
        Self {
            external_ci_pipeline_id: Some(external_ci_pipeline_id),
            ..Self::base(image, digest, DataSource::External, actor)
        }
    }

    /// An image produced by a plugin stage of `component_id`.
    pub fn from_plugin(
        component_id: i64,
        stage: DataSource,
        image: &str,
        digest: &str,
        actor: i64,
    ) -> Self {
        Self {
            component_id: Some(component_id),
            ..Self::base(image, digest, stage, actor)
        }
    }

    pub fn with_material_info(mut self, material_info: impl Into<String>) -> Self {
        self.material_info = Some(material_info.into());
        self
    }

    pub fn with_parent(mut self, parent_ci_artifact: i64) -> Self {
        self.parent_ci_artifact = parent_ci_artifact;
        self
    }

    /// Reject rows that break the artifact contract before they reach the database.
    pub fn validate(&self) -> StoreResult<ArtifactOrigin> {
        if self.image.trim().is_empty() {
            return Err(StoreError::invalid("artifact image must not be empty"));
        }
        if self.image_digest.trim().is_empty() {
            return Err(StoreError::invalid("artifact image digest must not be empty"));
        }
        if self.parent_ci_artifact < 0 {
            return Err(StoreError::invalid("parent artifact id must not be negative"));
        }
        resolve_origin(
            self.pipeline_id,
            self.external_ci_pipeline_id,
            self.component_id,
            &self.data_source,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_source_round_trips_wire_values() {
        for source in [
            DataSource::CiRunner,
            DataSource::External,
            DataSource::PostCi,
            DataSource::PreCd,
            DataSource::PostCd,
            DataSource::GoCd,
            DataSource::LegacyExt,
        ] {
            assert_eq!(DataSource::parse(source.as_str()).unwrap(), source);
        }
        assert!(matches!(
            DataSource::parse("jenkins"),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn legacy_ext_is_external() {
        assert!(DataSource::LegacyExt.is_external());
        assert_eq!(DataSource::LegacyExt.canonical(), DataSource::External);
        let webhook = NewCiArtifact::from_webhook(4, "r/img:1", "sha256:a", 1);
        assert_eq!(webhook.data_source, "EXTERNAL");
    }

    #[test]
    fn ci_artifact_has_pipeline_origin() {
        let new = NewCiArtifact::from_ci(5, Some(9), "r/img:1", "sha256:a", 1);
        assert_eq!(new.validate().unwrap(), ArtifactOrigin::CiPipeline(5));
    }

    #[test]
    fn plugin_artifact_has_component_origin() {
        let new = NewCiArtifact::from_plugin(5, DataSource::PostCi, "r/img:1", "sha256:a", 1);
        assert_eq!(
            new.validate().unwrap(),
            ArtifactOrigin::Plugin {
                component_id: 5,
                stage: DataSource::PostCi
            }
        );
    }

    #[test]
    fn two_origins_are_rejected() {
        let mut new = NewCiArtifact::from_ci(5, None, "r/img:1", "sha256:a", 1);
        new.external_ci_pipeline_id = Some(6);
        assert!(matches!(new.validate(), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn no_origin_is_rejected() {
        let mut new = NewCiArtifact::from_ci(5, None, "r/img:1", "sha256:a", 1);
        new.pipeline_id = None;
        assert!(matches!(new.validate(), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn component_needs_plugin_source() {
        let mut new = NewCiArtifact::from_plugin(5, DataSource::PostCi, "r/img:1", "sha256:a", 1);
        new.data_source = DataSource::CiRunner.as_str().to_string();
        assert!(matches!(new.validate(), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn empty_image_is_rejected() {
        let new = NewCiArtifact::from_ci(5, None, " ", "sha256:a", 1);
        assert!(matches!(new.validate(), Err(StoreError::Invalid(_))));
    }
}
