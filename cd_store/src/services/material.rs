//! Source revisions recorded in an artifact's material info.
//!
//! The column is an opaque JSON array at the repository boundary; this module
//! owns its schema.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::models::artifact::DataSource;

#[derive(Debug, Default, Deserialize)]
struct UrlConfig {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct Material {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(rename = "git-configuration", default)]
    git_configuration: UrlConfig,
    #[serde(rename = "scm-configuration", default)]
    scm_configuration: UrlConfig,
}

#[derive(Debug, Deserialize)]
struct Modification {
    #[serde(default)]
    revision: String,
    #[serde(rename = "modified-time", alias = "modifiedTime", default)]
    modified_time: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    branch: String,
}

#[derive(Debug, Deserialize)]
struct CiMaterialInfo {
    material: Material,
    #[serde(default)]
    changed: bool,
    #[serde(default)]
    modifications: Vec<Modification>,
}

/// The newest modification of one material.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRevision {
    pub url: String,
    pub revision: String,
    pub modified_time: String,
    pub author: String,
    pub message: String,
    pub branch: String,
    pub changed: bool,
}

/// Parse material info for a CI-built or webhook artifact.
///
/// Materials without modifications contribute nothing. Plugin artifacts carry
/// no material info and are refused.
pub fn parse_material_info(
    material_info: Option<&str>,
    source: DataSource,
) -> StoreResult<Vec<SourceRevision>> {
    match source.canonical() {
        DataSource::GoCd | DataSource::CiRunner | DataSource::External => {}
        other => {
            return Err(StoreError::invalid(format!(
                "data source {} has no material info",
                other.as_str()
            )))
        }
    }
    let raw = match material_info.map(str::trim) {
        None | Some("") => return Ok(Vec::new()),
        Some(raw) => raw,
    };

    let materials: Vec<CiMaterialInfo> = serde_json::from_str(raw)?;
    let mut revisions = Vec::with_capacity(materials.len());
    for info in materials {
        let url = match info.material.kind.as_str() {
            "git" => info.material.git_configuration.url,
            "scm" => info.material.scm_configuration.url,
            other => {
                return Err(StoreError::invalid(format!("unknown material type {other:?}")))
            }
        };
        if let Some(latest) = info.modifications.into_iter().next() {
            revisions.push(SourceRevision {
                url: url.trim().to_string(),
                revision: latest.revision,
                modified_time: latest.modified_time,
                author: latest.author,
                message: latest.message,
                branch: latest.branch,
                changed: info.changed,
            });
        }
    }
    Ok(revisions)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIT_INFO: &str = r#"[
        {
            "material": {"type": "git", "git-configuration": {"url": " https://github.com/acme/api.git "}},
            "changed": true,
            "modifications": [
                {"revision": "9f1c2e", "author": "dev", "message": "fix", "branch": "main", "modifiedTime": "2024-05-01T10:00:00Z"},
                {"revision": "older"}
            ]
        },
        {
            "material": {"type": "git", "git-configuration": {"url": "https://github.com/acme/lib.git"}},
            "modifications": []
        }
    ]"#;

    #[test]
    fn takes_newest_modification_per_material() {
        let revisions = parse_material_info(Some(GIT_INFO), DataSource::CiRunner).unwrap();
        assert_eq!(revisions.len(), 1);
        let first = &revisions[0];
        assert_eq!(first.url, "https://github.com/acme/api.git");
        assert_eq!(first.revision, "9f1c2e");
        assert_eq!(first.modified_time, "2024-05-01T10:00:00Z");
        assert!(first.changed);
    }

    #[test]
    fn legacy_external_source_is_accepted() {
        assert!(parse_material_info(Some("[]"), DataSource::LegacyExt).unwrap().is_empty());
        assert!(parse_material_info(None, DataSource::External).unwrap().is_empty());
    }

    #[test]
    fn plugin_source_is_refused() {
        assert!(matches!(
            parse_material_info(Some("[]"), DataSource::PostCi),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_material_type_is_refused() {
        let raw = r#"[{"material": {"type": "svn"}, "modifications": [{"revision": "1"}]}]"#;
        assert!(matches!(
            parse_material_info(Some(raw), DataSource::CiRunner),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn serializes_camel_case() {
        let revisions = parse_material_info(Some(GIT_INFO), DataSource::CiRunner).unwrap();
        let json = serde_json::to_value(&revisions[0]).unwrap();
        assert_eq!(json["modifiedTime"], "2024-05-01T10:00:00Z");
    }
}
