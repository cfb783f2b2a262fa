//! Values merging for a deployment trigger.
//!
//! Documents are JSON or YAML and combine with JSON merge patch (RFC 7386):
//! objects merge key by key, `null` deletes a key, anything else replaces.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::models::status::DeploymentType;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}").unwrap());

/// Apply `patch` onto `target` in place.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Parse a values document. Blank input is the empty object.
pub fn parse_values(raw: &str) -> StoreResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    serde_yaml::from_str::<Value>(trimmed)
        .map_err(|e| StoreError::invalid(format!("malformed values document: {e}")))
}

/// Split an image reference into name and tag.
///
/// The tag is whatever follows the last `:` unless that part contains a `/`,
/// which makes the colon a registry port. Untagged images get `latest`.
pub fn split_image(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') && !tag.is_empty() => {
            (name.to_string(), tag.to_string())
        }
        _ => (image.to_string(), "latest".to_string()),
    }
}

/// Everything the image descriptor template may reference.
#[derive(Debug, Clone)]
pub struct ReleaseContext {
    pub image: String,
    pub pipeline_name: String,
    pub release_version: i32,
    pub deployment_type: DeploymentType,
    pub app_name: String,
    pub env_name: String,
    pub app_metrics: bool,
}

impl ReleaseContext {
    fn variables(&self) -> Map<String, Value> {
        let (name, tag) = split_image(&self.image);
        let mut vars = Map::new();
        vars.insert("Name".into(), Value::String(name));
        vars.insert("Tag".into(), Value::String(tag));
        vars.insert("PipelineName".into(), Value::String(self.pipeline_name.clone()));
        vars.insert(
            "ReleaseVersion".into(),
            Value::String(self.release_version.to_string()),
        );
        vars.insert(
            "DeploymentType".into(),
            Value::String(self.deployment_type.as_str().to_string()),
        );
        vars.insert("App".into(), Value::String(self.app_name.clone()));
        vars.insert("Env".into(), Value::String(self.env_name.clone()));
        vars.insert("AppMetrics".into(), Value::Bool(self.app_metrics));
        vars
    }
}

fn render_value(value: &Value) -> String {
    match value {
        // Escaped body only; the template supplies the quotes.
        Value::String(s) => {
            let quoted = Value::String(s.clone()).to_string();
            quoted[1..quoted.len() - 1].to_string()
        }
        other => other.to_string(),
    }
}

/// Substitute `{{.Field}}` placeholders. Unknown fields are refused.
pub fn render_template(template: &str, vars: &Map<String, Value>) -> StoreResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(field)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = vars.get(field.as_str()).ok_or_else(|| {
            StoreError::invalid(format!("unknown template field {:?}", field.as_str()))
        })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(&render_value(value));
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Render the chart's image descriptor template for one release.
pub fn render_release_override(template: &str, release: &ReleaseContext) -> StoreResult<Value> {
    let rendered = render_template(template, &release.variables())?;
    parse_values(&rendered)
}

/// Documents layered into the final values, lowest precedence first.
#[derive(Debug, Clone, Default)]
pub struct MergeInputs<'a> {
    pub global_override: &'a str,
    /// Only applied when the environment override is flagged `is_override`.
    pub env_override: Option<&'a str>,
    /// Config of the pipeline's default strategy.
    pub strategy_config: Option<&'a str>,
    pub release_override: Value,
    pub additional_override: Option<&'a str>,
}

/// `{}` ← global ← env ← strategy ← release ← additional.
pub fn merge_chain(inputs: &MergeInputs<'_>) -> StoreResult<Value> {
    let mut merged = Value::Object(Map::new());
    merge_patch(&mut merged, &parse_values(inputs.global_override)?);
    if let Some(env) = inputs.env_override {
        merge_patch(&mut merged, &parse_values(env)?);
    }
    if let Some(strategy) = inputs.strategy_config.filter(|s| !s.trim().is_empty()) {
        merge_patch(&mut merged, &parse_values(strategy)?);
    }
    merge_patch(&mut merged, &inputs.release_override);
    if let Some(additional) = inputs.additional_override {
        merge_patch(&mut merged, &parse_values(additional)?);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn release() -> ReleaseContext {
        ReleaseContext {
            image: "registry.local:5000/team/api:v1.4.2".into(),
            pipeline_name: "api-prod".into(),
            release_version: 7,
            deployment_type: DeploymentType::Deploy,
            app_name: "api".into(),
            env_name: "prod".into(),
            app_metrics: true,
        }
    }

    #[test]
    fn merge_patch_follows_rfc_7386() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!({"a": [1, 2]});
        merge_patch(&mut target, &json!({"a": [3]}));
        assert_eq!(target, json!({"a": [3]}));

        let mut target = json!({"a": "b"});
        merge_patch(&mut target, &json!(["c"]));
        assert_eq!(target, json!(["c"]));
    }

    #[test]
    fn yaml_and_blank_inputs_parse() {
        assert_eq!(parse_values("  ").unwrap(), json!({}));
        assert_eq!(
            parse_values("replicaCount: 2\nimage:\n  pullPolicy: Always\n").unwrap(),
            json!({"replicaCount": 2, "image": {"pullPolicy": "Always"}})
        );
        assert!(matches!(parse_values("a: [unclosed"), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn image_split_respects_registry_port() {
        assert_eq!(
            split_image("registry.local:5000/team/api:v1"),
            ("registry.local:5000/team/api".to_string(), "v1".to_string())
        );
        assert_eq!(
            split_image("registry.local:5000/team/api"),
            ("registry.local:5000/team/api".to_string(), "latest".to_string())
        );
        assert_eq!(split_image("nginx"), ("nginx".to_string(), "latest".to_string()));
    }

    #[test]
    fn release_override_renders_every_field() {
        let template = r#"{"image": {"repository": "{{.Name}}", "tag": "{{ .Tag }}"},
            "pipelineName": "{{.PipelineName}}", "releaseVersion": "{{.ReleaseVersion}}",
            "deploymentType": "{{.DeploymentType}}", "app": "{{.App}}", "env": "{{.Env}}",
            "appMetrics": {{.AppMetrics}}}"#;
        let rendered = render_release_override(template, &release()).unwrap();
        assert_eq!(rendered["image"]["repository"], "registry.local:5000/team/api");
        assert_eq!(rendered["image"]["tag"], "v1.4.2");
        assert_eq!(rendered["releaseVersion"], "7");
        assert_eq!(rendered["deploymentType"], "DEPLOY");
        assert_eq!(rendered["appMetrics"], true);
    }

    #[test]
    fn unknown_placeholder_is_refused() {
        let err = render_release_override(r#"{"x": "{{.Cluster}}"}"#, &release()).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(ref m) if m.contains("Cluster")));
    }

    #[test]
    fn rendered_strings_are_json_escaped() {
        let mut vars = Map::new();
        vars.insert("App".into(), Value::String("say \"hi\"".into()));
        let out = render_template(r#"{"app": "{{.App}}"}"#, &vars).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["app"], "say \"hi\"");
    }

    #[test]
    fn chain_applies_layers_in_order() {
        let inputs = MergeInputs {
            global_override: r#"{"replicaCount": 1, "image": {"pullPolicy": "IfNotPresent"}, "ingress": {"enabled": true}}"#,
            env_override: Some("replicaCount: 3\ningress: null\n"),
            strategy_config: Some(r#"{"rollingUpdate": {"maxSurge": "25%"}}"#),
            release_override: json!({"image": {"tag": "v2"}}),
            additional_override: Some(r#"{"replicaCount": 5}"#),
        };
        let merged = merge_chain(&inputs).unwrap();
        assert_eq!(
            merged,
            json!({
                "replicaCount": 5,
                "image": {"pullPolicy": "IfNotPresent", "tag": "v2"},
                "rollingUpdate": {"maxSurge": "25%"}
            })
        );
    }

    #[test]
    fn blank_strategy_and_missing_env_are_skipped() {
        let inputs = MergeInputs {
            global_override: r#"{"a": 1}"#,
            env_override: None,
            strategy_config: Some("   "),
            release_override: json!({}),
            additional_override: None,
        };
        assert_eq!(merge_chain(&inputs).unwrap(), json!({"a": 1}));
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
        ]
    }

    fn document() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 16, 4, |inner| {
            prop::collection::btree_map("[a-d]", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect()))
        })
    }

    proptest! {
        #[test]
        fn patching_twice_changes_nothing(target in document(), patch in document()) {
            let mut once = target.clone();
            merge_patch(&mut once, &patch);
            let mut twice = once.clone();
            merge_patch(&mut twice, &patch);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn empty_patch_keeps_objects(target in document()) {
            prop_assume!(target.is_object());
            let mut patched = target.clone();
            merge_patch(&mut patched, &json!({}));
            prop_assert_eq!(patched, target);
        }
    }
}
