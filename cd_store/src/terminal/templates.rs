//! Manifest rendering for terminal pods.
//!
//! Stored templates carry `${cluster_id}`, `${user_id}`, `${random_id}`,
//! `${pod_name}` and `${base_image}` placeholders. After substitution each
//! manifest is adjusted by kind so the pod, its service account and its
//! role binding all agree on names.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{StoreError, StoreResult};

/// Node name meaning "let the scheduler pick".
pub const AUTO_SELECT_NODE: &str = "autoSelectNode";

const RANDOM_ID_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTaint {
    pub key: String,
    pub effect: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParams {
    pub cluster_id: i64,
    pub user_id: i64,
    pub random_id: String,
    pub pod_name: String,
    pub namespace: String,
    pub node_name: String,
    pub base_image: String,
    pub taints: Vec<NodeTaint>,
}

impl TemplateParams {
    pub fn is_auto_select(&self) -> bool {
        self.node_name == AUTO_SELECT_NODE
    }
}

pub fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_ID_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// `terminal-access-<cluster>-<user>-<random>`
pub fn pod_name(cluster_id: i64, user_id: i64, random_id: &str) -> String {
    format!("terminal-access-{cluster_id}-{user_id}-{random_id}")
}

pub fn substitute_placeholders(template: &str, params: &TemplateParams) -> String {
    template
        .replace("${cluster_id}", &params.cluster_id.to_string())
        .replace("${user_id}", &params.user_id.to_string())
        .replace("${random_id}", &params.random_id)
        .replace("${pod_name}", &params.pod_name)
        .replace("${base_image}", &params.base_image)
}

fn set_if_present(map: &mut Value, key: &str, value: Value) {
    if let Some(slot) = map.get_mut(key) {
        *slot = value;
    }
}

fn adjust_pod(manifest: &mut Value, params: &TemplateParams) {
    if let Some(metadata) = manifest.get_mut("metadata") {
        set_if_present(metadata, "name", json!(params.pod_name));
    }
    let Some(spec) = manifest.get_mut("spec").and_then(Value::as_object_mut) else {
        return;
    };
    if spec.contains_key("serviceAccountName") {
        spec.insert(
            "serviceAccountName".into(),
            json!(format!("{}-sa", params.pod_name)),
        );
    }
    spec.remove("nodeSelector");
    if !params.is_auto_select() {
        spec.insert("nodeName".into(), json!(params.node_name));
    }
    if let Some(containers) = spec.get_mut("containers").and_then(Value::as_array_mut) {
        for container in containers {
            set_if_present(container, "image", json!(params.base_image));
        }
    }
    let tolerations: Vec<Value> = if params.is_auto_select() {
        Vec::new()
    } else {
        params
            .taints
            .iter()
            .map(|t| json!({"key": t.key, "operator": "Exists", "effect": t.effect}))
            .collect()
    };
    spec.insert("tolerations".into(), Value::Array(tolerations));
}

fn adjust_service_account(manifest: &mut Value, params: &TemplateParams) {
    if let Some(metadata) = manifest.get_mut("metadata") {
        set_if_present(metadata, "name", json!(format!("{}-sa", params.pod_name)));
        set_if_present(metadata, "namespace", json!(params.namespace));
    }
}

fn adjust_role_binding(manifest: &mut Value, params: &TemplateParams) {
    if let Some(metadata) = manifest.get_mut("metadata") {
        set_if_present(metadata, "name", json!(format!("{}-crb", params.pod_name)));
    }
    if let Some(subjects) = manifest.get_mut("subjects").and_then(Value::as_array_mut) {
        for subject in subjects {
            set_if_present(subject, "name", json!(format!("{}-sa", params.pod_name)));
            set_if_present(subject, "namespace", json!(params.namespace));
        }
    }
}

/// Render one stored template into a manifest.
pub fn render_manifest(template_data: &str, params: &TemplateParams) -> StoreResult<Value> {
    let substituted = substitute_placeholders(template_data, params);
    let mut manifest: Value = serde_yaml::from_str(&substituted)
        .map_err(|e| StoreError::invalid(format!("malformed terminal template: {e}")))?;
    let kind = manifest
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match kind.as_str() {
        "Pod" => adjust_pod(&mut manifest, params),
        "ServiceAccount" => adjust_service_account(&mut manifest, params),
        "ClusterRoleBinding" | "RoleBinding" => adjust_role_binding(&mut manifest, params),
        _ => {}
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const POD: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  name: placeholder
  labels:
    user: "${user_id}"
spec:
  serviceAccountName: placeholder
  nodeSelector:
    kubernetes.io/hostname: old-node
  containers:
    - name: shell
      image: placeholder
"#;

    fn params(node_name: &str) -> TemplateParams {
        TemplateParams {
            cluster_id: 1,
            user_id: 42,
            random_id: "ab12cd".into(),
            pod_name: pod_name(1, 42, "ab12cd"),
            namespace: "terminal-ns".into(),
            node_name: node_name.into(),
            base_image: "busybox:1.36".into(),
            taints: vec![NodeTaint {
                key: "dedicated".into(),
                effect: "NoSchedule".into(),
            }],
        }
    }

    #[test]
    fn pod_is_pinned_to_node_with_tolerations() {
        let manifest = render_manifest(POD, &params("worker-3")).unwrap();
        assert_eq!(manifest["metadata"]["name"], "terminal-access-1-42-ab12cd");
        assert_eq!(manifest["metadata"]["labels"]["user"], "42");
        assert_eq!(manifest["spec"]["serviceAccountName"], "terminal-access-1-42-ab12cd-sa");
        assert_eq!(manifest["spec"]["nodeName"], "worker-3");
        assert!(manifest["spec"].get("nodeSelector").is_none());
        assert_eq!(manifest["spec"]["containers"][0]["image"], "busybox:1.36");
        assert_eq!(
            manifest["spec"]["tolerations"],
            json!([{"key": "dedicated", "operator": "Exists", "effect": "NoSchedule"}])
        );
    }

    #[test]
    fn auto_select_leaves_scheduling_open() {
        let manifest = render_manifest(POD, &params(AUTO_SELECT_NODE)).unwrap();
        assert!(manifest["spec"].get("nodeName").is_none());
        assert_eq!(manifest["spec"]["tolerations"], json!([]));
    }

    #[test]
    fn service_account_and_binding_follow_pod_name() {
        let sa = "kind: ServiceAccount\nmetadata:\n  name: x\n  namespace: default\n";
        let manifest = render_manifest(sa, &params("n")).unwrap();
        assert_eq!(manifest["metadata"]["name"], "terminal-access-1-42-ab12cd-sa");
        assert_eq!(manifest["metadata"]["namespace"], "terminal-ns");

        let crb = "kind: ClusterRoleBinding\nmetadata:\n  name: x\nsubjects:\n  - kind: ServiceAccount\n    name: x\n    namespace: default\n";
        let manifest = render_manifest(crb, &params("n")).unwrap();
        assert_eq!(manifest["metadata"]["name"], "terminal-access-1-42-ab12cd-crb");
        assert_eq!(manifest["subjects"][0]["name"], "terminal-access-1-42-ab12cd-sa");
        assert_eq!(manifest["subjects"][0]["namespace"], "terminal-ns");
    }

    #[test]
    fn other_kinds_only_get_placeholders() {
        let role = "kind: Role\nmetadata:\n  name: role-${cluster_id}-${user_id}\n";
        let manifest = render_manifest(role, &params("n")).unwrap();
        assert_eq!(manifest["metadata"]["name"], "role-1-42");
    }

    #[test]
    fn malformed_template_is_invalid() {
        assert!(matches!(
            render_manifest("kind: [Pod", &params("n")),
            Err(StoreError::Invalid(_))
        ));
    }

    proptest! {
        #[test]
        fn pod_names_are_dns_safe(cluster in 0i64..10_000, user in 0i64..10_000) {
            let name = pod_name(cluster, user, &random_id());
            let prefix = format!("terminal-access-{cluster}-{user}-");
            prop_assert!(name.starts_with(&prefix));
            let suffix = &name[prefix.len()..];
            prop_assert_eq!(suffix.len(), RANDOM_ID_LEN);
            prop_assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }
}
