//! Pod status through the `kubectl` binary.

use std::time::Duration;

use async_trait::async_trait;
use cd_store::terminal::service::PodStatusProvider;
use cd_store::{StoreError, StoreResult};
use tokio::process::Command;

const KUBECTL_TIMEOUT: Duration = Duration::from_secs(15);

pub struct KubectlPodStatus {
    binary: String,
    /// When set, cluster `N` is addressed as kube context `<prefix>N`.
    context_prefix: Option<String>,
}

impl KubectlPodStatus {
    pub fn new(binary: impl Into<String>, context_prefix: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            context_prefix,
        }
    }

    fn base_args(&self, cluster_id: i64, namespace: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(prefix) = &self.context_prefix {
            args.push("--context".to_string());
            args.push(format!("{prefix}{cluster_id}"));
        }
        args.push("-n".to_string());
        args.push(namespace.to_string());
        args
    }

    async fn run(&self, args: Vec<String>) -> StoreResult<std::process::Output> {
        let output = tokio::time::timeout(
            KUBECTL_TIMEOUT,
            Command::new(&self.binary).args(&args).output(),
        )
        .await
        .map_err(|_| StoreError::Transient(format!("{} timed out", self.binary)))?;
        output.map_err(|e| StoreError::Internal(format!("running {}: {e}", self.binary)))
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("not found")
}

#[async_trait]
impl PodStatusProvider for KubectlPodStatus {
    async fn pod_phase(
        &self,
        cluster_id: i64,
        namespace: &str,
        pod_name: &str,
    ) -> StoreResult<Option<String>> {
        let mut args = self.base_args(cluster_id, namespace);
        args.extend([
            "get".to_string(),
            "pod".to_string(),
            pod_name.to_string(),
            "-o".to_string(),
            "jsonpath={.status.phase}".to_string(),
        ]);
        let output = self.run(args).await?;
        if output.status.success() {
            let phase = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok(Some(phase).filter(|p| !p.is_empty()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            return Ok(None);
        }
        tracing::warn!(cluster_id, pod = pod_name, "kubectl get pod failed: {stderr}");
        Err(StoreError::Transient(format!("kubectl get pod {pod_name}: {}", stderr.trim())))
    }

    async fn delete_pod(&self, cluster_id: i64, namespace: &str, pod_name: &str) -> StoreResult<()> {
        let mut args = self.base_args(cluster_id, namespace);
        args.extend([
            "delete".to_string(),
            "pod".to_string(),
            pod_name.to_string(),
            "--ignore-not-found".to_string(),
        ]);
        let output = self.run(args).await?;
        if output.status.success() {
            tracing::info!(cluster_id, pod = pod_name, "Terminal pod deleted");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(StoreError::Internal(format!("kubectl delete pod {pod_name}: {}", stderr.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_prefix_selects_cluster() {
        let kubectl = KubectlPodStatus::new("kubectl", Some("cluster-".into()));
        assert_eq!(
            kubectl.base_args(4, "terminal"),
            vec!["--context", "cluster-4", "-n", "terminal"]
        );
        let kubectl = KubectlPodStatus::new("kubectl", None);
        assert_eq!(kubectl.base_args(4, "terminal"), vec!["-n", "terminal"]);
    }

    #[test]
    fn not_found_is_recognised() {
        assert!(is_not_found(
            "Error from server (NotFound): pods \"terminal-access-1-2-abc\" not found"
        ));
        assert!(!is_not_found("Unable to connect to the server: dial tcp"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let kubectl = KubectlPodStatus::new("/nonexistent/kubectl-binary", None);
        let err = kubectl.pod_phase(1, "ns", "pod").await.unwrap_err();
        assert!(matches!(err, StoreError::Internal(_)));
    }
}
