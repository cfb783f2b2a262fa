//! Terminal session lifecycle.
//!
//! Live sessions are mirrored in memory so the per-user cap can be checked
//! without a round trip; the database row stays authoritative for status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::config::TerminalConfig;
use crate::db::DbPool;
use crate::error::{StoreError, StoreResult};
use crate::metrics;
use crate::models::terminal::{
    NewTerminalAccessSession, TerminalAccessSession, TerminalSessionMetadata, TerminalStatus,
};
use crate::repository::terminal_repository;
use crate::terminal::templates::{self, NodeTaint, TemplateParams};

/// Reads pod state from the cluster hosting a session.
#[async_trait]
pub trait PodStatusProvider: Send + Sync {
    /// Pod phase, or `None` when the pod does not exist.
    async fn pod_phase(
        &self,
        cluster_id: i64,
        namespace: &str,
        pod_name: &str,
    ) -> StoreResult<Option<String>>;

    /// Delete the pod. Deleting a missing pod succeeds.
    async fn delete_pod(&self, cluster_id: i64, namespace: &str, pod_name: &str)
        -> StoreResult<()>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: i64,
    pub cluster_id: i64,
    pub namespace: String,
    pub node_name: String,
    pub base_image: String,
    pub shell_name: String,
    #[serde(default)]
    pub taints: Vec<NodeTaint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedSession {
    pub session: TerminalAccessSession,
    /// Rendered manifests, one per stored template.
    pub manifests: Vec<Value>,
}

pub struct TerminalSessionManager {
    config: TerminalConfig,
    pool: DbPool,
    provider: Arc<dyn PodStatusProvider>,
    sessions: Mutex<HashMap<i64, TerminalAccessSession>>,
}

fn status_of(session: &TerminalAccessSession) -> StoreResult<TerminalStatus> {
    TerminalStatus::parse(&session.status)
}

fn is_live(session: &TerminalAccessSession) -> bool {
    status_of(session).is_ok_and(|s| !s.is_terminal())
}

impl TerminalSessionManager {
    pub fn new(config: TerminalConfig, pool: DbPool, provider: Arc<dyn PodStatusProvider>) -> Self {
        Self {
            config,
            pool,
            provider,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn tracked_sessions(&self) -> Vec<TerminalAccessSession> {
        let mut sessions: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    async fn publish_gauges(&self) {
        let sessions = self.sessions.lock().await;
        for status in [TerminalStatus::Starting, TerminalStatus::Running] {
            let count = sessions
                .values()
                .filter(|s| s.status == status.as_str())
                .count();
            metrics::terminal_sessions(status.as_str(), count);
        }
    }

    /// Record a new Starting session and render its manifests.
    pub async fn start_session(&self, request: StartSessionRequest) -> StoreResult<StartedSession> {
        // Held until the row is tracked so concurrent starts see each other.
        let mut sessions = self.sessions.lock().await;
        let live = sessions
            .values()
            .filter(|s| s.user_id == request.user_id && is_live(s))
            .count();
        if live >= self.config.max_session_per_user {
            tracing::warn!(user_id = request.user_id, live, "Terminal session cap reached");
            return Err(StoreError::invalid(format!(
                "cannot start new session more than configured {}",
                self.config.max_session_per_user
            )));
        }

        let random_id = templates::random_id();
        let params = TemplateParams {
            cluster_id: request.cluster_id,
            user_id: request.user_id,
            pod_name: templates::pod_name(request.cluster_id, request.user_id, &random_id),
            random_id,
            namespace: request.namespace.clone(),
            node_name: request.node_name.clone(),
            base_image: request.base_image.clone(),
            taints: request.taints.clone(),
        };
        let metadata = serde_json::to_string(&TerminalSessionMetadata {
            base_image: request.base_image.clone(),
            shell_name: request.shell_name.clone(),
        })?;

        let mut conn = self.pool.get().await?;
        let stored = terminal_repository::find_all_templates(&mut conn).await?;
        let manifests = stored
            .iter()
            .map(|t| templates::render_manifest(&t.template_data, &params))
            .collect::<StoreResult<Vec<_>>>()?;

        let session = terminal_repository::save_session(
            &mut conn,
            NewTerminalAccessSession {
                user_id: request.user_id,
                cluster_id: request.cluster_id,
                node_name: request.node_name,
                namespace: request.namespace,
                pod_name: params.pod_name,
                status: TerminalStatus::Starting.as_str().to_string(),
                metadata,
                created_by: request.user_id,
                updated_by: request.user_id,
            },
        )
        .await?;
        sessions.insert(session.id, session.clone());
        drop(sessions);

        tracing::info!(
            session_id = session.id,
            user_id = session.user_id,
            cluster_id = session.cluster_id,
            pod = %session.pod_name,
            "Terminal session started"
        );
        self.publish_gauges().await;
        Ok(StartedSession { session, manifests })
    }

    async fn load(&self, id: i64) -> StoreResult<TerminalAccessSession> {
        if let Some(session) = self.sessions.lock().await.get(&id) {
            return Ok(session.clone());
        }
        let mut conn = self.pool.get().await?;
        terminal_repository::find_session(&mut conn, id).await
    }

    async fn apply_status(
        &self,
        session: &TerminalAccessSession,
        next: TerminalStatus,
        actor: i64,
    ) -> StoreResult<TerminalAccessSession> {
        let from = status_of(session)?;
        if !from.can_transition_to(next) {
            return Err(StoreError::invalid(format!(
                "terminal session {} cannot move from {} to {}",
                session.id,
                from.as_str(),
                next.as_str()
            )));
        }
        let mut conn = self.pool.get().await?;
        let updated = terminal_repository::update_status(&mut conn, session.id, from, next, actor)
            .await?
            .ok_or_else(|| {
                StoreError::Conflict(format!("terminal session {} changed status", session.id))
            })?;

        let mut sessions = self.sessions.lock().await;
        if next.is_terminal() {
            sessions.remove(&updated.id);
        } else {
            sessions.insert(updated.id, updated.clone());
        }
        Ok(updated)
    }

    pub async fn update_session_status(
        &self,
        id: i64,
        next: TerminalStatus,
        actor: i64,
    ) -> StoreResult<TerminalAccessSession> {
        let session = self.load(id).await?;
        let updated = self.apply_status(&session, next, actor).await?;
        self.publish_gauges().await;
        Ok(updated)
    }

    /// Delete the pod and mark the session Terminated.
    pub async fn disconnect_session(&self, id: i64, actor: i64) -> StoreResult<TerminalAccessSession> {
        let session = self.load(id).await?;
        if status_of(&session)?.is_terminal() {
            return Err(StoreError::invalid("pod already terminated"));
        }
        self.provider
            .delete_pod(session.cluster_id, &session.namespace, &session.pod_name)
            .await?;
        let updated = self
            .apply_status(&session, TerminalStatus::Terminated, actor)
            .await?;
        tracing::info!(session_id = id, pod = %session.pod_name, "Terminal session disconnected");
        self.publish_gauges().await;
        Ok(updated)
    }

    /// Reload every Starting or Running session into memory.
    pub async fn sync_running_instances(&self) -> StoreResult<usize> {
        let mut conn = self.pool.get().await?;
        let live = terminal_repository::find_all_live(&mut conn).await?;
        let mut sessions = self.sessions.lock().await;
        for session in live {
            sessions.insert(session.id, session);
        }
        let size = sessions.len();
        drop(sessions);
        tracing::info!(size, "Running terminal sessions loaded");
        self.publish_gauges().await;
        Ok(size)
    }

    /// Reconcile tracked sessions with their pods. Returns how many moved.
    pub async fn sync_pod_status(&self) -> StoreResult<usize> {
        let snapshot = self.tracked_sessions().await;
        let mut moved = 0;
        for session in snapshot {
            let phase = match self
                .provider
                .pod_phase(session.cluster_id, &session.namespace, &session.pod_name)
                .await
            {
                Ok(phase) => phase,
                Err(e) => {
                    tracing::error!(session_id = session.id, "Pod status lookup failed: {e}");
                    continue;
                }
            };
            let observed = phase
                .as_deref()
                .map(TerminalStatus::from_pod_phase)
                .unwrap_or(TerminalStatus::Terminated);
            let current = match status_of(&session) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(session_id = session.id, "Unreadable session status: {e}");
                    continue;
                }
            };
            if observed == current || !current.can_transition_to(observed) {
                continue;
            }
            match self.apply_status(&session, observed, session.user_id).await {
                Ok(_) => moved += 1,
                Err(e) => tracing::error!(session_id = session.id, "Terminal status update failed: {e}"),
            }
        }

        self.sessions.lock().await.retain(|_, s| is_live(s));
        self.publish_gauges().await;
        Ok(moved)
    }

    /// Reconcile every `pod_status_sync_secs` until `shutdown` flips to true.
    pub async fn run_status_sync(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.pod_status_sync_secs);
        tracing::info!(period_secs = period.as_secs(), "Terminal status sync started");
        loop {
            if let Err(e) = self.sync_pod_status().await {
                tracing::error!("Terminal status sync error: {e}");
            }
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Terminal status sync stopped");
    }
}
