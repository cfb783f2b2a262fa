//! user_terminal_access_data and terminal_access_templates.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::schema::{terminal_access_templates, user_terminal_access_data};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalStatus {
    Starting,
    Running,
    Terminated,
    Error,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Starting => "Starting",
            TerminalStatus::Running => "Running",
            TerminalStatus::Terminated => "Terminated",
            TerminalStatus::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "Starting" => Ok(TerminalStatus::Starting),
            "Running" => Ok(TerminalStatus::Running),
            "Terminated" => Ok(TerminalStatus::Terminated),
            "Error" => Ok(TerminalStatus::Error),
            other => Err(StoreError::invalid(format!("unknown terminal status {other:?}"))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TerminalStatus::Terminated | TerminalStatus::Error)
    }

    pub fn can_transition_to(self, next: TerminalStatus) -> bool {
        use TerminalStatus::*;
        matches!(
            (self, next),
            (Starting, Running) | (Starting, Terminated) | (Starting, Error) | (Running, Terminated) | (Running, Error)
        )
    }

    /// Map a Kubernetes pod phase onto a session status.
    pub fn from_pod_phase(phase: &str) -> Self {
        match phase {
            "Running" => TerminalStatus::Running,
            "Pending" => TerminalStatus::Starting,
            "Succeeded" => TerminalStatus::Terminated,
            _ => TerminalStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = user_terminal_access_data)]
pub struct TerminalAccessSession {
    pub id: i64,
    pub user_id: i64,
    pub cluster_id: i64,
    pub node_name: String,
    pub namespace: String,
    pub pod_name: String,
    pub status: String,
    pub metadata: String,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_terminal_access_data)]
pub struct NewTerminalAccessSession {
    pub user_id: i64,
    pub cluster_id: i64,
    pub node_name: String,
    pub namespace: String,
    pub pod_name: String,
    pub status: String,
    pub metadata: String,
    pub created_by: i64,
    pub updated_by: i64,
}

/// Session metadata persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSessionMetadata {
    pub base_image: String,
    pub shell_name: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = terminal_access_templates)]
pub struct TerminalAccessTemplate {
    pub id: i64,
    pub template_name: String,
    pub template_data: String,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = terminal_access_templates)]
pub struct NewTerminalAccessTemplate {
    pub template_name: String,
    pub template_data: String,
    pub created_by: i64,
    pub updated_by: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use TerminalStatus::*;

    #[test]
    fn session_lifecycle() {
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Terminated));
        assert!(Running.can_transition_to(Error));
        assert!(!Terminated.can_transition_to(Running));
        assert!(!Error.can_transition_to(Starting));
    }

    #[test]
    fn pod_phases() {
        assert_eq!(TerminalStatus::from_pod_phase("Running"), Running);
        assert_eq!(TerminalStatus::from_pod_phase("Pending"), Starting);
        assert_eq!(TerminalStatus::from_pod_phase("Succeeded"), Terminated);
        assert_eq!(TerminalStatus::from_pod_phase("Failed"), Error);
    }

    #[test]
    fn metadata_uses_camel_case() {
        let meta = TerminalSessionMetadata {
            base_image: "busybox".into(),
            shell_name: "sh".into(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["baseImage"], "busybox");
        assert_eq!(json["shellName"], "sh");
    }
}
