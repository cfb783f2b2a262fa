//! Status and deployment-type enums shared by charts, env overrides and the
//! deployment override ledger. Stored as upper-case strings.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleaseStatus {
    New,
    InProgress,
    Success,
    Error,
    Rollback,
    Unknown,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::New => "NEW",
            ReleaseStatus::InProgress => "IN_PROGRESS",
            ReleaseStatus::Success => "SUCCESS",
            ReleaseStatus::Error => "ERROR",
            ReleaseStatus::Rollback => "ROLLBACK",
            ReleaseStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "NEW" => Ok(ReleaseStatus::New),
            "IN_PROGRESS" => Ok(ReleaseStatus::InProgress),
            "SUCCESS" => Ok(ReleaseStatus::Success),
            "ERROR" => Ok(ReleaseStatus::Error),
            "ROLLBACK" => Ok(ReleaseStatus::Rollback),
            "UNKNOWN" => Ok(ReleaseStatus::Unknown),
            other => Err(StoreError::invalid(format!("unknown release status {other:?}"))),
        }
    }

    /// Deployment override transitions.
    ///
    /// NEW -> IN_PROGRESS -> SUCCESS | ERROR, SUCCESS -> ROLLBACK, and any
    /// status except UNKNOWN -> UNKNOWN as an operator correction.
    pub fn can_transition_to(self, next: ReleaseStatus) -> bool {
        use ReleaseStatus::*;
        matches!(
            (self, next),
            (New, InProgress)
                | (InProgress, Success)
                | (InProgress, Error)
                | (Success, Rollback)
                | (New | InProgress | Success | Error | Rollback, Unknown)
        )
    }

    /// Statuses that count as "currently deployed" for a pipeline.
    pub fn is_live(self) -> bool {
        matches!(self, ReleaseStatus::Success | ReleaseStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentType {
    Unknown,
    Deploy,
    Rollback,
    Stop,
    Start,
    Pre,
    Post,
}

impl DeploymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentType::Unknown => "UNKNOWN",
            DeploymentType::Deploy => "DEPLOY",
            DeploymentType::Rollback => "ROLLBACK",
            DeploymentType::Stop => "STOP",
            DeploymentType::Start => "START",
            DeploymentType::Pre => "PRE",
            DeploymentType::Post => "POST",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "UNKNOWN" => Ok(DeploymentType::Unknown),
            "DEPLOY" => Ok(DeploymentType::Deploy),
            "ROLLBACK" => Ok(DeploymentType::Rollback),
            "STOP" => Ok(DeploymentType::Stop),
            "START" => Ok(DeploymentType::Start),
            "PRE" => Ok(DeploymentType::Pre),
            "POST" => Ok(DeploymentType::Post),
            other => Err(StoreError::invalid(format!("unknown deployment type {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReleaseStatus::*;

    #[test]
    fn happy_path_transitions() {
        assert!(New.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Success));
        assert!(InProgress.can_transition_to(Error));
        assert!(Success.can_transition_to(Rollback));
    }

    #[test]
    fn skipping_or_reversing_is_refused() {
        assert!(!New.can_transition_to(Success));
        assert!(!Success.can_transition_to(InProgress));
        assert!(!Error.can_transition_to(Rollback));
        assert!(!Rollback.can_transition_to(Success));
        assert!(!Unknown.can_transition_to(Unknown));
    }

    #[test]
    fn operator_can_mark_unknown_from_anywhere_else() {
        for status in [New, InProgress, Success, Error, Rollback] {
            assert!(status.can_transition_to(Unknown), "{status:?}");
        }
    }

    #[test]
    fn live_statuses() {
        assert!(Success.is_live());
        assert!(InProgress.is_live());
        assert!(!New.is_live());
        assert!(!Rollback.is_live());
    }

    #[test]
    fn parse_rejects_unknown_values() {
        assert!(ReleaseStatus::parse("DONE").is_err());
        assert_eq!(DeploymentType::parse("STOP").unwrap(), DeploymentType::Stop);
        assert!(DeploymentType::parse("deploy").is_err());
    }
}
