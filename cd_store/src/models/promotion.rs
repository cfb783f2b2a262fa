//! artifact_promotion_approval_request — makes an artifact eligible on another pipeline.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::schema::artifact_promotion_approval_request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromotionStatus {
    AwaitingApproval,
    Approved,
    Promoted,
    Cancelled,
    /// Invalidated by a policy or pipeline change before a decision.
    Stale,
}

impl PromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionStatus::AwaitingApproval => "AWAITING_APPROVAL",
            PromotionStatus::Approved => "APPROVED",
            PromotionStatus::Promoted => "PROMOTED",
            PromotionStatus::Cancelled => "CANCELLED",
            PromotionStatus::Stale => "STALE",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "AWAITING_APPROVAL" => Ok(PromotionStatus::AwaitingApproval),
            "APPROVED" => Ok(PromotionStatus::Approved),
            "PROMOTED" => Ok(PromotionStatus::Promoted),
            "CANCELLED" => Ok(PromotionStatus::Cancelled),
            "STALE" => Ok(PromotionStatus::Stale),
            other => Err(StoreError::invalid(format!("unknown promotion status {other:?}"))),
        }
    }

    pub fn can_transition_to(self, next: PromotionStatus) -> bool {
        use PromotionStatus::*;
        matches!(
            (self, next),
            (AwaitingApproval, Approved)
                | (Approved, Promoted)
                | (AwaitingApproval, Cancelled)
                | (AwaitingApproval, Stale)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PromotionStatus::Promoted | PromotionStatus::Cancelled | PromotionStatus::Stale
        )
    }
}

/// Kind of pipeline the artifact is promoted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionSourceType {
    Ci,
    Webhook,
    Cd,
}

impl PromotionSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionSourceType::Ci => "CI",
            PromotionSourceType::Webhook => "WEBHOOK",
            PromotionSourceType::Cd => "CD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = artifact_promotion_approval_request)]
pub struct PromotionRequest {
    pub id: i64,
    pub policy_id: Option<i64>,
    pub policy_evaluation_audit_id: Option<i64>,
    pub artifact_id: i64,
    pub source_type: String,
    pub source_pipeline_id: i64,
    pub destination_pipeline_id: i64,
    pub status: String,
    pub created_on: DateTime<Utc>,
    pub created_by: i64,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = artifact_promotion_approval_request)]
pub struct NewPromotionRequest {
    pub policy_id: Option<i64>,
    pub policy_evaluation_audit_id: Option<i64>,
    pub artifact_id: i64,
    pub source_type: String,
    pub source_pipeline_id: i64,
    pub destination_pipeline_id: i64,
    pub status: String,
    pub created_by: i64,
    pub updated_by: i64,
}

impl NewPromotionRequest {
    pub fn awaiting(
        artifact_id: i64,
        source_type: PromotionSourceType,
        source_pipeline_id: i64,
        destination_pipeline_id: i64,
        policy_id: Option<i64>,
        actor: i64,
    ) -> Self {
        Self {
            policy_id,
            policy_evaluation_audit_id: None,
            artifact_id,
            source_type: source_type.as_str().to_string(),
            source_pipeline_id,
            destination_pipeline_id,
            status: PromotionStatus::AwaitingApproval.as_str().to_string(),
            created_by: actor,
            updated_by: actor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PromotionStatus::*;

    #[test]
    fn promotion_lifecycle() {
        assert!(AwaitingApproval.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Promoted));
        assert!(AwaitingApproval.can_transition_to(Cancelled));
        assert!(!AwaitingApproval.can_transition_to(Promoted));
        assert!(!Promoted.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Approved));
    }

    #[test]
    fn terminal_states() {
        assert!(Promoted.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(Stale.is_terminal());
        assert!(!Approved.is_terminal());
    }
}
