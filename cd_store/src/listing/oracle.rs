//! Availability oracle: may this artifact be deployed at this stage?
//!
//! All admission paths fold into one EXISTS statement so the decision is a
//! single snapshot read. Triggers call it inside their own transaction.

use diesel::sql_types::Bool;
use diesel::QueryableByName;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::StoreResult;
use crate::listing::filter::ParentStageType;
use crate::metrics;
use crate::models::artifact::DataSource;
use crate::models::promotion::PromotionStatus;
use crate::models::workflow::{WorkflowType, HEALTHY_RUNNER_STATUSES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    pub pipeline_id: i64,
    pub parent_pipeline_id: i64,
    pub artifact_id: i64,
    pub parent_stage: ParentStageType,
    pub plugin_stage: Option<DataSource>,
    pub deploy_stage: WorkflowType,
}

#[derive(QueryableByName)]
struct Availability {
    #[diesel(sql_type = Bool)]
    available: bool,
}

fn runner_exists(pipeline_id: i64, stage: WorkflowType, healthy_only: bool) -> String {
    let status = if healthy_only {
        let healthy = HEALTHY_RUNNER_STATUSES
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(",");
        format!(" AND wfr.status IN ({healthy})")
    } else {
        String::new()
    };
    format!(
        "EXISTS (SELECT 1 FROM cd_workflow_runner wfr \
         INNER JOIN cd_workflow cdw ON cdw.id = wfr.cd_workflow_id \
         WHERE cdw.ci_artifact_id = cia.id AND cdw.pipeline_id = {pipeline_id} \
         AND wfr.workflow_type = '{}'{status})",
        stage.as_str()
    )
}

/// The artifact is admitted when any branch holds:
///
/// - it ran healthily at the parent stage (or was built by the parent CI or
///   webhook pipeline);
/// - it already has a run at `deploy_stage` of this pipeline;
/// - it was produced by the parent's plugin stage;
/// - it was promoted to this pipeline.
///
/// The first two are separate alternatives, not one conjunction.
pub(crate) fn build_availability_query(query: &AvailabilityQuery) -> String {
    let parent = query.parent_pipeline_id;
    let mut branches = Vec::with_capacity(4);

    // healthy at the parent
    branches.push(match query.parent_stage.cd_stage() {
        Some(stage) => runner_exists(parent, stage, true),
        None if query.parent_stage == ParentStageType::Webhook => {
            format!("cia.external_ci_pipeline_id = {parent}")
        }
        None => format!("cia.pipeline_id = {parent}"),
    });
    // already present at the deploy stage of this pipeline
    branches.push(runner_exists(query.pipeline_id, query.deploy_stage, false));
    if let Some(stage) = query.plugin_stage {
        branches.push(format!(
            "(cia.component_id = {parent} AND cia.data_source = '{}')",
            stage.as_str()
        ));
    }
    branches.push(format!(
        "EXISTS (SELECT 1 FROM artifact_promotion_approval_request apar \
         WHERE apar.artifact_id = cia.id AND apar.destination_pipeline_id = {} \
         AND apar.status = '{}')",
        query.pipeline_id,
        PromotionStatus::Promoted.as_str()
    ));

    format!(
        "SELECT EXISTS (SELECT 1 FROM ci_artifact cia WHERE cia.id = {} AND ({})) AS available",
        query.artifact_id,
        branches.join(" OR ")
    )
}

pub async fn is_artifact_available_for_deployment(
    conn: &mut AsyncPgConnection,
    query: &AvailabilityQuery,
) -> StoreResult<bool> {
    let sql = build_availability_query(query);
    let row: Availability = db::logged("artifact_availability", &sql, async {
        Ok(diesel::sql_query(sql.as_str()).get_result::<Availability>(conn).await?)
    })
    .await?;

    metrics::oracle_decision(row.available);
    if !row.available {
        tracing::warn!(
            pipeline_id = query.pipeline_id,
            artifact_id = query.artifact_id,
            parent = query.parent_pipeline_id,
            "Artifact not available for deployment"
        );
    }
    Ok(row.available)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin_query() -> AvailabilityQuery {
        AvailabilityQuery {
            pipeline_id: 10,
            parent_pipeline_id: 5,
            artifact_id: 102,
            parent_stage: ParentStageType::Deploy,
            plugin_stage: Some(DataSource::PostCi),
            deploy_stage: WorkflowType::Deploy,
        }
    }

    #[test]
    fn folds_every_branch_into_one_statement() {
        let sql = build_availability_query(&plugin_query());
        assert!(sql.starts_with("SELECT EXISTS (SELECT 1 FROM ci_artifact cia WHERE cia.id = 102"));
        assert!(sql.contains("cdw.pipeline_id = 5 AND wfr.workflow_type = 'DEPLOY' AND wfr.status IN ('Healthy','Succeeded')"));
        assert!(sql.contains("cdw.pipeline_id = 10 AND wfr.workflow_type = 'DEPLOY')"));
        assert!(sql.contains("(cia.component_id = 5 AND cia.data_source = 'post_ci')"));
        assert!(sql.contains("apar.destination_pipeline_id = 10 AND apar.status = 'PROMOTED'"));
        assert_eq!(sql.matches(" OR ").count(), 3);
    }

    #[test]
    fn parent_health_and_deploy_presence_are_alternatives() {
        let mut query = plugin_query();
        query.plugin_stage = None;
        let sql = build_availability_query(&query);
        assert!(sql.contains(
            "wfr.status IN ('Healthy','Succeeded')) OR EXISTS (SELECT 1 FROM cd_workflow_runner wfr"
        ));
        assert!(!sql.contains("'Succeeded')) AND "));
    }

    #[test]
    fn ci_parent_checks_origin_instead_of_runners() {
        let mut query = plugin_query();
        query.parent_stage = ParentStageType::Ci;
        query.plugin_stage = None;
        let sql = build_availability_query(&query);
        assert!(sql.contains("(cia.pipeline_id = 5 OR EXISTS"));
        assert!(!sql.contains("component_id"));
    }

    #[test]
    fn webhook_parent_checks_external_origin() {
        let mut query = plugin_query();
        query.parent_stage = ParentStageType::Webhook;
        let sql = build_availability_query(&query);
        assert!(sql.contains("cia.external_ci_pipeline_id = 5"));
    }
}
