//! Hand-composed listing SQL.
//!
//! Every builder returns a page statement and a count statement over the same
//! predicate. `$1` is always the image LIKE pattern; integer ids and limits
//! are rendered inline.

use crate::db::id_list;
use crate::error::{StoreError, StoreResult};
use crate::listing::filter::{ArtifactsListFilter, ParentStageType};
use crate::models::artifact::DataSource;
use crate::models::promotion::PromotionStatus;
use crate::models::workflow::{WorkflowType, HEALTHY_RUNNER_STATUSES};

/// A page statement (with a `total_count` window column) and its
/// unpaginated count.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingSql {
    pub page: String,
    pub count: String,
}

fn healthy_statuses() -> String {
    HEALTHY_RUNNER_STATUSES
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(",")
}

fn paging(filter: &ArtifactsListFilter) -> String {
    format!("LIMIT {} OFFSET {}", filter.limit, filter.offset)
}

/// Artifacts waiting on a deployment approval for the target pipeline.
fn pending_approval_artifacts(pipeline_id: i64) -> String {
    format!(
        "SELECT dar.ci_artifact_id FROM deployment_approval_request dar \
         WHERE dar.pipeline_id = {pipeline_id} AND dar.active = true \
         AND dar.artifact_deployment_triggered = false"
    )
}

/// Exclusions for non-approval listings: pending approvals when gated,
/// caller-supplied ids otherwise.
fn artifact_exclusions(filter: &ArtifactsListFilter) -> String {
    if filter.approval_gated() {
        format!(
            " AND cia.id NOT IN ({})",
            pending_approval_artifacts(filter.pipeline_id)
        )
    } else if !filter.exclude_artifact_ids.is_empty() {
        format!(
            " AND cia.id NOT IN ({})",
            id_list(&filter.exclude_artifact_ids)
        )
    } else {
        String::new()
    }
}

fn runner_exclusions(filter: &ArtifactsListFilter, column: &str) -> String {
    if filter.exclude_wfr_ids.is_empty() {
        String::new()
    } else {
        format!(
            " AND ({column} IS NULL OR {column} NOT IN ({}))",
            id_list(&filter.exclude_wfr_ids)
        )
    }
}

fn promoted_to(pipeline_id: i64) -> String {
    format!(
        "cia.id IN (SELECT apar.artifact_id FROM artifact_promotion_approval_request apar \
         WHERE apar.destination_pipeline_id = {pipeline_id} AND apar.status = '{}')",
        PromotionStatus::Promoted.as_str()
    )
}

/// Candidates for the first stage of a CD pipeline fed by a CI or webhook
/// pipeline.
pub fn parent_type_ci_or_webhook(filter: &ArtifactsListFilter) -> StoreResult<ListingSql> {
    let parent = filter.parent_id;
    let origin = match filter.parent_stage_type {
        ParentStageType::Ci => format!(
            "(cia.pipeline_id = {parent} OR (cia.component_id = {parent} AND cia.data_source = '{}'))",
            DataSource::PostCi.as_str()
        ),
        ParentStageType::Webhook => format!("cia.external_ci_pipeline_id = {parent}"),
        other => {
            return Err(StoreError::invalid(format!(
                "parent stage type must be CI or WEBHOOK, got {}",
                other.as_str()
            )))
        }
    };
    let predicate = format!(
        "({origin} OR {}) AND cia.image LIKE $1{}",
        promoted_to(filter.pipeline_id),
        artifact_exclusions(filter)
    );
    Ok(ListingSql {
        page: format!(
            "SELECT cia.*, COUNT(*) OVER() AS total_count FROM ci_artifact cia \
             WHERE {predicate} ORDER BY cia.id {} {}",
            filter.sort_by.direction(),
            paging(filter)
        ),
        count: format!("SELECT COUNT(*) AS total_count FROM ci_artifact cia WHERE {predicate}"),
    })
}

/// Runners that make an artifact a candidate for a later CD stage: a healthy
/// run of the parent stage, or any run of this stage on the target pipeline.
fn cd_stage_runner_predicate(filter: &ArtifactsListFilter, parent_stage: WorkflowType) -> String {
    format!(
        "((cdw.pipeline_id = {parent} AND wfr.workflow_type = '{parent_stage}' AND wfr.status IN ({healthy})) \
         OR (cdw.pipeline_id = {pipeline} AND wfr.workflow_type = '{stage}'))",
        parent = filter.parent_id,
        parent_stage = parent_stage.as_str(),
        healthy = healthy_statuses(),
        pipeline = filter.pipeline_id,
        stage = filter.stage_type.as_str(),
    )
}

fn require_cd_parent(filter: &ArtifactsListFilter) -> StoreResult<WorkflowType> {
    filter.parent_stage_type.cd_stage().ok_or_else(|| {
        StoreError::invalid(format!(
            "CD stage listing needs a PRE, DEPLOY or POST parent, got {}",
            filter.parent_stage_type.as_str()
        ))
    })
}

/// Candidates for a later CD stage, as artifact ids ordered by their most
/// recent runner. Rows are loaded by id afterwards.
pub fn artifacts_for_cd_stage_ids(filter: &ArtifactsListFilter) -> StoreResult<ListingSql> {
    let parent_stage = require_cd_parent(filter)?;
    let from = "FROM cd_workflow_runner wfr \
                INNER JOIN cd_workflow cdw ON cdw.id = wfr.cd_workflow_id \
                INNER JOIN ci_artifact cia ON cia.id = cdw.ci_artifact_id";
    let predicate = format!(
        "{} AND cia.image LIKE $1{}",
        cd_stage_runner_predicate(filter, parent_stage),
        artifact_exclusions(filter)
    );
    Ok(ListingSql {
        page: format!(
            "SELECT cdw.ci_artifact_id AS id, MAX(wfr.id) AS max_runner_id, COUNT(*) OVER() AS total_count \
             {from} WHERE {predicate} GROUP BY cdw.ci_artifact_id \
             ORDER BY max_runner_id {} {}",
            filter.sort_by.direction(),
            paging(filter)
        ),
        count: format!(
            "SELECT COUNT(DISTINCT cdw.ci_artifact_id) AS total_count {from} WHERE {predicate}"
        ),
    })
}

/// Candidates for a later CD stage as full rows, including artifacts
/// produced by the parent's plugin stage.
pub fn artifacts_for_cd_stage_rows(filter: &ArtifactsListFilter) -> StoreResult<ListingSql> {
    let parent_stage = require_cd_parent(filter)?;
    let via_runner = format!(
        "cia.id IN (SELECT cdw.ci_artifact_id FROM cd_workflow_runner wfr \
         INNER JOIN cd_workflow cdw ON cdw.id = wfr.cd_workflow_id WHERE {})",
        cd_stage_runner_predicate(filter, parent_stage)
    );
    let origin = match filter.plugin_stage {
        Some(stage) => format!(
            "({via_runner} OR (cia.component_id = {} AND cia.data_source = '{}'))",
            filter.parent_id,
            stage.as_str()
        ),
        None => via_runner,
    };
    let predicate = format!(
        "{origin} AND cia.image LIKE $1{}",
        artifact_exclusions(filter)
    );
    Ok(ListingSql {
        page: format!(
            "SELECT cia.*, COUNT(*) OVER() AS total_count FROM ci_artifact cia \
             WHERE {predicate} ORDER BY cia.id {} {}",
            filter.sort_by.direction(),
            paging(filter)
        ),
        count: format!("SELECT COUNT(*) AS total_count FROM ci_artifact cia WHERE {predicate}"),
    })
}

/// Every run of the target stage, newest runner first, with its artifact.
pub fn artifacts_for_rollback(filter: &ArtifactsListFilter) -> ListingSql {
    let from = "FROM cd_workflow_runner wfr \
                INNER JOIN cd_workflow cdw ON cdw.id = wfr.cd_workflow_id \
                INNER JOIN ci_artifact cia ON cia.id = cdw.ci_artifact_id";
    let predicate = format!(
        "cdw.pipeline_id = {} AND wfr.workflow_type = '{}' AND cia.image LIKE $1{}{}",
        filter.pipeline_id,
        filter.stage_type.as_str(),
        runner_exclusions(filter, "wfr.id"),
        artifact_exclusions(filter)
    );
    ListingSql {
        page: format!(
            "SELECT cia.*, wfr.id AS cd_workflow_runner_id, wfr.started_on AS runner_started_on, \
             wfr.triggered_by AS runner_triggered_by, COUNT(*) OVER() AS total_count \
             {from} WHERE {predicate} ORDER BY wfr.id {} {}",
            filter.sort_by.direction(),
            paging(filter)
        ),
        count: format!("SELECT COUNT(*) AS total_count {from} WHERE {predicate}"),
    }
}

/// Approval requests on the target pipeline with at least `approvers_count`
/// votes still counting towards approval.
fn approved_requests(filter: &ArtifactsListFilter, triggered: bool) -> String {
    format!(
        "WITH approved AS (\
         SELECT dar.id AS request_id, dar.ci_artifact_id, dar.created_on AS requested_on, \
         COUNT(daud.id) AS approval_count \
         FROM deployment_approval_request dar \
         INNER JOIN deployment_approval_user_data daud \
         ON daud.approval_request_id = dar.id AND daud.user_response IS NULL \
         WHERE dar.pipeline_id = {pipeline} AND dar.active = true \
         AND dar.artifact_deployment_triggered = {triggered} \
         GROUP BY dar.id, dar.ci_artifact_id, dar.created_on \
         HAVING COUNT(daud.id) >= {needed})",
        pipeline = filter.pipeline_id,
        needed = filter.approvers_count.max(1),
    )
}

/// Artifacts whose pending approval has collected enough votes.
pub fn approved_only_for_filter(filter: &ArtifactsListFilter) -> ListingSql {
    let with = approved_requests(filter, false);
    let from = "FROM ci_artifact cia \
                INNER JOIN (SELECT DISTINCT ci_artifact_id FROM approved) ok ON ok.ci_artifact_id = cia.id";
    let predicate = "cia.image LIKE $1";
    ListingSql {
        page: format!(
            "{with} SELECT cia.*, COUNT(*) OVER() AS total_count {from} \
             WHERE {predicate} ORDER BY cia.id {} {}",
            filter.sort_by.direction(),
            paging(filter)
        ),
        count: format!("{with} SELECT COUNT(*) AS total_count {from} WHERE {predicate}"),
    }
}

/// Approved requests whose deployment already ran, each with its latest
/// DEPLOY runner on the target pipeline, ordered by request time.
pub fn approved_artifacts_for_rollback(filter: &ArtifactsListFilter) -> ListingSql {
    let with = approved_requests(filter, true);
    let from = format!(
        "FROM approved \
         INNER JOIN ci_artifact cia ON cia.id = approved.ci_artifact_id \
         LEFT JOIN LATERAL (\
         SELECT wfr.id, wfr.started_on, wfr.triggered_by FROM cd_workflow_runner wfr \
         INNER JOIN cd_workflow cdw ON cdw.id = wfr.cd_workflow_id \
         WHERE cdw.pipeline_id = {} AND cdw.ci_artifact_id = cia.id AND wfr.workflow_type = '{}' \
         ORDER BY wfr.id DESC LIMIT 1) runner ON true",
        filter.pipeline_id,
        WorkflowType::Deploy.as_str()
    );
    let predicate = format!(
        "cia.image LIKE $1{}",
        runner_exclusions(filter, "runner.id")
    );
    ListingSql {
        page: format!(
            "{with} SELECT cia.*, runner.id AS cd_workflow_runner_id, \
             runner.started_on AS runner_started_on, runner.triggered_by AS runner_triggered_by, \
             COUNT(*) OVER() AS total_count {from} WHERE {predicate} \
             ORDER BY approved.requested_on {} {}",
            filter.sort_by.direction(),
            paging(filter)
        ),
        count: format!("{with} SELECT COUNT(*) AS total_count {from} WHERE {predicate}"),
    }
}

/// Deployment facts for a page of artifacts on one pipeline, in one pass.
/// `latest_id` is the greatest override id of the whole pipeline.
pub fn deployment_enrichment(pipeline_id: i64, artifact_ids: &[i64]) -> String {
    format!(
        "SELECT pco.ci_artifact_id, MAX(pco.created_on) AS deployed_time, MAX(pco.id) AS max_id, \
         (SELECT MAX(latest.id) FROM pipeline_config_override latest \
         WHERE latest.pipeline_id = {pipeline_id}) AS latest_id \
         FROM pipeline_config_override pco \
         WHERE pco.pipeline_id = {pipeline_id} AND pco.ci_artifact_id IN ({}) \
         GROUP BY pco.ci_artifact_id",
        id_list(artifact_ids)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::filter::SortBy;

    fn first_stage() -> ArtifactsListFilter {
        ArtifactsListFilter::new(10, 5, ParentStageType::Ci, WorkflowType::Deploy)
    }

    fn later_stage() -> ArtifactsListFilter {
        ArtifactsListFilter::new(10, 10, ParentStageType::Deploy, WorkflowType::Post)
    }

    #[test]
    fn ci_parent_matches_pipeline_and_post_ci_plugin() {
        let sql = parent_type_ci_or_webhook(&first_stage()).unwrap();
        assert!(sql.page.contains(
            "(cia.pipeline_id = 5 OR (cia.component_id = 5 AND cia.data_source = 'post_ci'))"
        ));
        assert!(sql.page.contains("apar.destination_pipeline_id = 10 AND apar.status = 'PROMOTED'"));
        assert!(sql.page.contains("COUNT(*) OVER() AS total_count"));
        assert!(sql.page.ends_with("ORDER BY cia.id DESC LIMIT 10 OFFSET 0"));
        assert!(!sql.count.contains("LIMIT"));
    }

    #[test]
    fn webhook_parent_uses_external_reference() {
        let mut filter = first_stage();
        filter.parent_stage_type = ParentStageType::Webhook;
        let sql = parent_type_ci_or_webhook(&filter).unwrap();
        assert!(sql.page.contains("cia.external_ci_pipeline_id = 5"));
    }

    #[test]
    fn first_stage_rejects_cd_parent() {
        let err = parent_type_ci_or_webhook(&later_stage()).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn exclusion_applies_only_without_gating() {
        let mut filter = first_stage();
        filter.exclude_artifact_ids = vec![100, 101];
        let sql = parent_type_ci_or_webhook(&filter).unwrap();
        assert!(sql.page.contains("cia.id NOT IN (100,101)"));

        filter.approvers_count = 1;
        let sql = parent_type_ci_or_webhook(&filter).unwrap();
        assert!(!sql.page.contains("NOT IN (100,101)"));
        assert!(sql.page.contains("dar.pipeline_id = 10 AND dar.active = true"));
        assert!(sql.count.contains("dar.artifact_deployment_triggered = false"));
    }

    #[test]
    fn oldest_first_flips_order() {
        let mut filter = first_stage();
        filter.sort_by = SortBy::Oldest;
        filter.limit = 0;
        filter.offset = 20;
        let sql = parent_type_ci_or_webhook(&filter).unwrap();
        assert!(sql.page.ends_with("ORDER BY cia.id ASC LIMIT 0 OFFSET 20"));
    }

    #[test]
    fn cd_stage_ids_order_by_latest_runner() {
        let sql = artifacts_for_cd_stage_ids(&later_stage()).unwrap();
        assert!(sql.page.contains(
            "(cdw.pipeline_id = 10 AND wfr.workflow_type = 'DEPLOY' AND wfr.status IN ('Healthy','Succeeded'))"
        ));
        assert!(sql.page.contains("OR (cdw.pipeline_id = 10 AND wfr.workflow_type = 'POST')"));
        assert!(sql.page.contains("GROUP BY cdw.ci_artifact_id ORDER BY max_runner_id DESC"));
        assert!(sql.count.starts_with("SELECT COUNT(DISTINCT cdw.ci_artifact_id)"));
    }

    #[test]
    fn cd_stage_rows_admit_plugin_artifacts() {
        let mut filter = later_stage();
        filter.plugin_stage = Some(DataSource::PostCd);
        let sql = artifacts_for_cd_stage_rows(&filter).unwrap();
        assert!(sql.page.contains("OR (cia.component_id = 10 AND cia.data_source = 'post_cd')"));
        assert!(sql.page.contains("ORDER BY cia.id DESC"));
    }

    #[test]
    fn cd_stage_rejects_ci_parent() {
        assert!(matches!(
            artifacts_for_cd_stage_ids(&first_stage()),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            artifacts_for_cd_stage_rows(&first_stage()),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn rollback_orders_by_runner_and_drops_excluded_runners() {
        let mut filter = first_stage();
        filter.exclude_wfr_ids = vec![44];
        let sql = artifacts_for_rollback(&filter);
        assert!(sql.page.contains("cdw.pipeline_id = 10 AND wfr.workflow_type = 'DEPLOY'"));
        assert!(sql.page.contains("(wfr.id IS NULL OR wfr.id NOT IN (44))"));
        assert!(sql.page.contains("ORDER BY wfr.id DESC"));
        assert!(!sql.page.contains("wfr.status IN"));
    }

    #[test]
    fn approval_listing_counts_pending_votes() {
        let mut filter = first_stage();
        filter.approvers_count = 2;
        let sql = approved_only_for_filter(&filter);
        assert!(sql.page.contains("daud.user_response IS NULL"));
        assert!(sql.page.contains("HAVING COUNT(daud.id) >= 2"));
        assert!(sql.page.contains("dar.artifact_deployment_triggered = false"));
        assert!(sql.count.starts_with("WITH approved AS ("));
    }

    #[test]
    fn approved_rollback_orders_by_request_time() {
        let mut filter = first_stage();
        filter.approvers_count = 1;
        let sql = approved_artifacts_for_rollback(&filter);
        assert!(sql.page.contains("dar.artifact_deployment_triggered = true"));
        assert!(sql.page.contains("LEFT JOIN LATERAL"));
        assert!(sql.page.contains("ORDER BY approved.requested_on DESC"));
    }

    #[test]
    fn enrichment_is_one_grouped_statement() {
        let sql = deployment_enrichment(10, &[102, 101, 100]);
        assert!(sql.contains("pco.ci_artifact_id IN (102,101,100)"));
        assert!(sql.contains("GROUP BY pco.ci_artifact_id"));
        assert_eq!(sql.matches("SELECT").count(), 2);
    }
}
