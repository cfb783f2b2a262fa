//! Schema migration for the CD persistence layer.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

use crate::error::StoreResult;

/// Idempotent DDL for every table the store reads or writes.
///
/// Partial unique indexes carry the single-holder invariants:
/// one `latest` chart per app, one `latest` env override per chart and
/// environment, one default strategy per pipeline, one default registry,
/// one awaiting promotion per artifact and destination.
pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- Topology (read by listings and the override ledger)
-- ================================================================

CREATE TABLE IF NOT EXISTS team (
    id              BIGSERIAL PRIMARY KEY,
    name            VARCHAR(250) NOT NULL UNIQUE,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS app (
    id              BIGSERIAL PRIMARY KEY,
    app_name        VARCHAR(250) NOT NULL,
    team_id         BIGINT NOT NULL REFERENCES team(id),
    app_type        INTEGER NOT NULL DEFAULT 0,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS cluster (
    id              BIGSERIAL PRIMARY KEY,
    cluster_name    VARCHAR(250) NOT NULL UNIQUE,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS environment (
    id               BIGSERIAL PRIMARY KEY,
    environment_name VARCHAR(250) NOT NULL UNIQUE,
    cluster_id       BIGINT NOT NULL REFERENCES cluster(id),
    namespace        VARCHAR(250) NOT NULL DEFAULT '',
    "default"        BOOLEAN NOT NULL DEFAULT FALSE,
    active           BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS app_status (
    app_id          BIGINT NOT NULL,
    env_id          BIGINT NOT NULL,
    status          VARCHAR(50) NOT NULL,
    PRIMARY KEY (app_id, env_id)
);

CREATE TABLE IF NOT EXISTS pipeline (
    id                  BIGSERIAL PRIMARY KEY,
    app_id              BIGINT NOT NULL,
    environment_id      BIGINT NOT NULL,
    ci_pipeline_id      BIGINT,
    name                VARCHAR(250) NOT NULL,
    deployment_app_type VARCHAR(50) NOT NULL DEFAULT 'helm',
    deleted             BOOLEAN NOT NULL DEFAULT FALSE,
    created_on          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by          BIGINT NOT NULL,
    updated_on          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by          BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pipeline_app_env ON pipeline (app_id, environment_id);

-- ================================================================
-- Artifact store
-- ================================================================

CREATE TABLE IF NOT EXISTS ci_artifact (
    id                       BIGSERIAL PRIMARY KEY,
    pipeline_id              BIGINT,
    image                    TEXT NOT NULL CHECK (image <> ''),
    image_digest             TEXT NOT NULL CHECK (image_digest <> ''),
    material_info            TEXT,
    data_source              VARCHAR(50) NOT NULL
        CHECK (data_source IN ('CI-RUNNER', 'EXTERNAL', 'post_ci', 'pre_cd', 'post_cd', 'GOCD', 'ext')),
    ci_workflow_id           BIGINT,
    parent_ci_artifact       BIGINT NOT NULL DEFAULT 0,
    scan_enabled             BOOLEAN NOT NULL DEFAULT FALSE,
    scanned                  BOOLEAN NOT NULL DEFAULT FALSE,
    external_ci_pipeline_id  BIGINT,
    is_artifact_uploaded     BOOLEAN NOT NULL DEFAULT FALSE,
    credentials_source_type  VARCHAR(50),
    credentials_source_value TEXT,
    component_id             BIGINT,
    created_on               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by               BIGINT NOT NULL,
    updated_on               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by               BIGINT NOT NULL,
    CONSTRAINT ci_artifact_single_origin
        CHECK (num_nonnulls(pipeline_id, external_ci_pipeline_id, component_id) = 1)
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_ci_artifact_workflow_output
    ON ci_artifact (image, image_digest, pipeline_id, ci_workflow_id);
CREATE INDEX IF NOT EXISTS idx_ci_artifact_pipeline ON ci_artifact (pipeline_id);
CREATE INDEX IF NOT EXISTS idx_ci_artifact_external ON ci_artifact (external_ci_pipeline_id);
CREATE INDEX IF NOT EXISTS idx_ci_artifact_component ON ci_artifact (component_id, data_source);
CREATE INDEX IF NOT EXISTS idx_ci_artifact_digest ON ci_artifact (image_digest);
CREATE INDEX IF NOT EXISTS idx_ci_artifact_parent ON ci_artifact (parent_ci_artifact);

-- ================================================================
-- Chart config ledger
-- ================================================================

CREATE TABLE IF NOT EXISTS charts (
    id                        BIGSERIAL PRIMARY KEY,
    app_id                    BIGINT NOT NULL,
    chart_ref_id              BIGINT NOT NULL,
    chart_name                VARCHAR(250) NOT NULL DEFAULT '',
    chart_version             VARCHAR(250) NOT NULL DEFAULT '',
    values_yaml               TEXT NOT NULL DEFAULT '{}',
    global_override           TEXT NOT NULL DEFAULT '{}',
    release_override          TEXT NOT NULL DEFAULT '{}',
    pipeline_override         TEXT NOT NULL DEFAULT '{}',
    image_descriptor_template TEXT NOT NULL DEFAULT '',
    status                    VARCHAR(20) NOT NULL DEFAULT 'NEW',
    active                    BOOLEAN NOT NULL DEFAULT TRUE,
    latest                    BOOLEAN NOT NULL DEFAULT FALSE,
    previous                  BOOLEAN NOT NULL DEFAULT FALSE,
    git_repo_url              VARCHAR(250) NOT NULL DEFAULT '',
    chart_location            VARCHAR(250) NOT NULL DEFAULT '',
    created_on                TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by                BIGINT NOT NULL,
    updated_on                TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by                BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_charts_latest ON charts (app_id) WHERE latest;
CREATE UNIQUE INDEX IF NOT EXISTS uq_charts_previous ON charts (app_id) WHERE previous;

CREATE TABLE IF NOT EXISTS chart_env_config_override (
    id                 BIGSERIAL PRIMARY KEY,
    chart_id           BIGINT NOT NULL REFERENCES charts(id),
    target_environment BIGINT NOT NULL,
    env_override_yaml  TEXT NOT NULL DEFAULT '{}',
    status             VARCHAR(20) NOT NULL DEFAULT 'NEW',
    reviewed           BOOLEAN NOT NULL DEFAULT FALSE,
    active             BOOLEAN NOT NULL DEFAULT TRUE,
    namespace          VARCHAR(250) NOT NULL DEFAULT '',
    latest             BOOLEAN NOT NULL DEFAULT FALSE,
    previous           BOOLEAN NOT NULL DEFAULT FALSE,
    is_override        BOOLEAN NOT NULL DEFAULT FALSE,
    created_on         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by         BIGINT NOT NULL,
    updated_on         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by         BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_env_override_latest
    ON chart_env_config_override (chart_id, target_environment) WHERE latest;
CREATE INDEX IF NOT EXISTS idx_env_override_env ON chart_env_config_override (target_environment);

CREATE TABLE IF NOT EXISTS pipeline_strategy (
    id          BIGSERIAL PRIMARY KEY,
    pipeline_id BIGINT NOT NULL REFERENCES pipeline(id),
    strategy    VARCHAR(50) NOT NULL,
    config      TEXT NOT NULL DEFAULT '',
    "default"   BOOLEAN NOT NULL DEFAULT FALSE,
    deleted     BOOLEAN NOT NULL DEFAULT FALSE,
    created_on  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by  BIGINT NOT NULL,
    updated_on  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by  BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_pipeline_strategy_default
    ON pipeline_strategy (pipeline_id) WHERE "default" AND NOT deleted;

-- ================================================================
-- Deployment override ledger and workflow runners
-- ================================================================

CREATE TABLE IF NOT EXISTS cd_workflow (
    id              BIGSERIAL PRIMARY KEY,
    pipeline_id     BIGINT NOT NULL,
    ci_artifact_id  BIGINT NOT NULL REFERENCES ci_artifact(id),
    workflow_status VARCHAR(50),
    created_on      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by      BIGINT NOT NULL,
    updated_on      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by      BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cd_workflow_pipeline_artifact ON cd_workflow (pipeline_id, ci_artifact_id);

CREATE TABLE IF NOT EXISTS cd_workflow_runner (
    id             BIGSERIAL PRIMARY KEY,
    name           VARCHAR(250) NOT NULL DEFAULT '',
    workflow_type  VARCHAR(20) NOT NULL,
    status         VARCHAR(50) NOT NULL,
    cd_workflow_id BIGINT NOT NULL REFERENCES cd_workflow(id),
    started_on     TIMESTAMPTZ,
    finished_on    TIMESTAMPTZ,
    triggered_by   BIGINT NOT NULL,
    created_on     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by     BIGINT NOT NULL,
    updated_on     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by     BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cd_workflow_runner_workflow ON cd_workflow_runner (cd_workflow_id, workflow_type);

CREATE TABLE IF NOT EXISTS pipeline_config_override (
    id                       BIGSERIAL PRIMARY KEY,
    request_identifier       VARCHAR(64) NOT NULL UNIQUE,
    env_config_override_id   BIGINT NOT NULL REFERENCES chart_env_config_override(id),
    pipeline_override_yaml   TEXT NOT NULL DEFAULT '{}',
    merged_values_yaml       TEXT NOT NULL DEFAULT '{}',
    status                   VARCHAR(20) NOT NULL DEFAULT 'NEW',
    git_hash                 VARCHAR(64),
    commit_time              TIMESTAMPTZ,
    pipeline_id              BIGINT NOT NULL REFERENCES pipeline(id),
    ci_artifact_id           BIGINT NOT NULL REFERENCES ci_artifact(id),
    pipeline_release_counter INTEGER NOT NULL CHECK (pipeline_release_counter > 0),
    cd_workflow_id           BIGINT,
    deployment_type          VARCHAR(20) NOT NULL DEFAULT 'DEPLOY',
    created_on               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by               BIGINT NOT NULL,
    updated_on               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by               BIGINT NOT NULL,
    CONSTRAINT uq_pco_pipeline_release UNIQUE (pipeline_id, pipeline_release_counter)
);

CREATE INDEX IF NOT EXISTS idx_pco_pipeline_artifact ON pipeline_config_override (pipeline_id, ci_artifact_id);
CREATE INDEX IF NOT EXISTS idx_pco_env_override ON pipeline_config_override (env_config_override_id);

-- ================================================================
-- Approvals and promotion
-- ================================================================

CREATE TABLE IF NOT EXISTS deployment_approval_request (
    id                            BIGSERIAL PRIMARY KEY,
    pipeline_id                   BIGINT NOT NULL,
    ci_artifact_id                BIGINT NOT NULL REFERENCES ci_artifact(id),
    active                        BOOLEAN NOT NULL DEFAULT TRUE,
    artifact_deployment_triggered BOOLEAN NOT NULL DEFAULT FALSE,
    created_on                    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by                    BIGINT NOT NULL,
    updated_on                    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by                    BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dar_pipeline_artifact ON deployment_approval_request (pipeline_id, ci_artifact_id);

CREATE TABLE IF NOT EXISTS deployment_approval_user_data (
    id                  BIGSERIAL PRIMARY KEY,
    approval_request_id BIGINT NOT NULL REFERENCES deployment_approval_request(id),
    user_id             BIGINT NOT NULL,
    user_response       INTEGER,
    comments            TEXT,
    created_on          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by          BIGINT NOT NULL,
    updated_on          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by          BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_daud_request ON deployment_approval_user_data (approval_request_id);

CREATE TABLE IF NOT EXISTS artifact_promotion_approval_request (
    id                         BIGSERIAL PRIMARY KEY,
    policy_id                  BIGINT,
    policy_evaluation_audit_id BIGINT,
    artifact_id                BIGINT NOT NULL REFERENCES ci_artifact(id),
    source_type                VARCHAR(20) NOT NULL,
    source_pipeline_id         BIGINT NOT NULL,
    destination_pipeline_id    BIGINT NOT NULL,
    status                     VARCHAR(30) NOT NULL,
    created_on                 TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by                 BIGINT NOT NULL,
    updated_on                 TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by                 BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_promotion_awaiting
    ON artifact_promotion_approval_request (artifact_id, destination_pipeline_id)
    WHERE status = 'AWAITING_APPROVAL';
CREATE INDEX IF NOT EXISTS idx_promotion_destination
    ON artifact_promotion_approval_request (destination_pipeline_id, status);

-- ================================================================
-- Notification settings
-- ================================================================

CREATE TABLE IF NOT EXISTS notification_rule (
    id             BIGSERIAL PRIMARY KEY,
    condition_type INTEGER NOT NULL DEFAULT 0,
    expression     TEXT NOT NULL DEFAULT '',
    created_on     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by     BIGINT NOT NULL,
    updated_on     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by     BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS notification_settings (
    id                   BIGSERIAL PRIMARY KEY,
    team_id              BIGINT,
    app_id               BIGINT,
    env_id               BIGINT,
    pipeline_id          BIGINT,
    pipeline_type        VARCHAR(10) NOT NULL,
    event_type_id        INTEGER NOT NULL,
    config               TEXT NOT NULL DEFAULT '{}',
    view_id              BIGINT,
    notification_rule_id BIGINT REFERENCES notification_rule(id),
    created_on           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by           BIGINT NOT NULL,
    updated_on           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by           BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notification_settings_event
    ON notification_settings (pipeline_type, event_type_id);

-- ================================================================
-- Terminal access and registries
-- ================================================================

CREATE TABLE IF NOT EXISTS user_terminal_access_data (
    id         BIGSERIAL PRIMARY KEY,
    user_id    BIGINT NOT NULL,
    cluster_id BIGINT NOT NULL,
    node_name  VARCHAR(250) NOT NULL DEFAULT '',
    namespace  VARCHAR(250) NOT NULL DEFAULT '',
    pod_name   VARCHAR(250) NOT NULL,
    status     VARCHAR(20) NOT NULL,
    metadata   TEXT NOT NULL DEFAULT '{}',
    created_on TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by BIGINT NOT NULL,
    updated_on TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_terminal_user_status ON user_terminal_access_data (user_id, status);

CREATE TABLE IF NOT EXISTS terminal_access_templates (
    id            BIGSERIAL PRIMARY KEY,
    template_name VARCHAR(250) NOT NULL UNIQUE,
    template_data TEXT NOT NULL,
    created_on    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by    BIGINT NOT NULL,
    updated_on    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by    BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS docker_artifact_store (
    id            VARCHAR(250) PRIMARY KEY,
    plugin_id     VARCHAR(250) NOT NULL,
    registry_url  VARCHAR(250) NOT NULL,
    registry_type VARCHAR(50) NOT NULL,
    is_default    BOOLEAN NOT NULL DEFAULT FALSE,
    active        BOOLEAN NOT NULL DEFAULT TRUE,
    created_on    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by    BIGINT NOT NULL,
    updated_on    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by    BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_docker_artifact_store_default
    ON docker_artifact_store (is_default) WHERE is_default AND active;
"#;

/// Run the migration on a live connection.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> StoreResult<()> {
    conn.batch_execute(MIGRATION_SQL).await?;
    tracing::info!("CD store schema is up to date");
    Ok(())
}
