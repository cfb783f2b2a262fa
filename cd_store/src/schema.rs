//! Diesel table definitions.
//!
//! Every entity table carries the audit columns created_on, created_by,
//! updated_on, updated_by.

diesel::table! {
    ci_artifact (id) {
        id -> Int8,
        pipeline_id -> Nullable<Int8>,
        image -> Text,
        image_digest -> Text,
        material_info -> Nullable<Text>,
        data_source -> Varchar,
        ci_workflow_id -> Nullable<Int8>,
        parent_ci_artifact -> Int8,
        scan_enabled -> Bool,
        scanned -> Bool,
        external_ci_pipeline_id -> Nullable<Int8>,
        is_artifact_uploaded -> Bool,
        credentials_source_type -> Nullable<Varchar>,
        credentials_source_value -> Nullable<Text>,
        component_id -> Nullable<Int8>,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    pipeline (id) {
        id -> Int8,
        app_id -> Int8,
        environment_id -> Int8,
        ci_pipeline_id -> Nullable<Int8>,
        name -> Varchar,
        deployment_app_type -> Varchar,
        deleted -> Bool,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    charts (id) {
        id -> Int8,
        app_id -> Int8,
        chart_ref_id -> Int8,
        chart_name -> Varchar,
        chart_version -> Varchar,
        values_yaml -> Text,
        global_override -> Text,
        release_override -> Text,
        pipeline_override -> Text,
        image_descriptor_template -> Text,
        status -> Varchar,
        active -> Bool,
        latest -> Bool,
        previous -> Bool,
        git_repo_url -> Varchar,
        chart_location -> Varchar,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    chart_env_config_override (id) {
        id -> Int8,
        chart_id -> Int8,
        target_environment -> Int8,
        env_override_yaml -> Text,
        status -> Varchar,
        reviewed -> Bool,
        active -> Bool,
        namespace -> Varchar,
        latest -> Bool,
        previous -> Bool,
        is_override -> Bool,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    pipeline_strategy (id) {
        id -> Int8,
        pipeline_id -> Int8,
        strategy -> Varchar,
        config -> Text,
        #[sql_name = "default"]
        is_default -> Bool,
        deleted -> Bool,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    pipeline_config_override (id) {
        id -> Int8,
        request_identifier -> Varchar,
        env_config_override_id -> Int8,
        pipeline_override_yaml -> Text,
        merged_values_yaml -> Text,
        status -> Varchar,
        git_hash -> Nullable<Varchar>,
        commit_time -> Nullable<Timestamptz>,
        pipeline_id -> Int8,
        ci_artifact_id -> Int8,
        pipeline_release_counter -> Int4,
        cd_workflow_id -> Nullable<Int8>,
        deployment_type -> Varchar,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    cd_workflow (id) {
        id -> Int8,
        pipeline_id -> Int8,
        ci_artifact_id -> Int8,
        workflow_status -> Nullable<Varchar>,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    cd_workflow_runner (id) {
        id -> Int8,
        name -> Varchar,
        workflow_type -> Varchar,
        status -> Varchar,
        cd_workflow_id -> Int8,
        started_on -> Nullable<Timestamptz>,
        finished_on -> Nullable<Timestamptz>,
        triggered_by -> Int8,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    deployment_approval_request (id) {
        id -> Int8,
        pipeline_id -> Int8,
        ci_artifact_id -> Int8,
        active -> Bool,
        artifact_deployment_triggered -> Bool,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    deployment_approval_user_data (id) {
        id -> Int8,
        approval_request_id -> Int8,
        user_id -> Int8,
        user_response -> Nullable<Int4>,
        comments -> Nullable<Text>,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    artifact_promotion_approval_request (id) {
        id -> Int8,
        policy_id -> Nullable<Int8>,
        policy_evaluation_audit_id -> Nullable<Int8>,
        artifact_id -> Int8,
        source_type -> Varchar,
        source_pipeline_id -> Int8,
        destination_pipeline_id -> Int8,
        status -> Varchar,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    notification_rule (id) {
        id -> Int8,
        condition_type -> Int4,
        expression -> Text,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    notification_settings (id) {
        id -> Int8,
        team_id -> Nullable<Int8>,
        app_id -> Nullable<Int8>,
        env_id -> Nullable<Int8>,
        pipeline_id -> Nullable<Int8>,
        pipeline_type -> Varchar,
        event_type_id -> Int4,
        config -> Text,
        view_id -> Nullable<Int8>,
        notification_rule_id -> Nullable<Int8>,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    user_terminal_access_data (id) {
        id -> Int8,
        user_id -> Int8,
        cluster_id -> Int8,
        node_name -> Varchar,
        namespace -> Varchar,
        pod_name -> Varchar,
        status -> Varchar,
        metadata -> Text,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    terminal_access_templates (id) {
        id -> Int8,
        template_name -> Varchar,
        template_data -> Text,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    docker_artifact_store (id) {
        id -> Varchar,
        plugin_id -> Varchar,
        registry_url -> Varchar,
        registry_type -> Varchar,
        is_default -> Bool,
        active -> Bool,
        created_on -> Timestamptz,
        created_by -> Int8,
        updated_on -> Timestamptz,
        updated_by -> Int8,
    }
}

diesel::table! {
    team (id) {
        id -> Int8,
        name -> Varchar,
        active -> Bool,
    }
}

diesel::table! {
    app (id) {
        id -> Int8,
        app_name -> Varchar,
        team_id -> Int8,
        app_type -> Int4,
        active -> Bool,
    }
}

diesel::table! {
    cluster (id) {
        id -> Int8,
        cluster_name -> Varchar,
        active -> Bool,
    }
}

diesel::table! {
    environment (id) {
        id -> Int8,
        environment_name -> Varchar,
        cluster_id -> Int8,
        namespace -> Varchar,
        #[sql_name = "default"]
        is_default -> Bool,
        active -> Bool,
    }
}

diesel::table! {
    app_status (app_id, env_id) {
        app_id -> Int8,
        env_id -> Int8,
        status -> Varchar,
    }
}

diesel::joinable!(pipeline_config_override -> pipeline (pipeline_id));
diesel::joinable!(pipeline_config_override -> ci_artifact (ci_artifact_id));
diesel::joinable!(pipeline_config_override -> chart_env_config_override (env_config_override_id));
diesel::joinable!(chart_env_config_override -> charts (chart_id));
diesel::joinable!(cd_workflow -> ci_artifact (ci_artifact_id));
diesel::joinable!(cd_workflow_runner -> cd_workflow (cd_workflow_id));
diesel::joinable!(deployment_approval_user_data -> deployment_approval_request (approval_request_id));
diesel::joinable!(notification_settings -> notification_rule (notification_rule_id));
diesel::joinable!(pipeline_strategy -> pipeline (pipeline_id));
diesel::joinable!(app -> team (team_id));
diesel::joinable!(environment -> cluster (cluster_id));

diesel::allow_tables_to_appear_in_same_query!(
    ci_artifact,
    pipeline,
    charts,
    chart_env_config_override,
    pipeline_strategy,
    pipeline_config_override,
    cd_workflow,
    cd_workflow_runner,
    deployment_approval_request,
    deployment_approval_user_data,
    artifact_promotion_approval_request,
    notification_rule,
    notification_settings,
    user_terminal_access_data,
    terminal_access_templates,
    docker_artifact_store,
    team,
    app,
    cluster,
    environment,
    app_status,
);
