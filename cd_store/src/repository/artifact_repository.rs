//! Artifact store: append-only image records with provenance.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::error::{StoreError, StoreResult};
use crate::models::artifact::{CiArtifact, DataSource, NewCiArtifact};
use crate::schema::{cd_workflow, ci_artifact};

/// Reject a parent reference that is missing or is itself a copy.
async fn check_parent(conn: &mut AsyncPgConnection, parent_id: i64) -> StoreResult<()> {
    if parent_id == 0 {
        return Ok(());
    }
    let parent: Option<i64> = ci_artifact::table
        .find(parent_id)
        .select(ci_artifact::parent_ci_artifact)
        .first(conn)
        .await
        .optional()?;
    match parent {
        None => Err(StoreError::invalid(format!(
            "parent artifact {parent_id} does not exist"
        ))),
        Some(grandparent) if grandparent != 0 => Err(StoreError::invalid(format!(
            "parent artifact {parent_id} is itself a copy of {grandparent}"
        ))),
        Some(_) => Ok(()),
    }
}

/// Record one artifact.
pub async fn save(conn: &mut AsyncPgConnection, new: NewCiArtifact) -> StoreResult<CiArtifact> {
    new.validate()?;
    check_parent(conn, new.parent_ci_artifact).await?;

    let saved = diesel::insert_into(ci_artifact::table)
        .values(&new)
        .returning(CiArtifact::as_returning())
        .get_result(conn)
        .await?;

    tracing::info!(
        artifact_id = saved.id,
        image = %saved.image,
        data_source = %saved.data_source,
        "Artifact saved"
    );
    Ok(saved)
}

/// Record every artifact of one workflow, or none of them.
pub async fn save_all(
    conn: &mut AsyncPgConnection,
    batch: Vec<NewCiArtifact>,
) -> StoreResult<Vec<CiArtifact>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    for new in &batch {
        new.validate()?;
    }

    let saved = conn
        .transaction::<_, StoreError, _>(|conn| {
            async move {
                for new in &batch {
                    check_parent(conn, new.parent_ci_artifact).await?;
                }
                let rows = diesel::insert_into(ci_artifact::table)
                    .values(&batch)
                    .returning(CiArtifact::as_returning())
                    .get_results(conn)
                    .await?;
                Ok(rows)
            }
            .scope_boxed()
        })
        .await?;

    tracing::info!(count = saved.len(), "Artifact batch saved");
    Ok(saved)
}

/// Mark an artifact as scanned. Idempotent.
pub async fn update_scan(conn: &mut AsyncPgConnection, id: i64, actor: i64) -> StoreResult<()> {
    let updated = diesel::update(ci_artifact::table.find(id))
        .set((
            ci_artifact::scanned.eq(true),
            ci_artifact::updated_on.eq(chrono::Utc::now()),
            ci_artifact::updated_by.eq(actor),
        ))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Err(StoreError::not_found(format!("artifact {id}")));
    }
    Ok(())
}

/// Bump `updated_on` for a set of artifacts. An empty set touches nothing.
pub async fn touch_timestamp(
    conn: &mut AsyncPgConnection,
    ids: &[i64],
    actor: i64,
) -> StoreResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let updated = diesel::update(ci_artifact::table.filter(ci_artifact::id.eq_any(ids)))
        .set((
            ci_artifact::updated_on.eq(chrono::Utc::now()),
            ci_artifact::updated_by.eq(actor),
        ))
        .execute(conn)
        .await?;
    Ok(updated)
}

/// Bind per-artifact registry credentials.
pub async fn update_credentials(
    conn: &mut AsyncPgConnection,
    id: i64,
    source_type: &str,
    source_value: &str,
    actor: i64,
) -> StoreResult<()> {
    let updated = diesel::update(ci_artifact::table.find(id))
        .set((
            ci_artifact::credentials_source_type.eq(Some(source_type)),
            ci_artifact::credentials_source_value.eq(Some(source_value)),
            ci_artifact::updated_on.eq(chrono::Utc::now()),
            ci_artifact::updated_by.eq(actor),
        ))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Err(StoreError::not_found(format!("artifact {id}")));
    }
    Ok(())
}

/// Rewrite the deprecated `ext` marker to `EXTERNAL` for one row.
///
/// Returns whether the row changed; an already-migrated row is a no-op.
pub async fn migrate_legacy_datasource(
    conn: &mut AsyncPgConnection,
    id: i64,
    actor: i64,
) -> StoreResult<bool> {
    let updated = diesel::update(
        ci_artifact::table
            .find(id)
            .filter(ci_artifact::data_source.eq(DataSource::LegacyExt.as_str())),
    )
    .set((
        ci_artifact::data_source.eq(DataSource::External.as_str()),
        ci_artifact::updated_on.eq(chrono::Utc::now()),
        ci_artifact::updated_by.eq(actor),
    ))
    .execute(conn)
    .await?;

    if updated == 0 {
        // Distinguish "already migrated" from "no such artifact".
        get(conn, id).await?;
        return Ok(false);
    }
    tracing::info!(artifact_id = id, "Migrated legacy data source to EXTERNAL");
    Ok(true)
}

pub async fn get(conn: &mut AsyncPgConnection, id: i64) -> StoreResult<CiArtifact> {
    ci_artifact::table
        .find(id)
        .select(CiArtifact::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("artifact {id}")))
}

/// Latest artifact carrying `digest`.
pub async fn get_by_image_digest(
    conn: &mut AsyncPgConnection,
    digest: &str,
) -> StoreResult<Option<CiArtifact>> {
    let found = ci_artifact::table
        .filter(ci_artifact::image_digest.eq(digest))
        .order(ci_artifact::id.desc())
        .select(CiArtifact::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// Latest row for (image, digest, ci pipeline) so re-pushes collapse to one.
pub async fn get_by_image_and_digest_and_pipeline(
    conn: &mut AsyncPgConnection,
    image: &str,
    digest: &str,
    pipeline_id: i64,
) -> StoreResult<Option<CiArtifact>> {
    let found = ci_artifact::table
        .filter(ci_artifact::image.eq(image))
        .filter(ci_artifact::image_digest.eq(digest))
        .filter(ci_artifact::pipeline_id.eq(pipeline_id))
        .order(ci_artifact::id.desc())
        .select(CiArtifact::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// Artifacts by id, newest first. An empty id list runs no SQL.
pub async fn find_by_ids(
    conn: &mut AsyncPgConnection,
    ids: &[i64],
) -> StoreResult<Vec<CiArtifact>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = ci_artifact::table
        .filter(ci_artifact::id.eq_any(ids))
        .order(ci_artifact::id.desc())
        .select(CiArtifact::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

/// The artifact followed by its chain root, if it is a copy.
pub async fn find_parent_chain(
    conn: &mut AsyncPgConnection,
    id: i64,
) -> StoreResult<Vec<CiArtifact>> {
    let artifact = get(conn, id).await?;
    let parent_id = artifact.parent_ci_artifact;
    let mut chain = vec![artifact];
    if parent_id != 0 {
        chain.push(get(conn, parent_id).await?);
    }
    Ok(chain)
}

pub async fn find_by_parent_and_workflow(
    conn: &mut AsyncPgConnection,
    parent_id: i64,
    ci_workflow_id: i64,
) -> StoreResult<Vec<CiArtifact>> {
    let rows = ci_artifact::table
        .filter(ci_artifact::parent_ci_artifact.eq(parent_id))
        .filter(ci_artifact::ci_workflow_id.eq(ci_workflow_id))
        .order(ci_artifact::id.desc())
        .select(CiArtifact::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

/// Plugin-produced artifacts of one component.
pub async fn find_by_data_source_and_component(
    conn: &mut AsyncPgConnection,
    data_source: DataSource,
    component_id: i64,
) -> StoreResult<Vec<CiArtifact>> {
    let rows = ci_artifact::table
        .filter(ci_artifact::data_source.eq(data_source.as_str()))
        .filter(ci_artifact::component_id.eq(component_id))
        .order(ci_artifact::id.desc())
        .select(CiArtifact::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

pub async fn find_by_image_paths(
    conn: &mut AsyncPgConnection,
    images: &[String],
) -> StoreResult<Vec<CiArtifact>> {
    if images.is_empty() {
        return Ok(Vec::new());
    }
    let rows = ci_artifact::table
        .filter(ci_artifact::image.eq_any(images))
        .order(ci_artifact::id.desc())
        .select(CiArtifact::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

/// The artifact a CD workflow ran with.
pub async fn find_by_cd_workflow(
    conn: &mut AsyncPgConnection,
    cd_workflow_id: i64,
) -> StoreResult<CiArtifact> {
    cd_workflow::table
        .inner_join(ci_artifact::table)
        .filter(cd_workflow::id.eq(cd_workflow_id))
        .select(CiArtifact::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("artifact for cd workflow {cd_workflow_id}")))
}

/// Copy an artifact for promotion. The copy points at the chain root so
/// parents never chain beyond one hop.
pub async fn copy_for_promotion(
    conn: &mut AsyncPgConnection,
    src_id: i64,
    actor: i64,
) -> StoreResult<CiArtifact> {
    let src = get(conn, src_id).await?;
    let copy = NewCiArtifact {
        pipeline_id: src.pipeline_id,
        image: src.image.clone(),
        image_digest: src.image_digest.clone(),
        material_info: src.material_info.clone(),
        data_source: src.source()?.canonical().as_str().to_string(),
        ci_workflow_id: None,
        parent_ci_artifact: src.chain_root_id(),
        scan_enabled: src.scan_enabled,
        scanned: src.scanned,
        external_ci_pipeline_id: src.external_ci_pipeline_id,
        is_artifact_uploaded: src.is_artifact_uploaded,
        credentials_source_type: src.credentials_source_type.clone(),
        credentials_source_value: src.credentials_source_value.clone(),
        component_id: src.component_id,
        created_by: actor,
        updated_by: actor,
    };
    let saved = save(conn, copy).await?;
    tracing::info!(
        artifact_id = saved.id,
        parent = saved.parent_ci_artifact,
        source = src_id,
        "Artifact copied for promotion"
    );
    Ok(saved)
}

/// Administrative delete.
pub async fn delete(conn: &mut AsyncPgConnection, id: i64) -> StoreResult<()> {
    let deleted = diesel::delete(ci_artifact::table.find(id))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(StoreError::not_found(format!("artifact {id}")));
    }
    tracing::warn!(artifact_id = id, "Artifact deleted");
    Ok(())
}
