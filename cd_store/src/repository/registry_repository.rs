//! Container registries with a single default.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::error::{StoreError, StoreResult};
use crate::models::registry::{DockerArtifactStore, NewDockerArtifactStore};
use crate::schema::docker_artifact_store;

async fn clear_default(conn: &mut AsyncPgConnection, actor: i64) -> StoreResult<()> {
    diesel::update(docker_artifact_store::table.filter(docker_artifact_store::is_default.eq(true)))
        .set((
            docker_artifact_store::is_default.eq(false),
            docker_artifact_store::updated_on.eq(chrono::Utc::now()),
            docker_artifact_store::updated_by.eq(actor),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Save a registry. With `is_default` the previous default is cleared in
/// the same transaction.
pub async fn save(
    conn: &mut AsyncPgConnection,
    new: NewDockerArtifactStore,
) -> StoreResult<DockerArtifactStore> {
    let saved = conn
        .transaction::<_, StoreError, _>(|conn| {
            async move {
                if new.is_default {
                    clear_default(conn, new.created_by).await?;
                }
                let saved = diesel::insert_into(docker_artifact_store::table)
                    .values(&new)
                    .returning(DockerArtifactStore::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(saved)
            }
            .scope_boxed()
        })
        .await?;
    tracing::info!(registry = %saved.id, is_default = saved.is_default, "Registry saved");
    Ok(saved)
}

pub async fn set_default(
    conn: &mut AsyncPgConnection,
    id: &str,
    actor: i64,
) -> StoreResult<DockerArtifactStore> {
    let id = id.to_string();
    conn.transaction::<_, StoreError, _>(|conn| {
        async move {
            let target = find_by_id(conn, &id).await?;
            if !target.active {
                return Err(StoreError::invalid(format!(
                    "registry {id} is inactive and cannot be the default"
                )));
            }
            clear_default(conn, actor).await?;
            let updated = diesel::update(docker_artifact_store::table.find(&id))
                .set((
                    docker_artifact_store::is_default.eq(true),
                    docker_artifact_store::updated_on.eq(chrono::Utc::now()),
                    docker_artifact_store::updated_by.eq(actor),
                ))
                .returning(DockerArtifactStore::as_returning())
                .get_result(conn)
                .await?;
            Ok(updated)
        }
        .scope_boxed()
    })
    .await
}

pub async fn find_by_id(conn: &mut AsyncPgConnection, id: &str) -> StoreResult<DockerArtifactStore> {
    docker_artifact_store::table
        .find(id)
        .select(DockerArtifactStore::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("registry {id}")))
}

pub async fn find_default(conn: &mut AsyncPgConnection) -> StoreResult<Option<DockerArtifactStore>> {
    let found = docker_artifact_store::table
        .filter(docker_artifact_store::is_default.eq(true))
        .filter(docker_artifact_store::active.eq(true))
        .select(DockerArtifactStore::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// Soft-delete a registry. The default registry cannot be deleted.
pub async fn delete(conn: &mut AsyncPgConnection, id: &str, actor: i64) -> StoreResult<()> {
    let target = find_by_id(conn, id).await?;
    if target.is_default {
        return Err(StoreError::invalid(format!(
            "registry {id} is the default and cannot be deleted"
        )));
    }
    diesel::update(docker_artifact_store::table.find(id))
        .set((
            docker_artifact_store::active.eq(false),
            docker_artifact_store::updated_on.eq(chrono::Utc::now()),
            docker_artifact_store::updated_by.eq(actor),
        ))
        .execute(conn)
        .await?;
    tracing::info!(registry = %id, "Registry deleted");
    Ok(())
}
