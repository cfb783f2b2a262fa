//! Pipeline strategies. At most one non-deleted default per pipeline.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::error::{StoreError, StoreResult};
use crate::models::strategy::{NewPipelineStrategy, PipelineStrategy};
use crate::schema::pipeline_strategy;

async fn clear_default(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
    actor: i64,
) -> StoreResult<()> {
    diesel::update(
        pipeline_strategy::table
            .filter(pipeline_strategy::pipeline_id.eq(pipeline_id))
            .filter(pipeline_strategy::is_default.eq(true)),
    )
    .set((
        pipeline_strategy::is_default.eq(false),
        pipeline_strategy::updated_on.eq(chrono::Utc::now()),
        pipeline_strategy::updated_by.eq(actor),
    ))
    .execute(conn)
    .await?;
    Ok(())
}

/// Save a strategy; a default one takes the flag from the previous default.
pub async fn save_strategy(
    conn: &mut AsyncPgConnection,
    new: NewPipelineStrategy,
) -> StoreResult<PipelineStrategy> {
    conn.transaction::<_, StoreError, _>(|conn| {
        async move {
            if new.is_default {
                clear_default(conn, new.pipeline_id, new.created_by).await?;
            }
            let saved = diesel::insert_into(pipeline_strategy::table)
                .values(&new)
                .returning(PipelineStrategy::as_returning())
                .get_result(conn)
                .await?;
            Ok(saved)
        }
        .scope_boxed()
    })
    .await
}

/// Make an existing strategy the pipeline default.
pub async fn set_default_strategy(
    conn: &mut AsyncPgConnection,
    strategy_id: i64,
    actor: i64,
) -> StoreResult<PipelineStrategy> {
    conn.transaction::<_, StoreError, _>(|conn| {
        async move {
            let target: PipelineStrategy = pipeline_strategy::table
                .find(strategy_id)
                .filter(pipeline_strategy::deleted.eq(false))
                .select(PipelineStrategy::as_select())
                .first(conn)
                .await
                .optional()?
                .ok_or_else(|| StoreError::not_found(format!("strategy {strategy_id}")))?;
            clear_default(conn, target.pipeline_id, actor).await?;
            let updated = diesel::update(pipeline_strategy::table.find(strategy_id))
                .set((
                    pipeline_strategy::is_default.eq(true),
                    pipeline_strategy::updated_on.eq(chrono::Utc::now()),
                    pipeline_strategy::updated_by.eq(actor),
                ))
                .returning(PipelineStrategy::as_returning())
                .get_result(conn)
                .await?;
            Ok(updated)
        }
        .scope_boxed()
    })
    .await
}

pub async fn find_default_strategy(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
) -> StoreResult<Option<PipelineStrategy>> {
    let found = pipeline_strategy::table
        .filter(pipeline_strategy::pipeline_id.eq(pipeline_id))
        .filter(pipeline_strategy::is_default.eq(true))
        .filter(pipeline_strategy::deleted.eq(false))
        .select(PipelineStrategy::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

pub async fn find_by_pipeline_and_strategy(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
    strategy: &str,
) -> StoreResult<Option<PipelineStrategy>> {
    let found = pipeline_strategy::table
        .filter(pipeline_strategy::pipeline_id.eq(pipeline_id))
        .filter(pipeline_strategy::strategy.eq(strategy))
        .filter(pipeline_strategy::deleted.eq(false))
        .select(PipelineStrategy::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// Soft-delete every strategy of a pipeline.
pub async fn delete_by_pipeline(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
    actor: i64,
) -> StoreResult<usize> {
    let updated = diesel::update(
        pipeline_strategy::table
            .filter(pipeline_strategy::pipeline_id.eq(pipeline_id))
            .filter(pipeline_strategy::deleted.eq(false)),
    )
    .set((
        pipeline_strategy::deleted.eq(true),
        pipeline_strategy::is_default.eq(false),
        pipeline_strategy::updated_on.eq(chrono::Utc::now()),
        pipeline_strategy::updated_by.eq(actor),
    ))
    .execute(conn)
    .await?;
    Ok(updated)
}
