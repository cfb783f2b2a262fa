//! Promotion request ledger.
//!
//! AWAITING_APPROVAL -> APPROVED -> PROMOTED, or AWAITING_APPROVAL ->
//! CANCELLED | STALE. Every status change is a conditional update on the
//! expected prior status.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::error::{StoreError, StoreResult};
use crate::metrics;
use crate::models::promotion::{NewPromotionRequest, PromotionRequest, PromotionStatus};
use crate::schema::{artifact_promotion_approval_request as apar, pipeline};

/// Open a request. A second AWAITING request for the same artifact and
/// destination is a Conflict.
pub async fn create(
    conn: &mut AsyncPgConnection,
    new: NewPromotionRequest,
) -> StoreResult<PromotionRequest> {
    let awaiting = PromotionStatus::AwaitingApproval.as_str();
    if new.status != awaiting {
        return Err(StoreError::invalid(format!(
            "promotion requests start as {awaiting}, got {}",
            new.status
        )));
    }
    let saved = diesel::insert_into(apar::table)
        .values(&new)
        .returning(PromotionRequest::as_returning())
        .get_result(conn)
        .await?;
    tracing::info!(
        request_id = saved.id,
        artifact_id = saved.artifact_id,
        destination = saved.destination_pipeline_id,
        "Promotion request created"
    );
    metrics::promotion_status_changed(awaiting, 1);
    Ok(saved)
}

pub async fn find_by_id(conn: &mut AsyncPgConnection, id: i64) -> StoreResult<PromotionRequest> {
    apar::table
        .find(id)
        .select(PromotionRequest::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("promotion request {id}")))
}

async fn move_status(
    conn: &mut AsyncPgConnection,
    id: i64,
    from: PromotionStatus,
    to: PromotionStatus,
    actor: i64,
) -> StoreResult<PromotionRequest> {
    debug_assert!(from.can_transition_to(to));
    let updated = diesel::update(apar::table.find(id).filter(apar::status.eq(from.as_str())))
        .set((
            apar::status.eq(to.as_str()),
            apar::updated_on.eq(chrono::Utc::now()),
            apar::updated_by.eq(actor),
        ))
        .returning(PromotionRequest::as_returning())
        .get_result(conn)
        .await
        .optional()?;

    match updated {
        Some(row) => {
            metrics::promotion_status_changed(to.as_str(), 1);
            Ok(row)
        }
        None => {
            let current = find_by_id(conn, id).await?;
            Err(StoreError::invalid(format!(
                "promotion request {id} is {}, expected {}",
                current.status,
                from.as_str()
            )))
        }
    }
}

/// Record the approval decision for an AWAITING request.
pub async fn approve(
    conn: &mut AsyncPgConnection,
    id: i64,
    actor: i64,
) -> StoreResult<PromotionRequest> {
    let approved = move_status(
        conn,
        id,
        PromotionStatus::AwaitingApproval,
        PromotionStatus::Approved,
        actor,
    )
    .await?;
    tracing::info!(request_id = id, actor, "Promotion request approved");
    Ok(approved)
}

/// Move APPROVED requests to PROMOTED. Rows in other states are left alone.
///
/// Every destination pipeline must still exist, otherwise nothing moves.
pub async fn mark_promoted(
    conn: &mut AsyncPgConnection,
    ids: &[i64],
    actor: i64,
) -> StoreResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let requested = ids.len();
    let ids = ids.to_vec();
    let moved = conn
        .transaction::<_, StoreError, _>(|conn| {
            async move {
                let missing: Vec<i64> = apar::table
                    .left_join(
                        pipeline::table.on(pipeline::id
                            .eq(apar::destination_pipeline_id)
                            .and(pipeline::deleted.eq(false))),
                    )
                    .filter(apar::id.eq_any(&ids))
                    .filter(apar::status.eq(PromotionStatus::Approved.as_str()))
                    .filter(pipeline::id.nullable().is_null())
                    .select(apar::id)
                    .load(conn)
                    .await?;
                if !missing.is_empty() {
                    return Err(StoreError::invalid(format!(
                        "promotion requests {missing:?} target a missing pipeline"
                    )));
                }

                let moved = diesel::update(
                    apar::table
                        .filter(apar::id.eq_any(&ids))
                        .filter(apar::status.eq(PromotionStatus::Approved.as_str())),
                )
                .set((
                    apar::status.eq(PromotionStatus::Promoted.as_str()),
                    apar::updated_on.eq(chrono::Utc::now()),
                    apar::updated_by.eq(actor),
                ))
                .execute(conn)
                .await?;
                Ok(moved)
            }
            .scope_boxed()
        })
        .await?;

    tracing::info!(requested, promoted = moved, "Promotion requests promoted");
    metrics::promotion_status_changed(PromotionStatus::Promoted.as_str(), moved);
    Ok(moved)
}

/// Cancel an AWAITING request. Only its creator may cancel; returns the
/// number of rows that moved, 0 when the caller is not the creator or the
/// request already left AWAITING.
pub async fn cancel(conn: &mut AsyncPgConnection, id: i64, user_id: i64) -> StoreResult<usize> {
    let moved = diesel::update(
        apar::table
            .find(id)
            .filter(apar::created_by.eq(user_id))
            .filter(apar::status.eq(PromotionStatus::AwaitingApproval.as_str())),
    )
    .set((
        apar::status.eq(PromotionStatus::Cancelled.as_str()),
        apar::updated_on.eq(chrono::Utc::now()),
        apar::updated_by.eq(user_id),
    ))
    .execute(conn)
    .await?;
    if moved > 0 {
        tracing::info!(request_id = id, user_id, "Promotion request cancelled");
        metrics::promotion_status_changed(PromotionStatus::Cancelled.as_str(), moved);
    }
    Ok(moved)
}

/// Invalidate every AWAITING request into a destination pipeline.
pub async fn mark_stale_by_destination(
    conn: &mut AsyncPgConnection,
    destination_pipeline_id: i64,
    actor: i64,
) -> StoreResult<usize> {
    let moved = diesel::update(
        apar::table
            .filter(apar::destination_pipeline_id.eq(destination_pipeline_id))
            .filter(apar::status.eq(PromotionStatus::AwaitingApproval.as_str())),
    )
    .set((
        apar::status.eq(PromotionStatus::Stale.as_str()),
        apar::updated_on.eq(chrono::Utc::now()),
        apar::updated_by.eq(actor),
    ))
    .execute(conn)
    .await?;
    tracing::info!(destination_pipeline_id, stale = moved, "Pending promotions marked stale");
    metrics::promotion_status_changed(PromotionStatus::Stale.as_str(), moved);
    Ok(moved)
}

/// Invalidate every AWAITING request evaluated under a policy.
pub async fn mark_stale_by_policy(
    conn: &mut AsyncPgConnection,
    policy_id: i64,
    actor: i64,
) -> StoreResult<usize> {
    let moved = diesel::update(
        apar::table
            .filter(apar::policy_id.eq(policy_id))
            .filter(apar::status.eq(PromotionStatus::AwaitingApproval.as_str())),
    )
    .set((
        apar::status.eq(PromotionStatus::Stale.as_str()),
        apar::updated_on.eq(chrono::Utc::now()),
        apar::updated_by.eq(actor),
    ))
    .execute(conn)
    .await?;
    tracing::info!(policy_id, stale = moved, "Pending promotions marked stale");
    metrics::promotion_status_changed(PromotionStatus::Stale.as_str(), moved);
    Ok(moved)
}

pub async fn find_pending_by_destination(
    conn: &mut AsyncPgConnection,
    destination_pipeline_id: i64,
) -> StoreResult<Vec<PromotionRequest>> {
    find_pending_by_destinations(conn, &[destination_pipeline_id]).await
}

pub async fn find_pending_by_destinations(
    conn: &mut AsyncPgConnection,
    destination_pipeline_ids: &[i64],
) -> StoreResult<Vec<PromotionRequest>> {
    if destination_pipeline_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = apar::table
        .filter(apar::destination_pipeline_id.eq_any(destination_pipeline_ids))
        .filter(apar::status.eq(PromotionStatus::AwaitingApproval.as_str()))
        .order(apar::id.desc())
        .select(PromotionRequest::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

/// The AWAITING request for one artifact into one destination, if any.
pub async fn find_awaited(
    conn: &mut AsyncPgConnection,
    artifact_id: i64,
    destination_pipeline_id: i64,
) -> StoreResult<Option<PromotionRequest>> {
    let found = apar::table
        .filter(apar::artifact_id.eq(artifact_id))
        .filter(apar::destination_pipeline_id.eq(destination_pipeline_id))
        .filter(apar::status.eq(PromotionStatus::AwaitingApproval.as_str()))
        .select(PromotionRequest::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

/// The most recent PROMOTED request for an artifact into a destination.
pub async fn find_promoted(
    conn: &mut AsyncPgConnection,
    artifact_id: i64,
    destination_pipeline_id: i64,
) -> StoreResult<Option<PromotionRequest>> {
    let found = apar::table
        .filter(apar::artifact_id.eq(artifact_id))
        .filter(apar::destination_pipeline_id.eq(destination_pipeline_id))
        .filter(apar::status.eq(PromotionStatus::Promoted.as_str()))
        .order(apar::id.desc())
        .select(PromotionRequest::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(found)
}

pub async fn find_by_pipeline_and_artifacts(
    conn: &mut AsyncPgConnection,
    destination_pipeline_id: i64,
    artifact_ids: &[i64],
    status: PromotionStatus,
) -> StoreResult<Vec<PromotionRequest>> {
    if artifact_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = apar::table
        .filter(apar::destination_pipeline_id.eq(destination_pipeline_id))
        .filter(apar::artifact_id.eq_any(artifact_ids))
        .filter(apar::status.eq(status.as_str()))
        .order(apar::id.desc())
        .select(PromotionRequest::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}
