//! Terminal session rows and manifest templates.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::{StoreError, StoreResult};
use crate::models::terminal::{
    NewTerminalAccessSession, NewTerminalAccessTemplate, TerminalAccessSession,
    TerminalAccessTemplate, TerminalStatus,
};
use crate::schema::{terminal_access_templates, user_terminal_access_data as utad};

const LIVE: [&str; 2] = ["Starting", "Running"];

pub async fn save_session(
    conn: &mut AsyncPgConnection,
    new: NewTerminalAccessSession,
) -> StoreResult<TerminalAccessSession> {
    TerminalStatus::parse(&new.status)?;
    let saved = diesel::insert_into(utad::table)
        .values(&new)
        .returning(TerminalAccessSession::as_returning())
        .get_result(conn)
        .await?;
    Ok(saved)
}

pub async fn find_session(
    conn: &mut AsyncPgConnection,
    id: i64,
) -> StoreResult<TerminalAccessSession> {
    utad::table
        .find(id)
        .select(TerminalAccessSession::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("terminal session {id}")))
}

/// Conditional status move; `None` when the row no longer holds `from`.
pub async fn update_status(
    conn: &mut AsyncPgConnection,
    id: i64,
    from: TerminalStatus,
    to: TerminalStatus,
    actor: i64,
) -> StoreResult<Option<TerminalAccessSession>> {
    let updated = diesel::update(utad::table.find(id).filter(utad::status.eq(from.as_str())))
        .set((
            utad::status.eq(to.as_str()),
            utad::updated_on.eq(chrono::Utc::now()),
            utad::updated_by.eq(actor),
        ))
        .returning(TerminalAccessSession::as_returning())
        .get_result(conn)
        .await
        .optional()?;
    Ok(updated)
}

pub async fn update_node(
    conn: &mut AsyncPgConnection,
    id: i64,
    node_name: &str,
    actor: i64,
) -> StoreResult<()> {
    diesel::update(utad::table.find(id))
        .set((
            utad::node_name.eq(node_name),
            utad::updated_on.eq(chrono::Utc::now()),
            utad::updated_by.eq(actor),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Starting and Running sessions of one user.
pub async fn find_live_for_user(
    conn: &mut AsyncPgConnection,
    user_id: i64,
) -> StoreResult<Vec<TerminalAccessSession>> {
    let rows = utad::table
        .filter(utad::user_id.eq(user_id))
        .filter(utad::status.eq_any(LIVE))
        .order(utad::id)
        .select(TerminalAccessSession::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

/// Every Starting or Running session.
pub async fn find_all_live(
    conn: &mut AsyncPgConnection,
) -> StoreResult<Vec<TerminalAccessSession>> {
    let rows = utad::table
        .filter(utad::status.eq_any(LIVE))
        .order(utad::id)
        .select(TerminalAccessSession::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

pub async fn save_template(
    conn: &mut AsyncPgConnection,
    new: NewTerminalAccessTemplate,
) -> StoreResult<TerminalAccessTemplate> {
    let saved = diesel::insert_into(terminal_access_templates::table)
        .values(&new)
        .returning(TerminalAccessTemplate::as_returning())
        .get_result(conn)
        .await?;
    tracing::info!(template = %saved.template_name, "Terminal template saved");
    Ok(saved)
}

pub async fn find_all_templates(
    conn: &mut AsyncPgConnection,
) -> StoreResult<Vec<TerminalAccessTemplate>> {
    let rows = terminal_access_templates::table
        .order(terminal_access_templates::id)
        .select(TerminalAccessTemplate::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

pub async fn find_template_by_name(
    conn: &mut AsyncPgConnection,
    template_name: &str,
) -> StoreResult<TerminalAccessTemplate> {
    terminal_access_templates::table
        .filter(terminal_access_templates::template_name.eq(template_name))
        .select(TerminalAccessTemplate::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("terminal template {template_name}")))
}
