//! Table-level data access. Every function takes the caller's connection,
//! which may be inside an open transaction.

pub mod artifact_repository;
pub mod chart_repository;
pub mod notification_repository;
pub mod pipeline_override_repository;
pub mod promotion_repository;
pub mod registry_repository;
pub mod strategy_repository;
pub mod terminal_repository;
