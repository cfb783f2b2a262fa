//! Read-side listings: deployment candidates, rollback history, the
//! availability oracle and the app overview.

pub mod app_listing;
pub mod filter;
pub mod oracle;
pub mod query_builder;
pub mod service;
