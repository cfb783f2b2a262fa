//! Persistence and query layer for the CD control plane.
//!
//! Repositories are free functions over an [`diesel_async::AsyncPgConnection`];
//! services and listings compose them under a [`context::RequestContext`].

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod listing;
pub mod metrics;
pub mod migration;
pub mod models;
pub mod repository;
pub mod schema;
pub mod services;
pub mod terminal;

pub use context::RequestContext;
pub use error::{StoreError, StoreResult};
