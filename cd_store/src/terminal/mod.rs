//! Cluster terminal access: manifest rendering and session lifecycle.

pub mod service;
pub mod templates;
