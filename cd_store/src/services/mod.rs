//! Services composing repositories into multi-step operations.

pub mod deployment_service;
pub mod material;
pub mod merge;
