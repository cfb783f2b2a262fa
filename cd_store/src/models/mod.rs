//! Row types, one module per table family.

pub mod approval;
pub mod artifact;
pub mod chart;
pub mod notification;
pub mod pipeline;
pub mod pipeline_override;
pub mod promotion;
pub mod registry;
pub mod status;
pub mod strategy;
pub mod terminal;
pub mod workflow;
