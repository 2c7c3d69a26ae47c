//! CLI command implementations

pub mod alerts;
pub mod thresholds;
