//! Anomaly monitor daemon: HTTP API and configuration

pub mod api;
pub mod config;
