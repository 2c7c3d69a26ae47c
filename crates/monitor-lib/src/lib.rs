//! Anomaly monitoring engine
//!
//! This crate provides the core functionality for:
//! - Periodic anomaly scans over an activity metrics source
//! - Rule-based detectors with a mutable threshold registry
//! - An in-memory alert store with acknowledge/resolve lifecycle
//! - Alert notification (structured log, Alertmanager-style webhook)
//! - Health checks and observability

pub mod alert;
pub mod detector;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod notify;
pub mod observability;
pub mod source;
pub mod thresholds;

pub use alert::{
    Alert, AlertFilter, AlertStats, AlertStatus, AlertStore, Category, DetectorType, Finding,
    Severity, TrendPeriod, TrendPoint,
};
pub use detector::Baselines;
pub use engine::{
    AnomalyEngine, AnomalyEngineBuilder, DetectorFailure, EngineConfig, EngineStats, ScanOutcome,
    ScanReport, TriggerOutcome,
};
pub use error::{AlertError, MetricsError, NotifyError, ThresholdError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use notify::{FanoutNotifier, LogNotifier, Notifier, WebhookNotifier};
pub use observability::{EngineMetrics, StructuredLogger};
pub use source::{CgroupMemoryReader, InMemoryMetricsSource, MetricsSource};
pub use thresholds::{ThresholdCategory, ThresholdRegistry, Thresholds};
