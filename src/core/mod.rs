//! Core functionality for the gateway.
//!
//! This module contains the mitigation pipeline: per-source feature
//! extraction, hybrid detection, the ban state machine with its durable
//! reputation ledger, windowed traffic metrics, and the origin client.

pub mod detector;
pub mod features;
pub mod metrics;
pub mod mitigation;
pub mod reputation;
pub mod upstream;

pub use detector::{Detector, Verdict};
pub use features::{FeatureTracker, FeatureVector};
pub use metrics::{MetricsSnapshot, TrafficMetrics};
pub use mitigation::{BanState, MitigationEngine, Signature};
pub use reputation::{ReputationEntry, ReputationStore};
pub use upstream::{BackendStatus, OriginClient, OriginResponse};
