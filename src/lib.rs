//! Kafka broker sidecar
//!
//! Runs next to a Kafka broker replica and answers orchestrator probes:
//! liveness and readiness derived from the cluster's own view of the broker,
//! container memory metrics for Prometheus, and build metadata.
//!
//! Broker identity and the bootstrap address list are discovered from the
//! platform-injected environment unless configured explicitly.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(unused_imports)]
#![warn(unused_variables)]
#![warn(dead_code)]

/// Build metadata for `/about`
pub mod about;
/// Administrative client sessions against the cluster
pub mod client;
/// Startup configuration
pub mod config;
/// Broker identity and peer-address discovery
pub mod discovery;
/// Error types and error handling utilities
pub mod error;
/// HTTP endpoints
pub mod http_server;
/// Cluster metadata and log-directory views
pub mod metadata;
/// Health evaluation, memory metrics and logging
pub mod observability;
/// Minimal Kafka wire protocol client
pub mod protocol;
/// SASL mechanisms
pub mod sasl;

pub use about::About;
pub use client::{AdminClient, AdminClientFactory, AdminSession, KafkaAdminFactory, SaslConfig};
pub use config::{ConfigArgs, SidecarConfig};
pub use error::{Error, Result};
pub use http_server::{AppState, SidecarServer};
pub use observability::{HealthEvaluator, HealthStatus, HealthVerdict, LivenessReport, ReadinessReport};

/// The current version of the sidecar, sourced from `Cargo.toml` at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
