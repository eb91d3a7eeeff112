//! Observability: broker health evaluation, container memory metrics and logging.

/// Liveness and readiness evaluation
pub mod health;

/// cgroup memory readers
pub mod cgroup;

/// Prometheus memory collector
pub mod metrics;

/// Structured logging setup
pub mod logging;

pub use cgroup::{MemoryMetrics, MemoryReader};
pub use health::{HealthEvaluator, HealthStatus, HealthVerdict, LivenessReport, ReadinessReport};
pub use logging::init_logging;
pub use metrics::MemoryCollector;
