//! Broker liveness and readiness evaluation.
//!
//! Every evaluation opens one admin session, runs its checks in a fixed order
//! against it and releases it. Readiness stops at the first failing check so the
//! reported message is always the most fundamental problem:
//!
//! 1. broker registered in cluster metadata
//! 2. controller elected
//! 3. no under-replicated partitions on this broker
//! 4. log directories healthy
//!
//! Liveness runs only the first check. A check whose cluster call fails (transport,
//! timeout, protocol) aborts the evaluation with that error's text.

use crate::client::{AdminClient, AdminClientFactory};
use crate::error::{Error, Result};
use crate::metadata::LogDirFindings;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Message when liveness cannot find the broker.
pub const MSG_BROKER_NOT_FOUND: &str = "broker not found in cluster metadata";
/// Message when readiness cannot find the broker.
pub const MSG_BROKER_NOT_REGISTERED: &str = "broker not registered in cluster metadata";
/// Message when the cluster has no active controller.
pub const MSG_NO_CONTROLLER: &str = "no controller elected";
/// Message when this broker lags on any partition it replicates.
pub const MSG_UNDER_REPLICATED: &str = "broker has under-replicated partitions";
/// Message when a log directory is in error or holds future replicas.
pub const MSG_LOG_DIRS_UNHEALTHY: &str = "log directories unhealthy";

/// Overall outcome of an evaluation.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every check passed
    Healthy,
    /// A check failed or could not run
    Unhealthy,
}

/// Healthy flag plus the reason when unhealthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthVerdict {
    /// Whether every check passed
    pub healthy: bool,
    /// Failure message, empty when healthy
    pub message: String,
}

impl HealthVerdict {
    fn from_error(err: Option<&str>) -> Self {
        match err {
            Some(message) => Self { healthy: false, message: message.to_string() },
            None => Self { healthy: true, message: String::new() },
        }
    }
}

/// Result of a liveness evaluation; serializes as the `/health/live` body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LivenessReport {
    /// Overall status
    pub status: HealthStatus,
    /// Evaluated broker
    pub broker_id: i32,
    /// Whether the broker is in cluster metadata
    pub broker_found: bool,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LivenessReport {
    fn new(broker_id: i32) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            broker_id,
            broker_found: false,
            error: None,
        }
    }

    /// Collapses the report into a verdict.
    pub fn verdict(&self) -> HealthVerdict {
        HealthVerdict::from_error(self.error.as_deref())
    }
}

/// Result of a readiness evaluation; serializes as the `/health/ready` body.
///
/// Fields for checks that never ran keep their zero values.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    /// Overall status
    pub status: HealthStatus,
    /// Evaluated broker
    pub broker_id: i32,
    /// Check 1
    pub broker_registered: bool,
    /// Check 2
    pub controller_elected: bool,
    /// Check 3, partitions where this broker is a replica but not in sync
    pub under_replicated_partitions: usize,
    /// Check 4
    pub log_dirs_healthy: bool,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReadinessReport {
    fn new(broker_id: i32) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            broker_id,
            broker_registered: false,
            controller_elected: false,
            under_replicated_partitions: 0,
            log_dirs_healthy: false,
            error: None,
        }
    }

    /// Collapses the report into a verdict.
    pub fn verdict(&self) -> HealthVerdict {
        HealthVerdict::from_error(self.error.as_deref())
    }
}

/// Evaluates one broker's health through short-lived admin sessions.
///
/// Holds no mutable state, so concurrent evaluations are independent.
#[derive(Clone)]
pub struct HealthEvaluator {
    broker_id: i32,
    factory: Arc<dyn AdminClientFactory>,
    check_timeout: Duration,
}

impl HealthEvaluator {
    /// Creates an evaluator for `broker_id`.
    pub fn new(broker_id: i32, factory: Arc<dyn AdminClientFactory>, check_timeout: Duration) -> Self {
        Self {
            broker_id,
            factory,
            check_timeout,
        }
    }

    /// The evaluated broker.
    pub fn broker_id(&self) -> i32 {
        self.broker_id
    }

    /// Per-check timeout.
    pub fn check_timeout(&self) -> Duration {
        self.check_timeout
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.check_timeout, fut).await {
            Ok(result) => result.map_err(|e| e.context(operation)),
            Err(_) => Err(Error::timeout(format!(
                "deadline exceeded after {:?}",
                self.check_timeout
            ))
            .context(operation)),
        }
    }

    /// Check 1: is this broker in the registered broker set?
    pub async fn broker_in_metadata(&self, client: &dyn AdminClient) -> Result<bool> {
        let metadata = self
            .bounded("failed to fetch metadata", client.fetch_metadata())
            .await?;
        Ok(metadata.has_broker(self.broker_id))
    }

    /// Check 2: is a controller elected?
    pub async fn controller_elected(&self, client: &dyn AdminClient) -> Result<bool> {
        let metadata = self
            .bounded("failed to fetch metadata", client.fetch_metadata())
            .await?;
        Ok(metadata.controller_elected())
    }

    /// Check 3: partitions where this broker is an assigned replica but not in the ISR.
    pub async fn under_replicated_partitions(&self, client: &dyn AdminClient) -> Result<usize> {
        let metadata = self
            .bounded("failed to fetch metadata", client.fetch_metadata())
            .await?;
        Ok(metadata.under_replicated_partitions(self.broker_id))
    }

    /// Check 4: no directory reports an error and no placement is a future replica.
    ///
    /// A failed DescribeLogDirs request is an error; a directory-level error is
    /// an unhealthy result.
    pub async fn log_dirs_healthy(&self, client: &dyn AdminClient) -> Result<bool> {
        let dirs = self
            .bounded(
                "failed to describe log dirs",
                client.describe_log_dirs(self.broker_id),
            )
            .await?;
        let findings = LogDirFindings::scan(&dirs);
        for (path, err) in &findings.dir_errors {
            warn!(broker_id = self.broker_id, path = %path, error = %err, "log directory reports error");
        }
        for (path, topic, partition) in &findings.future_partitions {
            warn!(broker_id = self.broker_id, path = %path, topic = %topic, partition, "future replica in log directory");
        }
        Ok(findings.is_healthy())
    }

    /// Runs the liveness check.
    pub async fn check_liveness(&self) -> LivenessReport {
        let mut report = LivenessReport::new(self.broker_id);

        let session = match self.bounded("failed to create admin client", self.factory.connect()).await {
            Ok(session) => session,
            Err(e) => {
                error!(broker_id = self.broker_id, error = %e, "failed to open admin session");
                report.error = Some(e.to_string());
                return report;
            }
        };

        let outcome = self.broker_in_metadata(session.client()).await;
        session.release();

        match outcome {
            Err(e) => {
                error!(broker_id = self.broker_id, error = %e, "failed to check broker in metadata");
                report.error = Some(e.to_string());
            }
            Ok(false) => {
                warn!(broker_id = self.broker_id, "{}", MSG_BROKER_NOT_FOUND);
                report.error = Some(MSG_BROKER_NOT_FOUND.to_string());
            }
            Ok(true) => {
                report.broker_found = true;
                report.status = HealthStatus::Healthy;
            }
        }
        debug!(broker_id = self.broker_id, status = ?report.status, "liveness evaluated");
        report
    }

    /// Runs the readiness checks in order, stopping at the first failure.
    pub async fn check_readiness(&self) -> ReadinessReport {
        let mut report = ReadinessReport::new(self.broker_id);

        let session = match self.bounded("failed to create admin client", self.factory.connect()).await {
            Ok(session) => session,
            Err(e) => {
                error!(broker_id = self.broker_id, error = %e, "failed to open admin session");
                report.error = Some(e.to_string());
                return report;
            }
        };

        let outcome = self.run_readiness(session.client(), &mut report).await;
        session.release();

        match outcome {
            Ok(None) => report.status = HealthStatus::Healthy,
            Ok(Some(failure)) => {
                warn!(
                    broker_id = self.broker_id,
                    under_replicated = report.under_replicated_partitions,
                    "{}",
                    failure
                );
                report.error = Some(failure.to_string());
            }
            Err(e) => {
                error!(broker_id = self.broker_id, error = %e, "readiness check failed");
                report.error = Some(e.to_string());
            }
        }
        debug!(broker_id = self.broker_id, status = ?report.status, "readiness evaluated");
        report
    }

    /// Returns the first structural failure, if any.
    async fn run_readiness(
        &self,
        client: &dyn AdminClient,
        report: &mut ReadinessReport,
    ) -> Result<Option<&'static str>> {
        report.broker_registered = self.broker_in_metadata(client).await?;
        if !report.broker_registered {
            return Ok(Some(MSG_BROKER_NOT_REGISTERED));
        }

        report.controller_elected = self.controller_elected(client).await?;
        if !report.controller_elected {
            return Ok(Some(MSG_NO_CONTROLLER));
        }

        report.under_replicated_partitions = self.under_replicated_partitions(client).await?;
        if report.under_replicated_partitions > 0 {
            return Ok(Some(MSG_UNDER_REPLICATED));
        }

        report.log_dirs_healthy = self.log_dirs_healthy(client).await?;
        if !report.log_dirs_healthy {
            return Ok(Some(MSG_LOG_DIRS_UNHEALTHY));
        }

        Ok(None)
    }
}
