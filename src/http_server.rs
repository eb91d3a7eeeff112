//! HTTP server for the sidecar endpoints
//!
//! - `GET /health/live`: liveness, 200 or 503
//! - `GET /health/ready`: readiness, 200 or 503
//! - `GET /metrics`: Prometheus exposition
//! - `GET /about`: build metadata

use crate::about::About;
use crate::error::{Error, Result};
use crate::observability::health::{HealthEvaluator, HealthStatus};
use crate::observability::metrics;
use prometheus::Registry;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Time in-flight requests get to finish once shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// State shared by every request.
#[derive(Clone)]
pub struct AppState {
    /// Health evaluator for this broker
    pub evaluator: Arc<HealthEvaluator>,
    /// Process-wide metrics registry
    pub registry: Registry,
}

/// HTTP server for the sidecar endpoints
pub struct SidecarServer {
    state: AppState,
    addr: SocketAddr,
}

impl SidecarServer {
    /// Creates a server listening on all interfaces at `port`.
    pub fn new(state: AppState, port: u16) -> Self {
        Self {
            state,
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
        }
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests for up
    /// to [`SHUTDOWN_GRACE`] before aborting them.
    pub async fn run<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        let bind_addr = self.addr;
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let (addr, server) = warp::serve(routes(self.state))
            .try_bind_with_graceful_shutdown(bind_addr, async move {
                let _ = stop_rx.await;
            })
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("failed to bind {}: {}", bind_addr, e),
                ))
            })?;
        info!(%addr, "HTTP server listening");

        let mut server = tokio::spawn(server);
        tokio::select! {
            res = &mut server => {
                res?;
                return Ok(());
            }
            _ = shutdown => {}
        }

        info!("shutting down HTTP server");
        let _ = stop_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(grace = ?SHUTDOWN_GRACE, "in-flight requests did not finish, forcing close");
                server.abort();
            }
        }
        info!("HTTP server stopped");
        Ok(())
    }
}

/// Every sidecar route.
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let live = warp::path!("health" / "live")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(liveness_handler);

    let ready = warp::path!("health" / "ready")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(readiness_handler);

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_state(state))
        .and_then(metrics_handler);

    let about = warp::path!("about").and(warp::get()).and_then(about_handler);

    live.or(ready)
        .or(metrics)
        .or(about)
        .with(warp::trace::request())
}

/// Warp filter to inject shared state
fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn liveness_handler(state: AppState) -> std::result::Result<impl Reply, Rejection> {
    debug!("liveness requested");
    let report = state.evaluator.check_liveness().await;
    Ok(warp::reply::with_status(
        warp::reply::json(&report),
        status_code(report.status),
    ))
}

async fn readiness_handler(state: AppState) -> std::result::Result<impl Reply, Rejection> {
    debug!("readiness requested");
    let report = state.evaluator.check_readiness().await;
    Ok(warp::reply::with_status(
        warp::reply::json(&report),
        status_code(report.status),
    ))
}

/// Always 200; a failed encode is logged and served as an empty exposition.
async fn metrics_handler(state: AppState) -> std::result::Result<impl Reply, Rejection> {
    let body = metrics::render(&state.registry).unwrap_or_else(|e| {
        error!(error = %e, "failed to encode metrics");
        String::new()
    });
    Ok(warp::reply::with_header(body, "content-type", METRICS_CONTENT_TYPE))
}

async fn about_handler() -> std::result::Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&About::current()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AdminSession, MockAdminClient, MockAdminClientFactory};
    use crate::metadata::{BrokerInfo, ClusterMetadata, LogDirs};
    use crate::observability::cgroup::{MemoryMetrics, MemoryReader};
    use crate::observability::metrics::MemoryCollector;
    use serde_json::Value;

    struct StaticReader;

    impl MemoryReader for StaticReader {
        fn read_memory_metrics(&self) -> Result<MemoryMetrics> {
            Ok(MemoryMetrics::derive(2048, 0, 1024, 48))
        }
    }

    fn state(registered: bool) -> AppState {
        let mut factory = MockAdminClientFactory::new();
        factory.expect_connect().returning(move || {
            let mut client = MockAdminClient::new();
            client.expect_fetch_metadata().returning(move || {
                Ok(ClusterMetadata {
                    brokers: if registered {
                        vec![BrokerInfo { id: 3, host: "b3".into(), port: 9092 }]
                    } else {
                        vec![]
                    },
                    controller_id: 3,
                    topics: vec![],
                })
            });
            client
                .expect_describe_log_dirs()
                .returning(|_| Ok(LogDirs::new()));
            Ok(AdminSession::new(Box::new(client), || {}))
        });

        let registry = Registry::new();
        MemoryCollector::new(Arc::new(StaticReader))
            .unwrap()
            .register(&registry)
            .unwrap();

        AppState {
            evaluator: Arc::new(HealthEvaluator::new(3, Arc::new(factory), Duration::from_secs(1))),
            registry,
        }
    }

    async fn get(state: AppState, path: &str) -> warp::http::Response<bytes::Bytes> {
        warp::test::request()
            .method("GET")
            .path(path)
            .reply(&routes(state))
            .await
    }

    #[tokio::test]
    async fn test_liveness_healthy() {
        let resp = get(state(true), "/health/live").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["brokerId"], 3);
        assert_eq!(body["brokerFound"], true);
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_readiness_healthy_body_shape() {
        let resp = get(state(true), "/health/ready").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["brokerRegistered"], true);
        assert_eq!(body["controllerElected"], true);
        assert_eq!(body["underReplicatedPartitions"], 0);
        assert_eq!(body["logDirsHealthy"], true);
    }

    #[tokio::test]
    async fn test_unregistered_broker_is_503() {
        let resp = get(state(false), "/health/ready").await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["error"], "broker not registered in cluster metadata");

        let resp = get(state(false), "/health/live").await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["error"], "broker not found in cluster metadata");
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let resp = get(state(true), "/metrics").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], METRICS_CONTENT_TYPE);
        let text = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(text.contains("kafka_memory_working_set_bytes 2000"));
        assert!(text.contains("kafka_memory_oom_ratio 0"));
    }

    #[tokio::test]
    async fn test_about() {
        let resp = get(state(true), "/about").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert!(body["version"].is_string());
        assert!(body["epoch"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_path_and_wrong_method() {
        assert_eq!(get(state(true), "/health").await.status(), StatusCode::NOT_FOUND);

        let resp = warp::test::request()
            .method("POST")
            .path("/health/live")
            .reply(&routes(state(true)))
            .await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
