//! Sidecar HTTP endpoints end to end: evaluator, collector and router together.

use async_trait::async_trait;
use kafka_sidecar::http_server::routes;
use kafka_sidecar::metadata::{BrokerInfo, ClusterMetadata, LogDirs};
use kafka_sidecar::observability::cgroup::CgroupV2Reader;
use kafka_sidecar::observability::MemoryCollector;
use kafka_sidecar::{
    AdminClient, AdminClientFactory, AdminSession, AppState, Error, HealthEvaluator, Result,
    SidecarServer,
};
use prometheus::Registry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use warp::http::StatusCode;

struct StaticCluster {
    reachable: bool,
}

#[async_trait]
impl AdminClient for StaticCluster {
    async fn fetch_metadata(&self) -> Result<ClusterMetadata> {
        if !self.reachable {
            return Err(Error::connection("dial tcp: connection refused"));
        }
        Ok(ClusterMetadata {
            brokers: vec![BrokerInfo { id: 0, host: "localhost".into(), port: 9092 }],
            controller_id: 0,
            topics: vec![],
        })
    }

    async fn describe_log_dirs(&self, _broker_id: i32) -> Result<LogDirs> {
        Ok(LogDirs::new())
    }
}

struct StaticFactory {
    reachable: bool,
}

#[async_trait]
impl AdminClientFactory for StaticFactory {
    async fn connect(&self) -> Result<AdminSession> {
        Ok(AdminSession::new(
            Box::new(StaticCluster { reachable: self.reachable }),
            || {},
        ))
    }
}

fn cgroup_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("memory.current"), "1073741824\n").unwrap();
    std::fs::write(dir.path().join("memory.max"), "2147483648\n").unwrap();
    std::fs::write(
        dir.path().join("memory.stat"),
        "anon 536870912\nfile 268435456\ninactive_file 134217728\n",
    )
    .unwrap();
    dir
}

fn state(reachable: bool, cgroup: &TempDir) -> AppState {
    let registry = Registry::new();
    MemoryCollector::new(Arc::new(CgroupV2Reader::with_base_path(cgroup.path())))
        .unwrap()
        .register(&registry)
        .unwrap();
    AppState {
        evaluator: Arc::new(HealthEvaluator::new(
            0,
            Arc::new(StaticFactory { reachable }),
            Duration::from_secs(1),
        )),
        registry,
    }
}

#[tokio::test]
async fn probes_report_cluster_state() {
    let cgroup = cgroup_dir();
    let api = routes(state(true, &cgroup));

    for path in ["/health/live", "/health/ready"] {
        let resp = warp::test::request().path(path).reply(&api).await;
        assert_eq!(resp.status(), StatusCode::OK, "{}", path);
        assert_eq!(resp.headers()["content-type"], "application/json");
    }
}

#[tokio::test]
async fn transport_errors_surface_as_503_with_text() {
    let cgroup = cgroup_dir();
    let api = routes(state(false, &cgroup));

    let resp = warp::test::request().path("/health/ready").reply(&api).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["brokerId"], 0);
    assert_eq!(
        body["error"],
        "failed to fetch metadata: dial tcp: connection refused"
    );
    assert_eq!(body["brokerRegistered"], false);
}

#[tokio::test]
async fn metrics_read_cgroup_on_every_scrape() {
    let cgroup = cgroup_dir();
    let api = routes(state(true, &cgroup));

    let resp = warp::test::request().path("/metrics").reply(&api).await;
    let text = String::from_utf8(resp.body().to_vec()).unwrap();
    assert!(text.contains("kafka_memory_working_set_bytes 939524096"));
    assert!(text.contains("kafka_memory_oom_floor_ratio 0.25"));

    std::fs::write(cgroup.path().join("memory.current"), "134217728\n").unwrap();
    let resp = warp::test::request().path("/metrics").reply(&api).await;
    let text = String::from_utf8(resp.body().to_vec()).unwrap();
    assert!(text.contains("kafka_memory_working_set_bytes 0"));

    // Missing files: scrape still succeeds, without memory samples.
    std::fs::remove_file(cgroup.path().join("memory.stat")).unwrap();
    let resp = warp::test::request().path("/metrics").reply(&api).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!String::from_utf8(resp.body().to_vec())
        .unwrap()
        .contains("kafka_memory_usage_bytes"));
}

#[tokio::test]
async fn server_stops_on_shutdown_signal() {
    let cgroup = cgroup_dir();
    let server = SidecarServer::new(state(true, &cgroup), 0);
    tokio::time::timeout(
        Duration::from_secs(5),
        server.run(tokio::time::sleep(Duration::from_millis(50))),
    )
    .await
    .expect("server did not stop")
    .unwrap();
}
