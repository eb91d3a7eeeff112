//! Administrative client sessions against the Kafka cluster.
//!
//! [`AdminClientFactory`] is the seam the health evaluator depends on. The
//! production [`KafkaAdminFactory`] uses an rdkafka `AdminClient` for metadata
//! and the controller ID, and a raw protocol connection
//! ([`crate::protocol::BrokerConnection`]) for DescribeLogDirs.

use crate::error::{Error, Result};
use crate::metadata::{
    BrokerInfo, ClusterMetadata, LogDirs, PartitionDescriptor, TopicDescriptor, NO_CONTROLLER,
};
use crate::protocol::BrokerConnection;
use crate::sasl::{SaslCredentials, SaslMechanism};
use async_trait::async_trait;
use rdkafka::admin::AdminClient as RdKafkaAdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig as RdKafkaClientConfig;
use rdkafka::metadata::Metadata;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CLIENT_ID: &str = "kafka-sidecar";

/// SASL settings as configured; validated when a factory is built.
#[derive(Clone, Default)]
pub struct SaslConfig {
    /// Whether SASL authentication is enabled
    pub enabled: bool,
    /// Mechanism name, matched case-insensitively
    pub mechanism: String,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl SaslConfig {
    /// Validated credentials, `None` when SASL is disabled.
    pub fn credentials(&self) -> Result<Option<SaslCredentials>> {
        if !self.enabled {
            return Ok(None);
        }
        let mechanism: SaslMechanism = self.mechanism.parse()?;
        Ok(Some(SaslCredentials {
            mechanism,
            username: self.username.clone(),
            password: self.password.clone(),
        }))
    }
}

impl fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslConfig")
            .field("enabled", &self.enabled)
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Cluster calls available within one administrative session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Fetches brokers, controller and topic/partition replica state.
    async fn fetch_metadata(&self) -> Result<ClusterMetadata>;

    /// Describes every log directory of `broker_id`, keyed by path.
    async fn describe_log_dirs(&self, broker_id: i32) -> Result<LogDirs>;
}

type Teardown = Box<dyn FnOnce(Box<dyn AdminClient>) + Send + Sync>;

/// An open administrative session plus its teardown.
///
/// The teardown runs exactly once: on [`AdminSession::release`], or on drop if
/// the session is abandoned early. It receives the client, so the underlying
/// connection is closed wherever the teardown decides to drop it.
pub struct AdminSession {
    client: Box<dyn AdminClient>,
    teardown: Option<Teardown>,
}

impl AdminSession {
    /// Wraps `client`; `on_release` runs after the client is dropped.
    pub fn new(client: Box<dyn AdminClient>, on_release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self::with_teardown(client, move |client| {
            drop(client);
            on_release();
        })
    }

    /// Wraps `client` with a teardown that takes ownership of it.
    pub fn with_teardown(
        client: Box<dyn AdminClient>,
        teardown: impl FnOnce(Box<dyn AdminClient>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            client,
            teardown: Some(Box::new(teardown)),
        }
    }

    /// The session's client.
    pub fn client(&self) -> &dyn AdminClient {
        self.client.as_ref()
    }

    /// Ends the session.
    pub fn release(mut self) {
        self.run_teardown();
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            let client = std::mem::replace(&mut self.client, Box::new(ReleasedClient));
            teardown(client);
        }
    }
}

impl Drop for AdminSession {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

/// Stands in for the client once the session has been torn down.
struct ReleasedClient;

#[async_trait]
impl AdminClient for ReleasedClient {
    async fn fetch_metadata(&self) -> Result<ClusterMetadata> {
        Err(Error::connection("admin session already released"))
    }

    async fn describe_log_dirs(&self, _broker_id: i32) -> Result<LogDirs> {
        Err(Error::connection("admin session already released"))
    }
}

impl fmt::Debug for AdminSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminSession")
            .field("released", &self.teardown.is_none())
            .finish()
    }
}

/// Opens administrative sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdminClientFactory: Send + Sync {
    /// Opens a new session against the cluster.
    async fn connect(&self) -> Result<AdminSession>;
}

/// Builds rdkafka-backed sessions for a fixed address list and credential.
pub struct KafkaAdminFactory {
    bootstrap_servers: String,
    sasl: Option<SaslCredentials>,
    request_timeout: Duration,
}

impl KafkaAdminFactory {
    /// Validates the SASL mechanism up front so a bad value fails at startup.
    pub fn new(bootstrap_servers: &[String], sasl: &SaslConfig, request_timeout: Duration) -> Result<Self> {
        if bootstrap_servers.is_empty() {
            return Err(Error::config("at least one bootstrap server is required"));
        }
        let sasl = sasl.credentials()?;
        info!(
            bootstrap_servers = %bootstrap_servers.join(","),
            sasl_mechanism = sasl.as_ref().map(|c| c.mechanism.as_str()).unwrap_or("none"),
            "admin client factory configured"
        );
        Ok(Self {
            bootstrap_servers: bootstrap_servers.join(","),
            sasl,
            request_timeout,
        })
    }

    fn client_config(&self) -> RdKafkaClientConfig {
        let mut config = RdKafkaClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", CLIENT_ID)
            .set(
                "socket.timeout.ms",
                self.request_timeout.as_millis().max(10).to_string(),
            );
        match &self.sasl {
            Some(creds) => {
                config
                    .set("security.protocol", "sasl_plaintext")
                    .set("sasl.mechanisms", creds.mechanism.as_str())
                    .set("sasl.username", &creds.username)
                    .set("sasl.password", &creds.password);
            }
            None => {
                config.set("security.protocol", "plaintext");
            }
        }
        config
    }
}

#[async_trait]
impl AdminClientFactory for KafkaAdminFactory {
    async fn connect(&self) -> Result<AdminSession> {
        let admin: RdKafkaAdminClient<DefaultClientContext> = self
            .client_config()
            .create()
            .map_err(Error::Kafka)?;
        debug!("admin session opened");

        let client = KafkaAdmin {
            admin: Arc::new(admin),
            sasl: self.sasl.clone(),
            request_timeout: self.request_timeout,
        };
        Ok(AdminSession::with_teardown(Box::new(client), close_blocking))
    }
}

/// Dropping the rdkafka client joins its polling thread and destroys the
/// librdkafka handle, so it happens on the blocking pool.
fn close_blocking(client: Box<dyn AdminClient>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || {
                drop(client);
                debug!("admin session closed");
            });
        }
        Err(_) => {
            drop(client);
            debug!("admin session closed");
        }
    }
}

struct KafkaAdmin {
    admin: Arc<RdKafkaAdminClient<DefaultClientContext>>,
    sasl: Option<SaslCredentials>,
    request_timeout: Duration,
}

impl KafkaAdmin {
    async fn metadata(&self) -> Result<ClusterMetadata> {
        let admin = Arc::clone(&self.admin);
        let timeout = self.request_timeout;
        tokio::task::spawn_blocking(move || -> Result<ClusterMetadata> {
            let client = admin.inner();
            let metadata = client.fetch_metadata(None, timeout)?;
            let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
            // SAFETY: the handle stays alive for the call through `admin`.
            let controller_id =
                unsafe { rdkafka::bindings::rd_kafka_controllerid(client.native_ptr(), timeout_ms) };
            Ok(convert_metadata(&metadata, controller_id))
        })
        .await?
    }
}

#[async_trait]
impl AdminClient for KafkaAdmin {
    async fn fetch_metadata(&self) -> Result<ClusterMetadata> {
        self.metadata().await
    }

    async fn describe_log_dirs(&self, broker_id: i32) -> Result<LogDirs> {
        let metadata = self.metadata().await?;
        let broker = metadata.broker(broker_id).ok_or_else(|| {
            Error::connection(format!("broker {} has no advertised address", broker_id))
        })?;

        let mut conn = BrokerConnection::connect(&broker.address(), CLIENT_ID).await?;
        if let Some(creds) = &self.sasl {
            conn.authenticate(creds).await?;
        }
        conn.describe_log_dirs().await
    }
}

fn convert_metadata(metadata: &Metadata, controller_id: i32) -> ClusterMetadata {
    let brokers = metadata
        .brokers()
        .iter()
        .map(|b| BrokerInfo {
            id: b.id(),
            host: b.host().to_string(),
            port: b.port(),
        })
        .collect();

    let topics = metadata
        .topics()
        .iter()
        .map(|t| TopicDescriptor {
            name: t.name().to_string(),
            partitions: t
                .partitions()
                .iter()
                .map(|p| PartitionDescriptor {
                    partition: p.id(),
                    replicas: p.replicas().to_vec(),
                    isr: p.isr().to_vec(),
                })
                .collect(),
        })
        .collect();

    ClusterMetadata {
        brokers,
        controller_id: if controller_id < 0 { NO_CONTROLLER } else { controller_id },
        topics,
    }
}
