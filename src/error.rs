use thiserror::Error;

/// Sidecar result type, wrapping the crate's [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Sidecar error types.
///
/// A health check that runs to completion and finds the broker unhealthy is
/// not an error: it is reported as an unhealthy
/// [`HealthVerdict`](crate::observability::health::HealthVerdict).
#[derive(Error, Debug)]
pub enum Error {
    /// The broker ID could not be derived from the host name.
    #[error("invalid broker identity: {0}")]
    InvalidIdentity(String),

    /// A required override or platform-injected discovery value is absent or malformed.
    #[error("missing discovery source: {0}")]
    MissingDiscoverySource(String),

    /// The configured SASL mechanism is not one of PLAIN, SCRAM-SHA-256, SCRAM-SHA-512.
    #[error("unsupported SASL mechanism: {0} (supported: PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)")]
    UnsupportedMechanism(String),

    /// Invalid configuration values (log level, durations, ports).
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure to build or use an administrative session against the cluster.
    #[error("{0}")]
    Connection(String),

    /// Errors originating from the underlying `rdkafka` library.
    #[error("kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Malformed or unexpected bytes on the Kafka wire protocol.
    #[error("kafka protocol error: {0}")]
    Protocol(String),

    /// A cluster call did not finish within the check timeout.
    #[error("{0}")]
    Timeout(String),

    /// Prometheus registration or encoding failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Errors related to standard I/O operations (cgroup files, sockets).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates an InvalidIdentity error.
    pub fn invalid_identity(msg: impl Into<String>) -> Self {
        Self::InvalidIdentity(msg.into())
    }

    /// Creates a MissingDiscoverySource error.
    pub fn missing_source(msg: impl Into<String>) -> Self {
        Self::MissingDiscoverySource(msg.into())
    }

    /// Creates a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a Connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a Protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates a Timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Wraps this error with the name of the operation that produced it,
    /// yielding a `Connection` error such as `failed to fetch metadata: ...`.
    pub fn context(self, operation: &str) -> Self {
        Self::Connection(format!("{}: {}", operation, self))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Connection(format!("admin task join error: {}", err))
    }
}
