//! Startup configuration.
//!
//! Every setting is an optional environment variable (or the equivalent
//! command-line flag). Broker identity and the bootstrap address list fall
//! back to platform discovery; see [`crate::discovery`].

use crate::client::SaslConfig;
use crate::discovery;
use crate::error::{Error, Result};
use clap::{builder::BoolishValueParser, ArgAction, Args};
use std::fmt;
use std::time::Duration;

/// Raw settings as supplied through flags or environment variables.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Kafka broker ID; derived from the HOSTNAME suffix when unset
    #[arg(long, env = "BROKER_ID", allow_negative_numbers = true)]
    pub broker_id: Option<i32>,

    /// Workload name used for replica-direct hostnames; derived from CPLN_WORKLOAD when unset
    #[arg(long, env = "WORKLOAD_NAME")]
    pub workload_name: Option<String>,

    /// Legacy GVC alias; derived from CPLN_GVC_ALIAS when unset
    #[arg(long, env = "GVC_ALIAS")]
    pub gvc_alias: Option<String>,

    /// GVC name used for replica-direct hostnames; derived from CPLN_GVC when unset
    #[arg(long, env = "GVC_NAME")]
    pub gvc_name: Option<String>,

    /// Location used for replica-direct hostnames; derived from CPLN_LOCATION when unset
    #[arg(long, env = "LOCATION")]
    pub location: Option<String>,

    /// Number of broker replicas in the bootstrap list
    #[arg(long, env = "REPLICA_COUNT", default_value_t = 1, allow_negative_numbers = true)]
    pub replica_count: i32,

    /// Kafka broker port
    #[arg(long, env = "KAFKA_PORT", default_value_t = 9092)]
    pub kafka_port: u16,

    /// Comma-separated bootstrap servers; disables auto-built replica addresses
    #[arg(long, env = "BOOTSTRAP_SERVERS")]
    pub bootstrap_servers: Option<String>,

    /// Enable SASL authentication
    #[arg(
        long,
        env = "SASL_ENABLED",
        default_value = "false",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub sasl_enabled: bool,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    #[arg(long, env = "SASL_MECHANISM", default_value = "PLAIN")]
    pub sasl_mechanism: String,

    /// SASL username
    #[arg(long, env = "SASL_USERNAME")]
    pub sasl_username: Option<String>,

    /// SASL password
    #[arg(long, env = "SASL_PASSWORD", hide_env_values = true)]
    pub sasl_password: Option<String>,

    /// Per-check timeout (Go-style duration, e.g. 10s, 500ms, 1m30s)
    #[arg(long, env = "CHECK_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub check_timeout: Duration,

    /// HTTP listen port
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Naming inputs used to synthesize the bootstrap address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    /// Workload name
    pub workload_name: String,
    /// Location name
    pub location: String,
    /// GVC (network scope) name
    pub gvc_name: String,
    /// Legacy GVC alias, informational only
    pub gvc_alias: Option<String>,
    /// Replica count after normalization (always >= 1)
    pub replica_count: i32,
    /// Kafka broker port
    pub kafka_port: u16,
}

impl ClusterTopology {
    /// Renders the replica-direct bootstrap list for this topology.
    pub fn bootstrap_servers(&self) -> String {
        discovery::build_bootstrap_servers(
            &self.workload_name,
            &self.location,
            &self.gvc_name,
            self.replica_count,
            self.kafka_port,
        )
    }
}

/// Fully resolved, immutable sidecar configuration.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// This broker's ID
    pub broker_id: i32,
    /// Ordered peer addresses used to seed the admin client
    pub bootstrap_servers: Vec<String>,
    /// Discovery inputs, present when the address list was auto-built
    pub topology: Option<ClusterTopology>,
    /// SASL settings
    pub sasl: SaslConfig,
    /// Per-check timeout
    pub check_timeout: Duration,
    /// HTTP listen port
    pub port: u16,
    /// Log level directive
    pub log_level: String,
}

impl SidecarConfig {
    /// Resolves the configuration from the process environment.
    pub fn from_env(args: ConfigArgs) -> Result<Self> {
        Self::initialize(args, &discovery::process_env)
    }

    /// Resolves the configuration, consulting `lookup` for discovery sources.
    pub fn initialize<F>(args: ConfigArgs, lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        crate::observability::logging::parse_level(&args.log_level)?;

        if args.check_timeout.is_zero() {
            return Err(Error::config("CHECK_TIMEOUT must be greater than zero"));
        }

        let broker_id = discovery::resolve_broker_id(args.broker_id, lookup)?;
        if args.broker_id.is_none() {
            tracing::info!(
                broker_id,
                hostname = ?lookup(discovery::HOSTNAME_VAR),
                "auto-discovered broker ID from hostname"
            );
        }

        let explicit_servers = args
            .bootstrap_servers
            .as_deref()
            .map(split_servers)
            .filter(|servers| !servers.is_empty());

        let (bootstrap_servers, topology) = match explicit_servers {
            Some(servers) => (servers, None),
            None => {
                let topology = ClusterTopology {
                    workload_name: discovery::resolve_workload_name(
                        args.workload_name.as_deref(),
                        lookup,
                    )?,
                    location: discovery::resolve_location(args.location.as_deref(), lookup)?,
                    gvc_name: discovery::resolve_gvc_name(args.gvc_name.as_deref(), lookup)?,
                    gvc_alias: discovery::resolve_gvc_alias(args.gvc_alias.as_deref(), lookup).ok(),
                    replica_count: args.replica_count.max(1),
                    kafka_port: args.kafka_port,
                };
                let servers = split_servers(&topology.bootstrap_servers());
                tracing::info!(
                    workload = %topology.workload_name,
                    location = %topology.location,
                    gvc = %topology.gvc_name,
                    bootstrap_servers = %servers.join(","),
                    "auto-built bootstrap servers"
                );
                (servers, Some(topology))
            }
        };

        let sasl = SaslConfig {
            enabled: args.sasl_enabled,
            mechanism: args.sasl_mechanism,
            username: args.sasl_username.unwrap_or_default(),
            password: args.sasl_password.unwrap_or_default(),
        };

        Ok(Self {
            broker_id,
            bootstrap_servers,
            topology,
            sasl,
            check_timeout: args.check_timeout,
            port: args.port,
            log_level: args.log_level,
        })
    }
}

impl fmt::Display for SidecarConfig {
    /// One-line summary with the SASL password masked.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.sasl.password.is_empty() { "" } else { "****" };
        write!(
            f,
            "broker_id={} bootstrap_servers={} sasl_enabled={} sasl_mechanism={} sasl_username={} \
             sasl_password={} check_timeout={:?} port={} log_level={}",
            self.broker_id,
            self.bootstrap_servers.join(","),
            self.sasl.enabled,
            self.sasl.mechanism,
            self.sasl.username,
            password,
            self.check_timeout,
            self.port,
            self.log_level,
        )?;
        if let Some(alias) = self.topology.as_ref().and_then(|t| t.gvc_alias.as_deref()) {
            write!(f, " gvc_alias={}", alias)?;
        }
        Ok(())
    }
}

fn split_servers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parses a Go-style duration such as `10s`, `250ms`, `1m30s` or `1.5h`.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration {:?}: expected number", input));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration {:?}", input)),
            unit => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
        };
        rest = &rest[unit_len..];
        total += value * seconds_per_unit;
    }

    Duration::try_from_secs_f64(total).map_err(|e| format!("invalid duration {:?}: {}", input, e))
}
