//! Kafka broker sidecar
//!
//! Serves health probes, memory metrics and build metadata for one broker replica.

use clap::{Parser, Subcommand};
use kafka_sidecar::{
    config::{ConfigArgs, SidecarConfig},
    observability::{cgroup, init_logging, HealthEvaluator, MemoryCollector},
    About, AppState, KafkaAdminFactory, SidecarServer,
};
use prometheus::Registry;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Kafka broker sidecar
#[derive(Parser)]
#[command(name = "kafka-sidecar")]
#[command(about = "Health, readiness and memory metrics sidecar for a Kafka broker")]
#[command(version = kafka_sidecar::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
    /// Resolve configuration, print it and exit
    Validate,
    /// Show build information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Version => {
            println!("kafka-sidecar {}", About::current());
            Ok(())
        }
        Commands::Validate => {
            let config = SidecarConfig::from_env(cli.config)?;
            KafkaAdminFactory::new(&config.bootstrap_servers, &config.sasl, config.check_timeout)?;
            println!("{}", config);
            Ok(())
        }
        Commands::Serve => serve(cli.config).await,
    }
}

async fn serve(args: ConfigArgs) -> anyhow::Result<()> {
    init_logging(&args.log_level)?;

    let config = SidecarConfig::from_env(args).map_err(|e| {
        error!(error = %e, "failed to initialize configuration");
        e
    })?;
    info!(config = %config, about = %About::current(), "starting kafka sidecar");

    let factory = KafkaAdminFactory::new(&config.bootstrap_servers, &config.sasl, config.check_timeout)
        .map_err(|e| {
            error!(error = %e, "failed to configure admin client");
            e
        })?;
    let evaluator = HealthEvaluator::new(config.broker_id, Arc::new(factory), config.check_timeout);

    let registry = Registry::new();
    let collector = MemoryCollector::new(Arc::from(cgroup::detect_reader()))?;
    if let Err(e) = collector.register(&registry) {
        warn!(error = %e, "failed to register memory metrics collector");
    }

    let state = AppState {
        evaluator: Arc::new(evaluator),
        registry,
    };
    SidecarServer::new(state, config.port)
        .run(shutdown_signal())
        .await?;

    info!("kafka sidecar stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
