use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::{BackendKind, LoggingConfig, TollgateConfig};
use tollgate::grpc::GrpcServer;
use tollgate::mesh::Cluster;
use tollgate::ratelimit::{
    EntryStore, GossipStore, MemoryStore, PolicySet, RateLimiter, Sweeper, SystemClock,
};

/// Fixed-window rate limiting service.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Named policy file, overrides limiter.policies_path
    #[arg(short, long)]
    policies: Option<String>,

    /// gRPC listen address, overrides server.grpc_addr
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Entry store backend, overrides limiter.backend
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TollgateConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.policies {
        config.limiter.policies_path = Some(path);
    }
    if let Some(addr) = cli.grpc_addr {
        config.server.grpc_addr = addr;
    }
    if let Some(backend) = cli.backend {
        config.limiter.backend = backend;
    }

    init_tracing(&config.logging);

    info!("Starting Tollgate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        grpc_addr = %config.server.grpc_addr,
        backend = ?config.limiter.backend,
        "Configuration loaded"
    );

    let mut policies = PolicySet::builtin();
    if let Some(path) = &config.limiter.policies_path {
        policies = policies.merged(PolicySet::from_file(path)?);
    }
    info!(scopes = policies.len(), "Rate limit policies loaded");

    // The cluster handle outlives the limiter so it can be shut down cleanly
    let (store, cluster): (Arc<dyn EntryStore>, Option<Arc<Cluster>>) =
        match config.limiter.backend {
            BackendKind::Memory => (Arc::new(MemoryStore::new()) as Arc<dyn EntryStore>, None),
            BackendKind::Gossip => {
                let cluster = Arc::new(Cluster::start(config.cluster.to_cluster_config()).await?);
                let store = Arc::new(GossipStore::new(cluster.clone())) as Arc<dyn EntryStore>;
                (store, Some(cluster))
            }
        };

    let rate_limiter = Arc::new(RateLimiter::with_store(store, Arc::new(SystemClock)));
    rate_limiter.set_policies(policies);
    info!("Rate limiter initialized");

    let sweeper = Sweeper::spawn(rate_limiter.clone(), config.limiter.sweep_interval());

    let grpc_server = GrpcServer::new(config.server.grpc_addr, rate_limiter);

    info!("Starting gRPC server on {}", config.server.grpc_addr);

    // Run the server with graceful shutdown on Ctrl+C
    let served = grpc_server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.shutdown().await;

    if let Some(cluster) = cluster {
        leave_cluster(cluster).await;
    }

    served?;

    info!("Tollgate Rate Limiting Service stopped");
    Ok(())
}

/// Leave the gossip mesh. Failures are logged so the server's own result
/// still reaches the caller.
async fn leave_cluster(cluster: Arc<Cluster>) {
    match Arc::try_unwrap(cluster) {
        Ok(cluster) => {
            if let Err(e) = cluster.shutdown().await {
                warn!(error = %e, "Failed to shut down cluster node");
            }
        }
        Err(_) => warn!("Cluster still referenced at shutdown, skipping graceful leave"),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
