//! LVM CSI operator - cluster controller
//!
//! Runs the cluster-side half of the operator: watches for node removals
//! and unwinds the volumes, claims and pods the removed node owned, and
//! publishes capacity observability. The per-node agent (which talks to
//! lvmd and writes LogicalVolume status) and the CSI gRPC transport are
//! separate processes consuming this crate as a library.

use clap::Parser;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lvm_csi_operator::{
    CapacityTracker, Config, Error, KubeJanitor, KubeNodeReader, KubeVolumeStore, Metrics,
    NodeInfo, NodeRemovalCoordinator, Result, VolumeStoreRef, DEFAULT_DEVICE_CLASS_NAME,
    TOPOLOGY_NODE_KEY,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// LVM CSI Operator - topology-aware local storage for Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node label key used for topology-aware scheduling
    #[arg(long, env = "TOPOLOGY_KEY", default_value = TOPOLOGY_NODE_KEY)]
    topology_key: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Staleness bound for cached capacity reads, in seconds
    #[arg(long, env = "CAPACITY_STALENESS", default_value = "60")]
    capacity_staleness_secs: u64,

    /// Interval between convergence polls, in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "500")]
    poll_interval_ms: u64,

    /// Default deadline for convergence waits, in seconds
    #[arg(long, env = "CONVERGE_DEADLINE", default_value = "60")]
    converge_deadline_secs: u64,

    /// Nodes for which forced cleanup on removal is skipped
    #[arg(long, env = "SKIP_FINALIZE_NODES", value_delimiter = ',')]
    skip_finalize_nodes: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting LVM CSI operator controller");
    info!("  Version: {}", lvm_csi_operator::VERSION);
    info!("  Topology key: {}", args.topology_key);
    info!("  Capacity staleness bound: {}s", args.capacity_staleness_secs);
    if !args.skip_finalize_nodes.is_empty() {
        warn!(
            "  Node finalization skipped for: {}",
            args.skip_finalize_nodes.join(", ")
        );
    }

    let config = Config {
        node_name: String::new(),
        topology_label_key: args.topology_key.clone(),
        capacity_staleness: Duration::from_secs(args.capacity_staleness_secs),
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        default_deadline: Duration::from_secs(args.converge_deadline_secs),
        skip_finalize_nodes: args.skip_finalize_nodes.clone(),
    };

    let metrics = Metrics::new()?;
    metrics.register()?;

    let client = Client::try_default().await?;
    let nodes = Arc::new(KubeNodeReader::new(client.clone()));
    let tracker = Arc::new(CapacityTracker::new(&config, nodes));
    let store: VolumeStoreRef = Arc::new(KubeVolumeStore::new(client.clone()));
    let janitor = Arc::new(KubeJanitor::new(client.clone()));
    let coordinator = NodeRemovalCoordinator::new(&config, store, janitor, &metrics);

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Periodically republish cluster-wide capacity for observability.
    let staleness = config.capacity_staleness;
    tokio::spawn(async move {
        if let Err(e) = run_capacity_reporter(tracker, staleness).await {
            error!("Capacity reporter error: {}", e);
        }
    });

    info!("Watching for node removals");
    run_node_watch(client, coordinator).await
}

// =============================================================================
// Node watch loop
// =============================================================================

async fn run_node_watch(client: Client, coordinator: NodeRemovalCoordinator) -> Result<()> {
    let nodes: Api<Node> = Api::all(client);
    let mut stream = Box::pin(watcher(nodes, watcher::Config::default()).applied_objects());

    while let Some(node) = stream
        .try_next()
        .await
        .map_err(|e| Error::Internal(format!("node watch failed: {e}")))?
    {
        // A node with a deletion timestamp and our finalizer is on its
        // way out; everything it owned must be unwound before the
        // finalizer is released.
        if node.metadata.deletion_timestamp.is_none() {
            continue;
        }
        let info = NodeInfo::from(&node);
        if let Err(e) = coordinator.handle_node_removal(&info).await {
            error!(node = %info.name, "node cleanup failed: {}", e);
        }
    }
    Ok(())
}

// =============================================================================
// Capacity reporter
// =============================================================================

async fn run_capacity_reporter(tracker: Arc<CapacityTracker>, interval: Duration) -> Result<()> {
    let gauge = prometheus::register_int_gauge!(
        "lvm_csi_total_capacity_bytes",
        "Cluster-wide free capacity for the default device class"
    )
    .map_err(|e| Error::Internal(format!("metric registration failed: {e}")))?;

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match tracker.total_capacity(DEFAULT_DEVICE_CLASS_NAME).await {
            Ok(total) => {
                gauge.set(total as i64);
                info!(total_bytes = total, "cluster capacity refreshed");
            }
            Err(e) => warn!("capacity refresh failed: {}", e),
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" => Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from("ok"))
                    .unwrap(),
                "/readyz" => Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from("ok"))
                    .unwrap(),
                _ => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from("not found"))
                    .unwrap(),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {e}")))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {e}")))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    encoder.encode(&metric_families, &mut buffer).unwrap();

                    Response::builder()
                        .status(StatusCode::OK)
                        .header("Content-Type", encoder.format_type())
                        .body(Body::from(buffer))
                        .unwrap()
                }
                _ => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from("not found"))
                    .unwrap(),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {e}")))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {e}")))?;

    Ok(())
}
