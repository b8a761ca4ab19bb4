use std::sync::Arc;

use breeze::api;
use breeze::cluster::Cluster;
use breeze::shard::{ClusterServer, Manager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut path = "./data".to_string();
    let mut num_shards: u32 = 5;
    let mut bind = "127.0.0.1:8080".to_string();
    let mut internal_bind = "127.0.0.1:9090".to_string();
    let mut node_id: Option<String> = None;
    let mut peers: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--path" => {
                path = args[i + 1].clone();
                i += 2;
            }
            "--shards" => {
                num_shards = args[i + 1].parse()?;
                i += 2;
            }
            "--bind" => {
                bind = args[i + 1].clone();
                i += 2;
            }
            "--internal-bind" => {
                internal_bind = args[i + 1].clone();
                i += 2;
            }
            "--node-id" => {
                node_id = Some(args[i + 1].clone());
                i += 2;
            }
            "--peer" => {
                peers.push(args[i + 1].clone());
                i += 2;
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: {} [--bind <addr:port>] [--internal-bind <addr:port>] \
                     [--path <dir>] [--shards <n>] [--node-id <id>] \
                     [--peer <id=addr:port>]...",
                    args[0]
                );
                eprintln!(
                    "Example: {} --bind 127.0.0.1:8080 --internal-bind 127.0.0.1:9090 \
                     --node-id node1 --peer node1=127.0.0.1:9090 --peer node2=127.0.0.1:9091",
                    args[0]
                );
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    let node_id = node_id.unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4()));
    let cluster = Arc::new(Cluster::new(&node_id, &internal_bind, &peers));

    tracing::info!("Starting node {} with {} cluster node(s)", node_id, cluster.nodes.len());
    tracing::info!("Data path: {}, default shards: {}", path, num_shards);

    // 1. Storage and index lifecycle:
    let manager = Manager::open(&path, num_shards, cluster).await?;

    // 2. Internal cluster listener for forwarded requests:
    let cluster_server = ClusterServer::bind(&internal_bind).await?;
    cluster_server.start(manager.clone());

    // 3. Public Elasticsearch-compatible API:
    let max_body_bytes = std::env::var("BREEZE_MAX_BODY_BYTES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(20 * 1024 * 1024);
    let app = api::router(manager.clone(), max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("API server listening on {}", bind);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down, closing indices");
    manager.close();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install shutdown handler: {}", e);
    }
}
