//! Internal cluster listener.
//!
//! Accepts peer connections on the internal TCP address. Every connection
//! runs an independent decode-dispatch-encode loop until EOF or a transport
//! error. Inbound requests are never re-forwarded: a SEARCH from a peer runs
//! [`Index::local_search`], which keeps the cluster fan-out a single hop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;

use super::manager::Manager;
use super::protocol::{PeerRequest, PeerResponse, RequestType};

pub struct ClusterServer {
    listener: TcpListener,
}

impl ClusterServer {
    /// Binds the internal listener. The accept loop starts with
    /// [`ClusterServer::start`].
    pub async fn bind(addr: &str) -> Result<ClusterServer> {
        let listener = TcpListener::bind(addr).await?;
        Ok(ClusterServer { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Spawns the accept loop dispatching into `manager` and returns
    /// immediately.
    pub fn start(self, manager: Arc<Manager>) {
        let addr = self.listener.local_addr().ok();
        tracing::info!("Cluster server listening on {:?}", addr);

        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, peer)) => {
                        let manager = manager.clone();
                        tokio::spawn(async move {
                            handle_conn(manager, stream, peer).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Cluster server accept error: {}", e);
                    }
                }
            }
        });
    }
}

async fn handle_conn(manager: Arc<Manager>, stream: TcpStream, peer: SocketAddr) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Cluster server read error from {}: {}", peer, e);
                break;
            }
        }

        let req: PeerRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!("Cluster server decode error from {}: {}", peer, e);
                break;
            }
        };

        let resp = dispatch(&manager, req).await;
        let mut frame = match serde_json::to_vec(&resp) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Cluster server encode error: {}", e);
                break;
            }
        };
        frame.push(b'\n');
        if let Err(e) = write_half.write_all(&frame).await {
            tracing::warn!("Cluster server write error to {}: {}", peer, e);
            break;
        }
    }
}

async fn dispatch(manager: &Arc<Manager>, req: PeerRequest) -> PeerResponse {
    if req.op == RequestType::CreateIndex {
        return match manager
            .create_index(&req.index_name, req.num_shards.unwrap_or(0), false)
            .await
        {
            Ok(_) => PeerResponse::ok(),
            Err(e) => PeerResponse::error(e.to_string()),
        };
    }

    // Every other request may target an index this node has not discovered
    // yet; opening it here is what materialises locally-owned shards on
    // demand.
    let idx = match manager.get_index(&req.index_name) {
        Some(idx) => idx,
        None => match manager.open_index(&req.index_name).await {
            Ok(idx) => idx,
            Err(e) => return PeerResponse::error(e.to_string()),
        },
    };

    match req.op {
        RequestType::Index => {
            let (Some(id), Some(data)) = (req.id, req.data) else {
                return PeerResponse::error("INDEX request missing id or data");
            };
            match idx.index(&id, data).await {
                Ok(()) => PeerResponse::ok(),
                Err(e) => PeerResponse::error(e.to_string()),
            }
        }
        RequestType::BatchIndex => {
            let (Some(ids), Some(docs)) = (req.batch_ids, req.batch_docs) else {
                return PeerResponse::error("BATCH_INDEX request missing ids or docs");
            };
            match idx.batch_index(ids, docs).await {
                Ok(()) => PeerResponse::ok(),
                Err(e) => PeerResponse::error(e.to_string()),
            }
        }
        RequestType::Get => {
            let Some(id) = req.id else {
                return PeerResponse::error("GET request missing id");
            };
            match idx.get(&id).await {
                Ok(doc) => PeerResponse {
                    data: doc,
                    ..PeerResponse::default()
                },
                Err(e) => PeerResponse::error(e.to_string()),
            }
        }
        RequestType::Delete => {
            let Some(id) = req.id else {
                return PeerResponse::error("DELETE request missing id");
            };
            match idx.delete(&id).await {
                Ok(()) => PeerResponse::ok(),
                Err(e) => PeerResponse::error(e.to_string()),
            }
        }
        RequestType::Search => {
            let Some(search_req) = req.search_req else {
                return PeerResponse::error("SEARCH request missing body");
            };
            // LocalSearch, never Search: forwarding again would loop the
            // fan-out between peers.
            match idx.local_search(&search_req).await {
                Ok(result) => PeerResponse {
                    search_result: Some(result),
                    ..PeerResponse::default()
                },
                Err(e) => PeerResponse::error(e.to_string()),
            }
        }
        RequestType::CreateIndex => PeerResponse::error("unexpected CREATE_INDEX"),
    }
}
