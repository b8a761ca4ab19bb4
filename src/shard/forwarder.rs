//! Outbound request forwarding to peer nodes.
//!
//! The forwarder keeps one long-lived framed JSON channel per peer, created
//! lazily on first use and cached by node id. Each channel is a serialised
//! resource: a per-channel mutex admits one outstanding request at a time,
//! and callers queue on it. A hard deadline bounds the combined encode and
//! decode; on any transport error, decode failure or timeout the cached
//! channel is evicted and closed before the error is returned, so the next
//! call redials. There is no automatic retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};

use crate::cluster::Node;
use crate::error::{Error, Result};
use crate::models::{Document, SearchRequest, SearchResult};

use super::protocol::{PeerRequest, PeerResponse, RequestType};

/// Deadline for one request-response exchange, encode plus decode.
const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

struct PeerChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct Forwarder {
    channels: RwLock<HashMap<String, Arc<Mutex<PeerChannel>>>>,
}

impl Forwarder {
    pub fn new() -> Arc<Forwarder> {
        Arc::new(Forwarder {
            channels: RwLock::new(HashMap::new()),
        })
    }

    pub async fn forward_index(
        &self,
        node: &Node,
        index_name: &str,
        id: &str,
        doc: &Document,
    ) -> Result<()> {
        let mut req = PeerRequest::new(RequestType::Index, index_name);
        req.id = Some(id.to_string());
        req.data = Some(doc.clone());
        self.call(node, &req).await?;
        Ok(())
    }

    pub async fn forward_batch_index(
        &self,
        node: &Node,
        index_name: &str,
        ids: Vec<String>,
        docs: Vec<Document>,
    ) -> Result<()> {
        let mut req = PeerRequest::new(RequestType::BatchIndex, index_name);
        req.batch_ids = Some(ids);
        req.batch_docs = Some(docs);
        self.call(node, &req).await?;
        Ok(())
    }

    pub async fn forward_get(
        &self,
        node: &Node,
        index_name: &str,
        id: &str,
    ) -> Result<Option<Document>> {
        let mut req = PeerRequest::new(RequestType::Get, index_name);
        req.id = Some(id.to_string());
        let resp = self.call(node, &req).await?;
        Ok(resp.data)
    }

    pub async fn forward_delete(&self, node: &Node, index_name: &str, id: &str) -> Result<()> {
        let mut req = PeerRequest::new(RequestType::Delete, index_name);
        req.id = Some(id.to_string());
        self.call(node, &req).await?;
        Ok(())
    }

    pub async fn forward_search(
        &self,
        node: &Node,
        index_name: &str,
        search_req: &SearchRequest,
    ) -> Result<SearchResult> {
        let mut req = PeerRequest::new(RequestType::Search, index_name);
        req.search_req = Some(search_req.clone());
        let resp = self.call(node, &req).await?;
        Ok(resp.search_result.unwrap_or_default())
    }

    pub async fn forward_create_index(
        &self,
        node: &Node,
        index_name: &str,
        num_shards: u32,
    ) -> Result<()> {
        let mut req = PeerRequest::new(RequestType::CreateIndex, index_name);
        req.num_shards = Some(num_shards);
        self.call(node, &req).await?;
        Ok(())
    }

    async fn call(&self, node: &Node, req: &PeerRequest) -> Result<PeerResponse> {
        let channel = self.channel(node).await?;
        let mut guard = channel.lock().await;

        let mut resp = match tokio::time::timeout(REQUEST_DEADLINE, roundtrip(&mut guard, req))
            .await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                drop(guard);
                self.evict(&node.id).await;
                return Err(e);
            }
            Err(_) => {
                drop(guard);
                self.evict(&node.id).await;
                return Err(Error::Transport(format!(
                    "request to {} timed out after {:?}",
                    node.id, REQUEST_DEADLINE
                )));
            }
        };

        // An error reported by the peer travelled over a healthy channel;
        // keep it cached.
        if let Some(err) = resp.err.take() {
            return Err(Error::Remote(err));
        }
        Ok(resp)
    }

    async fn channel(&self, node: &Node) -> Result<Arc<Mutex<PeerChannel>>> {
        {
            let channels = self.channels.read().await;
            if let Some(channel) = channels.get(&node.id) {
                return Ok(channel.clone());
            }
        }

        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get(&node.id) {
            return Ok(channel.clone());
        }

        let stream = TcpStream::connect(&node.addr)
            .await
            .map_err(|e| Error::Transport(format!("dial {} ({}): {}", node.id, node.addr, e)))?;
        let (read_half, write_half) = stream.into_split();
        let channel = Arc::new(Mutex::new(PeerChannel {
            reader: BufReader::new(read_half),
            writer: write_half,
        }));
        channels.insert(node.id.clone(), channel.clone());
        tracing::debug!("Opened cluster channel to {} at {}", node.id, node.addr);
        Ok(channel)
    }

    async fn evict(&self, node_id: &str) {
        let mut channels = self.channels.write().await;
        if channels.remove(node_id).is_some() {
            tracing::warn!("Evicted cluster channel to {}", node_id);
        }
    }
}

async fn roundtrip(channel: &mut PeerChannel, req: &PeerRequest) -> Result<PeerResponse> {
    let mut frame = serde_json::to_vec(req)
        .map_err(|e| Error::Transport(format!("encode request: {}", e)))?;
    frame.push(b'\n');
    channel
        .writer
        .write_all(&frame)
        .await
        .map_err(|e| Error::Transport(format!("send request: {}", e)))?;

    let mut line = String::new();
    let n = channel
        .reader
        .read_line(&mut line)
        .await
        .map_err(|e| Error::Transport(format!("read response: {}", e)))?;
    if n == 0 {
        return Err(Error::Transport("peer closed the connection".to_string()));
    }
    serde_json::from_str(&line).map_err(|e| Error::Transport(format!("decode response: {}", e)))
}
