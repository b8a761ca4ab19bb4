use serde::{Deserialize, Serialize};

/// One member of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier, unique within the cluster configuration.
    pub id: String,
    /// `host:port` of the node's internal cluster listener.
    pub addr: String,
}

impl Node {
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Node {
        Node {
            id: id.into(),
            addr: addr.into(),
        }
    }
}
