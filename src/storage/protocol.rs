//! Storage Network Protocol
//!
//! Internal endpoints a `DistributedMap` exposes to its peers. Every path is
//! prefixed with the map's base path (for example `/contexts`).

use serde::{Deserialize, Serialize};

/// Direct key retrieval on the node that holds the key.
pub const ENDPOINT_GET_INTERNAL: &str = "/internal/get";

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    /// `None` when the key does not exist on the answering node.
    pub value_json: Option<String>,
}
