//! Node configuration.
//!
//! Every section deserializes with `#[serde(default)]`, so a TOML file only needs
//! to name the values it overrides. Command line flags parsed in `main.rs` are
//! applied on top of the file.

use crate::codec::Codec;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Gossip address of this node.
    pub bind: Option<SocketAddr>,
    /// HTTP address; defaults to the gossip port + 1000.
    pub http: Option<SocketAddr>,
    pub seeds: Vec<SocketAddr>,
    pub membership: MembershipConfig,
    pub engine: EngineConfig,
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub gossip_interval_ms: u64,
    pub failure_detection_interval_ms: u64,
    pub suspect_timeout_ms: u64,
    pub dead_timeout_ms: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            gossip_interval_ms: 500,
            failure_detection_interval_ms: 2_000,
            suspect_timeout_ms: 5_000,
            dead_timeout_ms: 10_000,
        }
    }
}

impl MembershipConfig {
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn failure_detection_interval(&self) -> Duration {
        Duration::from_millis(self.failure_detection_interval_ms)
    }

    pub fn suspect_timeout(&self) -> Duration {
        Duration::from_millis(self.suspect_timeout_ms)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of store partitions.
    pub partitions: u32,
    /// Logical queue name used in every mediator key of this node.
    pub queue_name: String,
    /// Workers started by `CommandEngine::start`.
    pub workers: usize,
    /// Execution turns a single worker runs at the same time (distinct contexts only).
    pub worker_concurrency: usize,
    pub lease_duration_ms: u64,
    pub monitor_interval_ms: u64,
    /// Idle worker wake-up interval when no notification arrives.
    pub poll_interval_ms: u64,
    pub codec: Codec,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partitions: 256,
            queue_name: "commands".to_string(),
            workers: 4,
            worker_concurrency: 4,
            lease_duration_ms: 30_000,
            monitor_interval_ms: 1_000,
            poll_interval_ms: 100,
            codec: Codec::Json,
        }
    }
}

impl EngineConfig {
    /// Workers renew three times per lease period.
    pub fn lease_renewal_interval(&self) -> Duration {
        Duration::from_millis((self.lease_duration_ms / 3).max(1))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
