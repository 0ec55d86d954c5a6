use anyhow::Result;
use dashmap::DashMap;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

use super::types::{GossipMessage, Node, NodeId, NodeState};
use crate::config::MembershipConfig;

/// Offset between the gossip port and the default HTTP port of a node.
pub const HTTP_PORT_OFFSET: u16 = 1000;

pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    socket: Arc<UdpSocket>,
    incarnation: Arc<RwLock<u64>>,
    config: MembershipConfig,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl MembershipService {
    pub async fn new(bind_addr: SocketAddr, seed_nodes: Vec<SocketAddr>) -> Result<Arc<Self>> {
        Self::with_config(bind_addr, None, seed_nodes, MembershipConfig::default()).await
    }

    pub async fn with_config(
        bind_addr: SocketAddr,
        http_addr: Option<SocketAddr>,
        seed_nodes: Vec<SocketAddr>,
        config: MembershipConfig,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let gossip_addr = socket.local_addr()?;
        let http_addr = http_addr.unwrap_or_else(|| default_http_addr(gossip_addr));

        let local_node = Node {
            id: NodeId::new(),
            gossip_addr,
            http_addr,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        };

        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        if !seed_nodes.is_empty() {
            info!("Joining cluster via {} seed node(s)", seed_nodes.len());
            let encoded = bincode::serialize(&GossipMessage::Join {
                node: local_node.clone(),
            })?;
            for seed in &seed_nodes {
                socket.send_to(&encoded, seed).await?;
                info!("Sent join request to {}", seed);
            }
        }

        Ok(Arc::new(Self {
            local_node,
            members,
            socket: Arc::new(socket),
            incarnation: Arc::new(RwLock::new(1)),
            config,
            background: Mutex::new(Vec::new()),
        }))
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_node.id
    }

    /// Spawns the gossip, receive and failure detection loops.
    pub fn start(self: &Arc<Self>) {
        info!(
            "Starting membership for {} (gossip {}, http {})",
            self.local_node.id, self.local_node.gossip_addr, self.local_node.http_addr
        );

        let handles = vec![
            tokio::spawn(self.clone().gossip_loop()),
            tokio::spawn(self.clone().receive_loop()),
            tokio::spawn(self.clone().failure_detection_loop()),
        ];

        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(handles);
    }

    pub fn shutdown(&self) {
        let mut handles = self
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().is_alive())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get_member(&self, node_id: &NodeId) -> Option<Node> {
        self.members.get(node_id).map(|entry| entry.value().clone())
    }

    pub fn is_alive(&self, node_id: &NodeId) -> bool {
        self.members
            .get(node_id)
            .map(|entry| entry.value().is_alive())
            .unwrap_or(false)
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval());

        loop {
            interval.tick().await;

            let peers: Vec<Node> = self
                .members
                .iter()
                .filter(|entry| entry.value().id != self.local_node.id && entry.value().is_alive())
                .map(|entry| entry.value().clone())
                .collect();

            if peers.is_empty() {
                continue;
            }

            let target = &peers[rand::thread_rng().gen_range(0..peers.len())];
            let msg = GossipMessage::Ping {
                from: self.local_node.id.clone(),
                incarnation: *self.incarnation.read().await,
                http_addr: self.local_node.http_addr,
            };

            match bincode::serialize(&msg) {
                Ok(encoded) => {
                    if let Err(e) = self.socket.send_to(&encoded, target.gossip_addr).await {
                        tracing::warn!("Failed to ping {}: {}", target.id, e);
                    } else {
                        tracing::trace!("Pinged {}", target.id);
                    }
                }
                Err(e) => tracing::error!("Failed to encode ping: {}", e),
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling gossip from {}: {}", src, e);
                        }
                    }
                    Err(e) => tracing::warn!("Undecodable gossip from {}: {}", src, e),
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(self.config.gossip_interval()).await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping {
                from,
                incarnation,
                http_addr,
            } => self.handle_ping(from, incarnation, http_addr, src).await,
            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members);
                Ok(())
            }
            GossipMessage::Join { node } => {
                self.handle_join(node, src);
                Ok(())
            }
            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => self.handle_suspect(node_id, incarnation).await,
            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation);
                Ok(())
            }
        }
    }

    async fn handle_ping(
        &self,
        from: NodeId,
        incarnation: u64,
        http_addr: SocketAddr,
        src: SocketAddr,
    ) -> Result<()> {
        match self.members.get_mut(&from) {
            Some(mut member) => {
                member.last_seen = Some(Instant::now());
                if incarnation > member.incarnation {
                    member.incarnation = incarnation;
                }
            }
            None => {
                info!("Discovered member {} via ping from {}", from, src);
                self.members.insert(
                    from.clone(),
                    Node {
                        id: from.clone(),
                        gossip_addr: src,
                        http_addr,
                        state: NodeState::Alive,
                        incarnation,
                        last_seen: Some(Instant::now()),
                    },
                );
            }
        }

        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: *self.incarnation.read().await,
            members: self.members.iter().map(|entry| entry.value().clone()).collect(),
        };
        self.socket.send_to(&bincode::serialize(&reply)?, src).await?;
        Ok(())
    }

    fn handle_ack(&self, from: NodeId, incarnation: u64, members: Vec<Node>) {
        if let Some(mut member) = self.members.get_mut(&from) {
            member.last_seen = Some(Instant::now());
            if incarnation > member.incarnation {
                member.incarnation = incarnation;
            }
        }

        for member in members {
            self.merge_member(member);
        }
    }

    fn merge_member(&self, incoming: Node) {
        match self.members.get_mut(&incoming.id) {
            Some(mut existing) => {
                if incoming.incarnation > existing.incarnation {
                    existing.state = incoming.state;
                    existing.incarnation = incoming.incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if incoming.incarnation == existing.incarnation
                    && incoming.is_alive()
                    && existing.state == NodeState::Suspect
                {
                    info!("{} refuted suspicion", incoming.id);
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                info!("Discovered member {} at {}", incoming.id, incoming.gossip_addr);
                let mut node = incoming;
                node.last_seen = Some(Instant::now());
                self.members.insert(node.id.clone(), node);
            }
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) -> Result<()> {
        if node_id == self.local_node.id {
            let refuted = {
                let mut current = self.incarnation.write().await;
                *current = (*current).max(incarnation) + 1;
                *current
            };
            info!("Refuting suspicion with incarnation {}", refuted);
            if let Some(mut me) = self.members.get_mut(&node_id) {
                me.incarnation = refuted;
                me.state = NodeState::Alive;
            }
            self.broadcast_message(GossipMessage::Alive {
                node_id,
                incarnation: refuted,
            })
            .await;
            return Ok(());
        }

        if let Some(mut existing) = self.members.get_mut(&node_id)
            && incarnation >= existing.incarnation
            && existing.is_alive()
        {
            info!("Node {} at {} suspected", existing.id, existing.gossip_addr);
            existing.state = NodeState::Suspect;
            existing.incarnation = incarnation;
        }
        Ok(())
    }

    fn handle_alive(&self, node_id: NodeId, incarnation: u64) {
        match self.members.get_mut(&node_id) {
            Some(mut existing) if incarnation >= existing.incarnation => {
                if existing.state != NodeState::Alive {
                    info!("Node {} is alive again (inc={})", existing.id, incarnation);
                }
                existing.state = NodeState::Alive;
                existing.incarnation = incarnation;
                existing.last_seen = Some(Instant::now());
            }
            Some(_) => {}
            None => tracing::debug!("Alive message for unknown node {}", node_id),
        }
    }

    fn handle_join(&self, mut node: Node, src: SocketAddr) {
        info!("Node {} joining cluster from {}", node.id, src);
        node.gossip_addr = src;
        node.state = NodeState::Alive;
        node.last_seen = Some(Instant::now());
        self.members.insert(node.id.clone(), node);
        info!("Cluster size now: {}", self.members.len());
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.failure_detection_interval());
        let suspect_after = self.config.suspect_timeout();
        let dead_after = self.config.dead_timeout();

        loop {
            interval.tick().await;
            let now = Instant::now();
            let mut suspicions = Vec::new();

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();
                if member.id == self.local_node.id {
                    continue;
                }

                let Some(last_seen) = member.last_seen else {
                    member.last_seen = Some(now);
                    continue;
                };
                let silent_for = now.duration_since(last_seen);

                match member.state {
                    NodeState::Alive if silent_for > suspect_after => {
                        tracing::warn!("Node {} suspected (silent for {:?})", member.id, silent_for);
                        member.state = NodeState::Suspect;
                        suspicions.push(GossipMessage::Suspect {
                            node_id: member.id.clone(),
                            incarnation: member.incarnation,
                        });
                    }
                    NodeState::Suspect if silent_for > dead_after => {
                        tracing::warn!("Node {} declared dead (silent for {:?})", member.id, silent_for);
                        member.state = NodeState::Dead;
                    }
                    _ => {}
                }
            }

            for msg in suspicions {
                self.broadcast_message(msg).await;
            }
        }
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        let encoded = match bincode::serialize(&msg) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("Failed to encode gossip broadcast: {}", e);
                return;
            }
        };

        let targets: Vec<(NodeId, SocketAddr)> = self
            .members
            .iter()
            .filter(|entry| entry.value().id != self.local_node.id && entry.value().is_alive())
            .map(|entry| (entry.value().id.clone(), entry.value().gossip_addr))
            .collect();

        for (id, addr) in targets {
            if let Err(e) = self.socket.send_to(&encoded, addr).await {
                tracing::warn!("Failed to broadcast to {}: {}", id, e);
            }
        }
    }
}

/// HTTP address used when none is configured: gossip port + `HTTP_PORT_OFFSET`.
pub fn default_http_addr(gossip_addr: SocketAddr) -> SocketAddr {
    let port = gossip_addr
        .port()
        .checked_add(HTTP_PORT_OFFSET)
        .unwrap_or(gossip_addr.port());
    SocketAddr::new(gossip_addr.ip(), port)
}
