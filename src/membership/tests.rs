//! Membership Module Tests
//!
//! ## Test Scopes
//! - **Data Structures**: id uniqueness and wire protocol encoding.
//! - **Service Logic**: initialization, address derivation and member lookup.

#[cfg(test)]
mod tests {
    use crate::config::MembershipConfig;
    use crate::membership::service::{HTTP_PORT_OFFSET, MembershipService, default_http_addr};
    use crate::membership::types::{GossipMessage, Node, NodeId, NodeState};
    use std::net::SocketAddr;
    use std::time::Instant;

    fn sample_node(id: &str, state: NodeState) -> Node {
        Node {
            id: NodeId(id.to_string()),
            gossip_addr: "10.0.0.1:5000".parse().unwrap(),
            http_addr: "10.0.0.1:6000".parse().unwrap(),
            state,
            incarnation: 3,
            last_seen: Some(Instant::now()),
        }
    }

    // ============================================================
    // DATA STRUCTURES
    // ============================================================

    #[test]
    fn test_node_id_is_unique() {
        assert_ne!(NodeId::new(), NodeId::new(), "Each NodeId should be unique");
    }

    #[test]
    fn test_node_ids_sort_by_value() {
        let mut ids = vec![NodeId("c".into()), NodeId("a".into()), NodeId("b".into())];
        ids.sort();
        assert_eq!(ids, vec![NodeId("a".into()), NodeId("b".into()), NodeId("c".into())]);
    }

    #[test]
    fn test_ping_bincode_round_trip_keeps_http_addr() {
        let http_addr: SocketAddr = "192.168.1.7:6001".parse().unwrap();
        let msg = GossipMessage::Ping {
            from: NodeId("pinger".into()),
            incarnation: 9,
            http_addr,
        };

        let encoded = bincode::serialize(&msg).expect("encode");
        let decoded: GossipMessage = bincode::deserialize(&encoded).expect("decode");

        match decoded {
            GossipMessage::Ping {
                from,
                incarnation,
                http_addr: decoded_addr,
            } => {
                assert_eq!(from, NodeId("pinger".into()));
                assert_eq!(incarnation, 9);
                assert_eq!(decoded_addr, http_addr);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_ack_carries_members_without_last_seen() {
        let msg = GossipMessage::Ack {
            from: NodeId("a".into()),
            incarnation: 1,
            members: vec![sample_node("a", NodeState::Alive), sample_node("b", NodeState::Suspect)],
        };

        let decoded: GossipMessage = bincode::deserialize(&bincode::serialize(&msg).unwrap()).unwrap();

        let GossipMessage::Ack { members, .. } = decoded else {
            panic!("expected ack");
        };
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].state, NodeState::Suspect);
        assert!(members.iter().all(|m| m.last_seen.is_none()));
    }

    // ============================================================
    // SERVICE
    // ============================================================

    #[test]
    fn test_default_http_addr_offsets_port() {
        let gossip: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(default_http_addr(gossip).port(), 5000 + HTTP_PORT_OFFSET);

        let high: SocketAddr = "127.0.0.1:65000".parse().unwrap();
        assert_eq!(default_http_addr(high).port(), 65000, "overflow keeps the gossip port");
    }

    #[tokio::test]
    async fn test_membership_creation_resolves_bound_port() {
        let service = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .expect("Failed to create service");

        assert_eq!(service.members.len(), 1);
        assert_ne!(service.local_node.gossip_addr.port(), 0);

        let alive = service.get_alive_members();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].id, *service.local_id());
    }

    #[tokio::test]
    async fn test_explicit_http_addr_is_advertised() {
        let http: SocketAddr = "127.0.0.1:18080".parse().unwrap();
        let service = MembershipService::with_config(
            "127.0.0.1:0".parse().unwrap(),
            Some(http),
            vec![],
            MembershipConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(service.local_node.http_addr, http);
        let me = service.get_member(service.local_id()).expect("local member present");
        assert_eq!(me.http_addr, http);
    }

    #[tokio::test]
    async fn test_dead_members_are_not_alive() {
        let service = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();
        let dead = sample_node("gone", NodeState::Dead);
        service.members.insert(dead.id.clone(), dead.clone());

        assert_eq!(service.members.len(), 2);
        assert_eq!(service.get_alive_members().len(), 1);
        assert!(!service.is_alive(&dead.id));
        assert!(service.is_alive(service.local_id()));
        assert!(service.get_member(&NodeId("unknown".into())).is_none());
    }
}
