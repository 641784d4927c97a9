use std::time::Duration;

use psmd_core::{PeerAddress, PeerId, Topic};
use psmd_services::{MemoryNetwork, PeerDirectory, RendezvousClient, SessionState};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Discovery
// ══════════════════════════════════════════════════════════════════════════════

/// Two nodes join the same seed through one server and find each other at
/// the addresses the server saw them from.
#[tokio::test]
async fn test_two_udp_nodes_discover_each_other() {
    let server = TestServer::start(Duration::from_secs(60)).await.unwrap();
    let topic = Topic::derive("psmd/chat").unwrap();

    let a = udp_node(server.addr, "nodeA").await.unwrap();
    let b = udp_node(server.addr, "nodeB").await.unwrap();
    let a_addr = a.transport().local_addr().unwrap();
    let b_addr = b.transport().local_addr().unwrap();

    let session_a = a.join(&topic).unwrap();
    let session_b = b.join(&topic).unwrap();

    wait_for_condition(10, || {
        a.directory().size_of(&topic.id()) == 1 && b.directory().size_of(&topic.id()) == 1
    })
    .await
    .unwrap();

    let seen_by_a = &a.directory().list_active(&topic.id())[0];
    assert_eq!(seen_by_a.peer_id, PeerId::from("nodeB"));
    assert_eq!(seen_by_a.address, b_addr.to_string());

    let seen_by_b = &b.directory().list_active(&topic.id())[0];
    assert_eq!(seen_by_b.peer_id, PeerId::from("nodeA"));
    assert_eq!(seen_by_b.address, a_addr.to_string());

    assert_eq!(server.directory.size_of(&topic.id()), 2);

    assert_eq!(session_a.leave().await, SessionState::Closed);
    assert_eq!(session_b.leave().await, SessionState::Closed);
    server.stop().await;
}

/// Different seeds never mix.
#[tokio::test]
async fn test_topics_are_isolated() {
    let server = TestServer::start(Duration::from_secs(60)).await.unwrap();
    let chat = Topic::derive("psmd/chat").unwrap();
    let files = Topic::derive("psmd/files").unwrap();

    let a = udp_node(server.addr, "nodeA").await.unwrap();
    let b = udp_node(server.addr, "nodeB").await.unwrap();
    let session_a = a.join(&chat).unwrap();
    let session_b = b.join(&files).unwrap();

    wait_for_condition(10, || {
        server.directory.size_of(&chat.id()) == 1 && server.directory.size_of(&files.id()) == 1
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(a.directory().total(), 0);
    assert_eq!(b.directory().total(), 0);

    session_a.leave().await;
    session_b.leave().await;
    server.stop().await;
}

/// Three nodes on one memory network, sharing one directory, end up with
/// each other's records and never their own.
#[tokio::test]
async fn test_memory_network_mesh() {
    let net = MemoryNetwork::new();
    let topic = Topic::derive("psmd/mesh").unwrap();

    let nodes: Vec<_> = ["n1", "n2", "n3"]
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let addr = format!("10.0.0.{}:1883", i + 1);
            RendezvousClient::new(net.transport(*id, addr), PeerDirectory::new(), fast_settings())
                .unwrap()
                .with_local_peer(PeerId::from(*id))
        })
        .collect();

    let sessions: Vec<_> = nodes.iter().map(|n| n.join(&topic).unwrap()).collect();

    wait_for_condition(10, || {
        nodes.iter().all(|n| n.directory().size_of(&topic.id()) == 2)
    })
    .await
    .unwrap();

    let n1_peers: Vec<PeerAddress> = nodes[0]
        .directory()
        .list_active(&topic.id())
        .into_iter()
        .map(|r| PeerAddress::new(r.peer_id, r.address))
        .collect();
    assert!(n1_peers.contains(&PeerAddress::new("n2", "10.0.0.2:1883")));
    assert!(n1_peers.contains(&PeerAddress::new("n3", "10.0.0.3:1883")));

    for s in sessions {
        s.leave().await;
    }
}
