use std::time::Duration;

use psmd_core::wire::{Message, MAX_DATAGRAM};
use psmd_core::{PeerId, Topic, TopicId};
use psmd_services::{DiscoveryEvent, Operation, SessionState, Transport, UdpTransport};
use tokio::net::UdpSocket;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Transport Failures
// ══════════════════════════════════════════════════════════════════════════════

/// With no server behind the address, bootstrap fails, the session still
/// goes active, and repeated failures surface as Degraded events.
#[tokio::test]
async fn test_unreachable_server_degrades_but_stays_active() {
    // Bind and drop to get a port nobody listens on.
    let dead = {
        let s = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        s.local_addr().unwrap()
    };
    let node = udp_node(dead, "nodeA").await.unwrap();
    let topic = Topic::derive("psmd/chat").unwrap();

    let session = node.join(&topic).unwrap();
    let mut events = session.subscribe();
    assert!(session.wait_for(SessionState::Active).await);

    let degraded = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            if let Ok(DiscoveryEvent::Degraded(d)) = events.recv().await {
                return d;
            }
        }
    })
    .await
    .expect("no degraded event");

    assert!(degraded.consecutive_failures >= 2);
    assert!(matches!(degraded.operation, Operation::Announce | Operation::Lookup));
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(node.directory().size_of(&topic.id()), 0);

    assert_eq!(session.leave().await, SessionState::Closed);
}

/// Garbage on the server port is dropped and the server keeps answering.
#[tokio::test]
async fn test_server_survives_garbage() {
    let server = TestServer::start(Duration::from_secs(60)).await.unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    raw.send_to(b"not a psmd datagram", server.addr).await.unwrap();
    raw.send_to(&[0u8; 10], server.addr).await.unwrap();

    let lookup = Message::Lookup {
        request_id: 77,
        topic: TopicId([1u8; 32]),
    };
    raw.send_to(&lookup.encode().unwrap(), server.addr).await.unwrap();

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), raw.recv_from(&mut buf))
        .await
        .expect("no reply")
        .unwrap();
    match Message::decode(&buf[..len]).unwrap() {
        Message::Peers { request_id, peers, .. } => {
            assert_eq!(request_id, 77);
            assert!(peers.is_empty());
        }
        other => panic!("expected peers, got {other:?}"),
    }

    server.stop().await;
}

/// A client recovers once its server comes back on the same port.
#[tokio::test]
async fn test_client_recovers_after_server_restart() {
    let server = TestServer::start(Duration::from_secs(60)).await.unwrap();
    let addr = server.addr;
    let topic = Topic::derive("psmd/chat").unwrap();

    let transport = UdpTransport::connect(&addr.to_string(), PeerId::from("nodeA"), 0)
        .await
        .unwrap();
    transport.announce(&topic.id()).await.unwrap();
    server.stop().await;

    // Either refused outright or left waiting for a reply.
    let down = tokio::time::timeout(Duration::from_secs(1), transport.announce(&topic.id())).await;
    assert!(!matches!(down, Ok(Ok(()))));

    let restarted = psmd_services::RendezvousServer::bind(&addr.to_string(), Duration::from_secs(60))
        .await
        .unwrap();
    let directory = restarted.directory().clone();
    let (tx, rx) = tokio::sync::broadcast::channel(1);
    let task = tokio::spawn(restarted.run(rx));

    transport.announce(&topic.id()).await.unwrap();
    assert_eq!(directory.size_of(&topic.id()), 1);

    let _ = tx.send(());
    task.await.unwrap();
}
