use std::time::Duration;

use psmd_core::Topic;
use psmd_services::{DiscoveryEvent, SessionState};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Session Lifecycle
// ══════════════════════════════════════════════════════════════════════════════

/// Join, leave, and join again on the same client.
#[tokio::test]
async fn test_leave_then_rejoin() {
    let server = TestServer::start(Duration::from_secs(60)).await.unwrap();
    let topic = Topic::derive("psmd/chat").unwrap();
    let node = udp_node(server.addr, "nodeA").await.unwrap();

    let first = node.join(&topic).unwrap();
    let mut states = Vec::new();
    let mut events = first.subscribe();
    assert!(first.wait_for(SessionState::Active).await);
    assert_eq!(first.leave().await, SessionState::Closed);

    while let Ok(ev) = events.try_recv() {
        if let DiscoveryEvent::StateChanged { state, .. } = ev {
            states.push(state);
        }
    }
    assert_eq!(states, vec![SessionState::Active, SessionState::Leaving, SessionState::Closed]);

    let second = node.join(&topic).unwrap();
    assert!(second.wait_for(SessionState::Active).await);
    assert_eq!(node.active_topics(), vec![topic.id()]);
    second.leave().await;
    assert!(node.active_topics().is_empty());

    server.stop().await;
}

/// A node that leaves stops refreshing; the server forgets it after its TTL
/// and other nodes forget it after theirs.
#[tokio::test]
async fn test_departed_peer_expires() {
    let server = TestServer::start(Duration::from_secs(2)).await.unwrap();
    let topic = Topic::derive("psmd/chat").unwrap();

    let stayer = udp_node(server.addr, "stayer").await.unwrap();
    let leaver = udp_node(server.addr, "leaver").await.unwrap();
    let stay = stayer.join(&topic).unwrap();
    let leave = leaver.join(&topic).unwrap();

    wait_for_condition(10, || stayer.directory().size_of(&topic.id()) == 1)
        .await
        .unwrap();
    leave.leave().await;

    wait_for_condition(10, || server.directory.size_of(&topic.id()) == 1)
        .await
        .unwrap();

    // Lookups no longer refresh it, but the stayer's directory keeps the
    // record until a sweep removes it.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(stayer.directory().size_of(&topic.id()), 1);
    let removed = stayer
        .directory()
        .expire_older_than(tokio::time::Instant::now(), Duration::from_secs(1));
    assert_eq!(removed, 1);

    stay.leave().await;
    server.stop().await;
}
