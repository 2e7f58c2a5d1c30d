//! End-to-end scenarios: a host and a peer engine negotiating through a
//! shared in-memory mailbox over the mock network.

use peerlink_client::{LinkHandle, LinkOptions, Messages, MockNetwork};
use link_core::{LinkState, LinkStatus, Timings};
use link_mailbox::{Mailbox, MemoryMailbox};
use link_types::{AppMessage, Role, SessionId};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(120);

struct World {
    mailbox: Arc<MemoryMailbox>,
    network: Arc<MockNetwork>,
    session: SessionId,
}

impl World {
    fn new() -> Self {
        Self {
            mailbox: Arc::new(MemoryMailbox::new()),
            network: Arc::new(MockNetwork::new()),
            session: SessionId::new("T1").unwrap(),
        }
    }

    fn spawn(&self, role: Role, timings: Timings) -> (LinkHandle, Messages) {
        LinkHandle::spawn(
            LinkOptions::new(self.session.clone(), role).with_timings(timings),
            self.mailbox.clone(),
            self.network.clone(),
        )
    }
}

async fn wait(handle: &LinkHandle, predicate: impl FnMut(&LinkState) -> bool) -> LinkState {
    timeout(DEADLINE, handle.wait_for(predicate))
        .await
        .expect("state not reached in time")
        .unwrap()
}

async fn join(world: &World) -> (LinkHandle, Messages, LinkHandle, Messages) {
    let (host, host_messages) = world.spawn(Role::Host, Timings::default());
    let (peer, peer_messages) = world.spawn(Role::Peer, Timings::default());
    host.connect().unwrap();
    peer.connect().unwrap();

    wait(&host, |s| s.status == LinkStatus::Host).await;
    wait(&peer, |s| s.status == LinkStatus::Connected).await;
    (host, host_messages, peer, peer_messages)
}

#[tokio::test(start_paused = true)]
async fn peer_joins_hosted_session() {
    let world = World::new();
    let (host, mut host_messages, peer, _peer_messages) = join(&world).await;

    let host_state = host.state();
    assert_eq!(host_state.connected_peers, 1);
    assert_eq!(host_state.reconnect_attempts, 0);
    assert!(host_state.error.is_none());
    assert_eq!(peer.state().connected_peers, 1);

    let record = world
        .mailbox
        .get_session(&world.session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&record.host_id, host.local_id());
    assert_eq!(record.connected_peers, vec![peer.local_id().clone()]);
    assert!(record.metadata.ready_for_connections);

    assert!(peer
        .send("state-update", &json!({ "round": 1 }))
        .await
        .unwrap());
    let message = timeout(DEADLINE, host_messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.kind, "state-update");
    assert_eq!(message.payload, json!({ "round": 1 }));
    assert!(message.is_supported());

    let sent = world.network.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(AppMessage::from_bytes(&sent[0]).unwrap().kind, "state-update");
}

#[tokio::test(start_paused = true)]
async fn peer_waits_for_late_host() {
    let world = World::new();
    let (peer, _peer_messages) = world.spawn(Role::Peer, Timings::default());
    peer.connect().unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(peer.state().status, LinkStatus::Connecting);
    assert_eq!(peer.state().reconnect_attempts, 0);

    let (host, _host_messages) = world.spawn(Role::Host, Timings::default());
    host.connect().unwrap();
    wait(&peer, |s| s.status == LinkStatus::Connected).await;
    wait(&host, |s| s.status == LinkStatus::Host).await;
}

#[tokio::test(start_paused = true)]
async fn dropped_link_reconnects() {
    let world = World::new();
    let (host, _host_messages, peer, _peer_messages) = join(&world).await;

    assert_eq!(world.network.drop_links(), 2);

    let dropped = wait(&peer, |s| s.status == LinkStatus::Connecting).await;
    assert_eq!(dropped.reconnect_attempts, 1);
    assert_eq!(dropped.error.as_deref(), Some("link dropped"));

    let restored = wait(&peer, |s| s.status == LinkStatus::Connected).await;
    assert_eq!(restored.reconnect_attempts, 0);
    assert!(restored.error.is_none());
    let host_state = wait(&host, |s| s.status == LinkStatus::Host).await;
    assert_eq!(host_state.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn peer_gives_up_without_host() {
    let world = World::new();
    let timings = Timings {
        host_ready_timeout: Duration::from_secs(5),
        reconnect_delay: Duration::from_secs(1),
        max_reconnect_attempts: 3,
        ..Timings::default()
    };
    let (peer, _messages) = world.spawn(Role::Peer, timings);
    peer.connect().unwrap();

    let state = wait(&peer, |s| {
        s.status == LinkStatus::Disconnected && s.error.is_some()
    })
    .await;
    assert_eq!(state.reconnect_attempts, 3);
    assert_eq!(state.error.as_deref(), Some("host did not become ready"));
    assert_eq!(world.network.opened(), 4);

    // No further attempts are scheduled.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(world.network.opened(), 4);
    assert_eq!(peer.state().status, LinkStatus::Disconnected);

    // A new connect starts over.
    peer.connect().unwrap();
    let state = wait(&peer, |s| s.status == LinkStatus::Connecting).await;
    assert_eq!(state.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn cleanup_twice_is_harmless() {
    let world = World::new();
    let (host, _host_messages, peer, _peer_messages) = join(&world).await;

    host.cleanup(true).await.unwrap();
    host.cleanup(true).await.unwrap();
    assert_eq!(host.state(), LinkState::disconnected());
    assert!(world
        .mailbox
        .get_session(&world.session)
        .await
        .unwrap()
        .is_none());

    let state = wait(&peer, |s| s.status == LinkStatus::Connecting).await;
    assert_eq!(state.reconnect_attempts, 1);
    assert!(!peer.send("ping", &()).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn dropping_handles_closes_connections() {
    let world = World::new();
    let (host, _host_messages, peer, _peer_messages) = join(&world).await;
    assert_eq!(world.network.open_channels(), 2);

    drop(host);
    drop(peer);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(world.network.live_endpoints(), 0);

    // Without complete cleanup the session stays for the janitor.
    assert!(world
        .mailbox
        .get_session(&world.session)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_answer_is_retried() {
    let world = World::new();
    world.network.fail_next_answer("answer rejected");
    let (host, _host_messages, peer, _peer_messages) = join(&world).await;

    // The host's first connection was replaced by the retry.
    assert!(world.network.opened() >= 3);
    assert_eq!(world.network.endpoints_with_role(Role::Host), 1);
    assert_eq!(world.network.endpoints_with_role(Role::Peer), 1);
    assert_eq!(host.state().reconnect_attempts, 0);
    assert!(host.state().error.is_none());
    assert!(peer.send("ping", &()).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn rejected_candidate_does_not_break_the_link() {
    let world = World::new();
    world.network.fail_next_candidate("stale ufrag");
    let (host, _host_messages, peer, mut peer_messages) = join(&world).await;

    assert_eq!(world.network.opened(), 2);
    assert_eq!(peer.state().reconnect_attempts, 0);
    assert!(peer.state().error.is_none());

    assert!(host.send("ping", &()).await.unwrap());
    let message = timeout(DEADLINE, peer_messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.kind, "ping");
}

#[tokio::test(start_paused = true)]
async fn failed_send_reports_not_delivered() {
    let world = World::new();
    let (_host, mut host_messages, peer, _peer_messages) = join(&world).await;

    world.network.fail_next_send("buffer full");
    assert!(!peer.send("ping", &json!({ "n": 1 })).await.unwrap());

    // The link stays up and the next message goes through.
    assert_eq!(peer.state().status, LinkStatus::Connected);
    assert!(peer.send("ping", &json!({ "n": 2 })).await.unwrap());
    let message = timeout(DEADLINE, host_messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.payload, json!({ "n": 2 }));
}
