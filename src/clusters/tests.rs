use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use super::testing::Network;
use super::*;
use crate::config::SwimConfig;
use crate::error::SwimError;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

fn config(port: u16) -> SwimConfig {
    SwimConfig {
        max_local_count: 6,
        period: Duration::from_millis(500),
        ack_timeout: Duration::from_millis(100),
        indirect_count: 2,
        bind_port: port,
        rng_seed: Some(port as u64),
        ..SwimConfig::default()
    }
}

struct Node {
    swim: Arc<Swim>,
    broadcasts: mpsc::Receiver<Broadcast>,
}

fn start_node(network: &Arc<Network>, port: u16) -> Node {
    let transport = network.attach(addr(port));
    let (swim, broadcasts) =
        Swim::new(config(port), transport, Arc::new(LocalHealth::default())).unwrap();
    swim.start().unwrap();
    Node { swim, broadcasts }
}

fn status_of(node: &Node, port: u16) -> Option<MemberStatus> {
    node.swim
        .members()
        .into_iter()
        .find(|m| m.address == addr(port))
        .map(|m| m.status)
}

/// Polls `condition` every 10ms for up to `limit` of virtual time.
async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = time::Instant::now() + limit;
    while time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn cluster(network: &Arc<Network>, ports: &[u16]) -> Vec<Node> {
    let nodes: Vec<Node> = ports.iter().map(|p| start_node(network, *p)).collect();
    for node in &nodes[1..] {
        node.swim.join(&[addr(ports[0])]).await.unwrap();
    }
    let everyone = ports.len() - 1;
    assert!(
        eventually(Duration::from_secs(10), || nodes
            .iter()
            .all(|n| n.swim.members().len() == everyone))
        .await,
        "membership did not converge"
    );
    nodes
}

#[tokio::test(start_paused = true)]
async fn test_join_populates_both_sides() {
    let network = Network::new();
    let seed = start_node(&network, 8000);
    let joiner = start_node(&network, 8001);

    let joined = joiner.swim.join(&[addr(8000)]).await.unwrap();

    assert_eq!(joined, 1);
    assert_eq!(status_of(&joiner, 8000), Some(MemberStatus::Alive));
    assert_eq!(status_of(&seed, 8001), Some(MemberStatus::Alive));
}

#[tokio::test(start_paused = true)]
async fn test_join_without_seeds_starts_alone() {
    let network = Network::new();
    let node = start_node(&network, 8000);

    assert_eq!(node.swim.join(&[]).await.unwrap(), 0);
    assert_eq!(node.swim.join(&[addr(8000)]).await.unwrap(), 0, "self is skipped");
    assert!(node.swim.members().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_join_fails_when_no_seed_answers() {
    let network = Network::new();
    let node = start_node(&network, 8000);

    let err = node
        .swim
        .join(&[addr(9998), addr(9999)])
        .await
        .unwrap_err();

    match err {
        SwimError::JoinFailed(failures) => {
            let seeds: Vec<SocketAddr> = failures.iter().map(|(s, _)| *s).collect();
            assert_eq!(seeds, vec![addr(9998), addr(9999)]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_is_rejected_before_network_activity() {
    let network = Network::new();
    let transport = network.attach(addr(8000));
    let bad = SwimConfig {
        period: Duration::from_millis(50),
        ack_timeout: Duration::from_millis(100),
        ..config(8000)
    };

    let result = Swim::new(bad, transport, Arc::new(LocalHealth::default()));

    assert!(matches!(result, Err(SwimError::InvalidConfig(_))));
    assert_eq!(network.delivered_to(addr(9000)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_is_rejected() {
    let network = Network::new();
    let node = start_node(&network, 8000);
    assert!(matches!(node.swim.start(), Err(SwimError::AlreadyStarted)));
}

#[tokio::test(start_paused = true)]
async fn test_healthy_cluster_stays_alive() {
    let network = Network::new();
    let nodes = cluster(&network, &[8000, 8001, 8002, 8003]).await;

    time::sleep(Duration::from_secs(10)).await;

    for node in &nodes {
        assert_eq!(node.swim.members().len(), 3);
        assert!(
            node.swim
                .members()
                .iter()
                .all(|m| m.status == MemberStatus::Alive),
            "false positive at {}",
            node.swim.local_address()
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_crashed_member_is_suspected_then_removed() {
    let network = Network::new();
    let nodes = cluster(&network, &[8000, 8001, 8002, 8003]).await;

    network.take_down(addr(8003));

    assert!(
        eventually(Duration::from_secs(10), || status_of(&nodes[0], 8003)
            == Some(MemberStatus::Suspect))
        .await,
        "crashed member never suspected"
    );
    assert!(
        eventually(Duration::from_secs(20), || nodes[..3]
            .iter()
            .all(|n| status_of(n, 8003).is_none()))
        .await,
        "crashed member never removed"
    );
}

#[tokio::test(start_paused = true)]
async fn test_cut_link_is_bridged_by_relays() {
    let network = Network::new();
    let nodes = cluster(&network, &[8000, 8001, 8002, 8003]).await;

    network.cut(addr(8000), addr(8001));
    time::sleep(Duration::from_secs(10)).await;

    assert_eq!(status_of(&nodes[0], 8001), Some(MemberStatus::Alive));
    assert_eq!(status_of(&nodes[1], 8000), Some(MemberStatus::Alive));
}

#[tokio::test(start_paused = true)]
async fn test_suspected_member_refutes() {
    let network = Network::new();
    let nodes = cluster(&network, &[8000, 8001, 8002]).await;

    // Node 8000 hears a rumour that 8001 is suspect.
    let rumour = Message {
        id: 0,
        address: addr(8002),
        payload: Payload::Ack {
            payload: String::new(),
        },
        piggyback: Some(PiggyBack::suspect(addr(8001), 0)),
    };
    nodes[0].swim.handle(rumour).await;
    assert_eq!(status_of(&nodes[0], 8001), Some(MemberStatus::Suspect));

    assert!(
        eventually(Duration::from_secs(10), || nodes[1].swim.incarnation() > 0).await,
        "suspect never learned of the rumour"
    );
    assert!(
        eventually(Duration::from_secs(10), || status_of(&nodes[0], 8001)
            == Some(MemberStatus::Alive))
        .await,
        "refutation never reached the accuser"
    );
}

#[tokio::test(start_paused = true)]
async fn test_gossip_reaches_every_member_once() {
    let network = Network::new();
    let mut nodes = cluster(&network, &[8000, 8001, 8002, 8003]).await;

    nodes[0].swim.gossip(b"config-v2".to_vec()).unwrap();
    time::sleep(Duration::from_secs(10)).await;

    for node in &mut nodes[1..] {
        let received = node.broadcasts.try_recv().expect("broadcast delivered");
        assert_eq!(received.origin, addr(8000));
        assert_eq!(received.data, b"config-v2".to_vec());
        assert!(node.broadcasts.try_recv().is_err(), "delivered twice");
    }
    assert!(nodes[0].broadcasts.try_recv().is_err(), "echoed to origin");
}

#[tokio::test(start_paused = true)]
async fn test_restarted_origin_broadcasts_are_not_deduplicated() {
    let network = Network::new();
    let mut nodes = cluster(&network, &[8000, 8001]).await;

    nodes[0].swim.gossip(b"before".to_vec()).unwrap();
    time::sleep(Duration::from_secs(5)).await;
    let first = nodes[1].broadcasts.try_recv().expect("first broadcast delivered");
    assert_eq!(first.data, b"before".to_vec());

    nodes[0].swim.shutdown().await;
    let restarted = start_node(&network, 8000);
    restarted.swim.join(&[addr(8001)]).await.unwrap();
    restarted.swim.gossip(b"after".to_vec()).unwrap();
    time::sleep(Duration::from_secs(5)).await;

    let second = nodes[1]
        .broadcasts
        .try_recv()
        .expect("broadcast from the restarted node delivered");
    assert_eq!(second.origin, addr(8000));
    assert_eq!(second.data, b"after".to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_gossip_rejects_oversized_payload() {
    let network = Network::new();
    let node = start_node(&network, 8000);

    let err = node.swim.gossip(vec![0u8; 4096]).unwrap_err();
    assert!(matches!(err, SwimError::PayloadTooLarge { size, .. } if size > 4096));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_probing() {
    let network = Network::new();
    let nodes = cluster(&network, &[8000, 8001]).await;

    nodes[0].swim.shutdown().await;
    let before = network.delivered_to(addr(8001));
    time::sleep(Duration::from_secs(5)).await;

    // Replies to 8001's own pings stop too, since 8000 no longer listens.
    assert_eq!(network.delivered_to(addr(8001)), before);
}
