//! Mesh simulation over random topologies and partitions
//!
//! Topologies come from a seeded RNG so failures reproduce.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sahaay_mesh::config::MeshConfig;
use sahaay_mesh::coordinator::{
    CreateDistressMessageInput, LocationInput, MeshCoordinator, RegisterDeviceInput,
};
use sahaay_mesh::model::{ManualClock, MessageStatus};
use sahaay_mesh::routing::{HopLimits, LoopbackTransport};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const URGENCIES: [&str; 4] = ["LOW", "MEDIUM", "HIGH", "CRITICAL"];

fn create_mesh(fanout: usize, transport: Arc<LoopbackTransport>) -> MeshCoordinator {
    let mut config = MeshConfig::default();
    config.routing.fanout = fanout;
    config.routing.hop_limits = HopLimits {
        low: 3,
        medium: 4,
        high: 6,
        critical: 8,
    };
    config.routing.forward_immediately = false;
    config.node.maintenance_interval_secs = 3600;
    config.reaper.interval_secs = 3600;
    MeshCoordinator::new(config, transport, Arc::new(ManualClock::default()), None)
}

fn distress(origin: &str, urgency: &str) -> CreateDistressMessageInput {
    CreateDistressMessageInput {
        sender_id: format!("user-{origin}"),
        origin_device_id: origin.to_string(),
        message_type: "MEDICAL".to_string(),
        urgency_level: urgency.to_string(),
        content: "injured, need evacuation".to_string(),
        location: LocationInput {
            latitude: 35.68,
            longitude: 139.69,
            address: None,
        },
        expires_in: Some(48.0),
    }
}

/// Symmetric random graph: every device links to `degree` others
fn random_topology(rng: &mut StdRng, devices: usize, degree: usize) -> BTreeMap<String, BTreeSet<String>> {
    let ids: Vec<String> = (0..devices).map(|i| format!("dev-{i:02}")).collect();
    let mut graph: BTreeMap<String, BTreeSet<String>> =
        ids.iter().map(|id| (id.clone(), BTreeSet::new())).collect();

    for id in &ids {
        let others: Vec<&String> = ids.iter().filter(|other| *other != id).collect();
        for peer in others.choose_multiple(rng, degree) {
            graph.entry(id.clone()).or_default().insert((*peer).clone());
            graph.entry((*peer).clone()).or_default().insert(id.clone());
        }
    }
    graph
}

async fn apply_topology(coordinator: &MeshCoordinator, graph: &BTreeMap<String, BTreeSet<String>>) {
    for id in graph.keys() {
        coordinator
            .register_device(RegisterDeviceInput::online(id.as_str()))
            .await
            .unwrap();
    }
    for (id, peers) in graph {
        coordinator
            .register_device(RegisterDeviceInput::online(id.as_str()).with_peers(peers.iter().cloned()))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_random_mesh_invariants() {
    println!("\n=== Random Mesh Simulation ===\n");

    for seed in [7_u64, 42, 1337] {
        let mut rng = StdRng::seed_from_u64(seed);
        let coordinator = create_mesh(2, Arc::new(LoopbackTransport::new()));
        let graph = random_topology(&mut rng, 30, 3);
        apply_topology(&coordinator, &graph).await;

        let ids: Vec<&String> = graph.keys().collect();
        let mut message_ids = Vec::new();
        for _ in 0..12 {
            let origin = ids[rng.gen_range(0..ids.len())];
            let urgency = URGENCIES[rng.gen_range(0..URGENCIES.len())];
            let message = coordinator
                .create_distress_message(distress(origin, urgency))
                .await
                .unwrap();
            message_ids.push(message.id);
        }

        for _ in 0..10 {
            coordinator.maintenance_cycle().await;
        }

        let mut total_routes = 0;
        for message_id in &message_ids {
            let message = coordinator.get_message(message_id).unwrap();
            let routes = coordinator.get_message_routes(message_id).unwrap();
            let max_hops = coordinator.config().routing.max_hops_for(message.urgency_level);

            assert_eq!(message.relay_count as usize, routes.len());
            assert!(message.relay_count <= max_hops);

            // Every hop leaves a device that already held the message
            let mut holders: HashSet<&str> = HashSet::from([message.origin_device_id.as_str()]);
            for route in &routes {
                assert!(holders.contains(route.from_device_id.as_str()));
                assert!(holders.insert(route.to_device_id.as_str()), "duplicate destination");
                assert!(graph[&route.from_device_id].contains(&route.to_device_id));
            }
            total_routes += routes.len();
        }

        let stats = coordinator.stats();
        println!(
            "seed {seed}: {total_routes} hops recorded, {}",
            stats.routing
        );
        assert!(total_routes > 0);
        assert_eq!(stats.routing.handoffs as usize, total_routes);
    }
}

/// Two islands joined later by one link: the held message crosses as soon as
/// the link is reported
#[tokio::test]
async fn test_partition_heals_on_new_link() {
    println!("\n=== Partition Heal ===\n");

    let transport = Arc::new(LoopbackTransport::new());
    let coordinator = create_mesh(1, transport.clone());

    let west = ["w1", "w2"];
    let east = ["e1", "e2"];
    for island in [west, east] {
        for device in island {
            coordinator
                .register_device(RegisterDeviceInput::online(device))
                .await
                .unwrap();
        }
        coordinator
            .register_device(RegisterDeviceInput::online(island[0]).with_peers([island[1]]))
            .await
            .unwrap();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = coordinator.spawn_background(shutdown_rx);
    // Let the first maintenance tick pass
    tokio::time::sleep(Duration::from_millis(50)).await;

    let message = coordinator
        .create_distress_message(distress("w1", "CRITICAL"))
        .await
        .unwrap();
    coordinator.relay(&message.id, "w1").await.unwrap();
    let report = coordinator.relay(&message.id, "w2").await.unwrap();
    assert!(!report.outcome.is_forwarded(), "w2 has no one left to reach");
    println!("✓ Message held on the west island");

    // w2 meets e1
    coordinator
        .register_device(RegisterDeviceInput::online("w2").with_peers(["w1", "e1"]))
        .await
        .unwrap();

    let crossed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let routes = coordinator.get_message_routes(&message.id).unwrap();
            if routes.iter().any(|r| r.to_device_id == "e1") {
                return routes;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("message never crossed the new link");

    let hop = crossed.iter().find(|r| r.to_device_id == "e1").unwrap();
    assert_eq!(hop.from_device_id, "w2");
    assert_eq!(hop.hop_count, 2);
    assert!(transport.inbox("e1").contains(&message.id));
    println!("✓ Message crossed to the east island at hop {}", hop.hop_count);

    // e1 acknowledges and the walk reaches the origin across the healed link
    let receipt = coordinator
        .submit_acknowledgment(&message.id, "e1")
        .await
        .unwrap();
    assert!(receipt.reached_origin);
    assert_eq!(receipt.message.status, MessageStatus::Acknowledged);

    shutdown_tx.send(true).unwrap();
    for worker in workers {
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
    }
}

/// A holder that listed a device before it ever registered relays to it as
/// soon as that device shows up, even when the newcomer lists no peers
#[tokio::test]
async fn test_late_registration_releases_held_message() {
    let transport = Arc::new(LoopbackTransport::new());
    let coordinator = create_mesh(1, transport.clone());
    coordinator
        .register_device(RegisterDeviceInput::online("holder").with_peers(["late"]))
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = coordinator.spawn_background(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let message = coordinator
        .create_distress_message(distress("holder", "HIGH"))
        .await
        .unwrap();
    let report = coordinator.relay(&message.id, "holder").await.unwrap();
    assert!(!report.outcome.is_forwarded());

    coordinator
        .register_device(RegisterDeviceInput::online("late"))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while !transport.inbox("late").contains(&message.id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("held message never reached the late device");

    let routes = coordinator.get_message_routes(&message.id).unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].from_device_id, "holder");
    assert_eq!(routes[0].to_device_id, "late");

    shutdown_tx.send(true).unwrap();
    for worker in workers {
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
    }
}

/// A device that drops mid-mesh stops receiving; the ack walk stops at it
#[tokio::test]
async fn test_offline_device_blocks_ack_walk() {
    let coordinator = create_mesh(1, Arc::new(LoopbackTransport::new()));
    for device in ["a", "b", "c"] {
        coordinator
            .register_device(RegisterDeviceInput::online(device))
            .await
            .unwrap();
    }
    coordinator
        .register_device(RegisterDeviceInput::online("b").with_peers(["a", "c"]))
        .await
        .unwrap();

    let message = coordinator
        .create_distress_message(distress("a", "HIGH"))
        .await
        .unwrap();
    coordinator.relay(&message.id, "a").await.unwrap();
    coordinator.relay(&message.id, "b").await.unwrap();
    assert_eq!(coordinator.get_message_routes(&message.id).unwrap().len(), 2);

    coordinator.set_device_offline("b").await.unwrap();
    assert!(coordinator.neighbors_of("a").is_empty());

    let receipt = coordinator
        .submit_acknowledgment(&message.id, "c")
        .await
        .unwrap();
    assert_eq!(receipt.informed, vec!["c"]);
    assert!(!receipt.reached_origin);
    // The store is authoritative regardless of the walk
    assert_eq!(
        coordinator.get_message(&message.id).unwrap().status,
        MessageStatus::Acknowledged
    );
}
