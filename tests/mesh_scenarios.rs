//! End-to-end relay scenarios through the coordinator facade

use sahaay_mesh::config::MeshConfig;
use sahaay_mesh::coordinator::{
    CreateDistressMessageInput, LocationInput, MeshCoordinator, RegisterDeviceInput,
};
use sahaay_mesh::model::{
    Clock, DistressMessage, Location, ManualClock, MessageCategory, MessageStatus, Urgency,
};
use sahaay_mesh::routing::{HopLimits, LoopbackTransport, RelayHalt, RelayOutcome};
use sahaay_mesh::store::AdmitOutcome;
use std::collections::HashSet;
use std::sync::Arc;

fn mesh(fanout: usize, max_hops: u32) -> (MeshCoordinator, Arc<ManualClock>) {
    let mut config = MeshConfig::default();
    config.routing.fanout = fanout;
    config.routing.hop_limits = HopLimits::uniform(max_hops);
    config.routing.forward_immediately = false;
    let clock = Arc::new(ManualClock::default());
    let coordinator = MeshCoordinator::new(
        config,
        Arc::new(LoopbackTransport::new()),
        clock.clone(),
        None,
    );
    (coordinator, clock)
}

fn distress(origin: &str, urgency: &str, expires_in: Option<f64>) -> CreateDistressMessageInput {
    CreateDistressMessageInput {
        sender_id: format!("user-{origin}"),
        origin_device_id: origin.to_string(),
        message_type: "RESCUE".to_string(),
        urgency_level: urgency.to_string(),
        content: "family of four stranded, water rising".to_string(),
        location: LocationInput {
            latitude: 26.14,
            longitude: 91.73,
            address: None,
        },
        expires_in,
    }
}

async fn register(coordinator: &MeshCoordinator, device: &str, peers: &[&str]) {
    coordinator
        .register_device(RegisterDeviceInput::online(device).with_peers(peers.iter().copied()))
        .await
        .unwrap();
}

fn assert_route_invariants(coordinator: &MeshCoordinator, message_id: &str, max_hops: u32) {
    let message = coordinator.get_message(message_id).unwrap();
    let routes = coordinator.get_message_routes(message_id).unwrap();

    assert_eq!(message.relay_count as usize, routes.len());
    assert!(message.relay_count <= max_hops);

    let hops: Vec<u32> = routes.iter().map(|r| r.hop_count).collect();
    let expected: Vec<u32> = (1..=routes.len() as u32).collect();
    assert_eq!(hops, expected);

    let destinations: HashSet<&str> = routes.iter().map(|r| r.to_device_id.as_str()).collect();
    assert_eq!(destinations.len(), routes.len());
    assert!(!destinations.contains(message.origin_device_id.as_str()));
}

/// A holds a CRITICAL message and can reach B (queue 2) and C (queue 0).
/// With one target per decision, the idle peer wins.
#[tokio::test]
async fn test_critical_message_prefers_idle_peer() {
    let (coordinator, _) = mesh(1, 5);
    coordinator
        .register_device(RegisterDeviceInput::online("B").with_queue_size(2))
        .await
        .unwrap();
    coordinator
        .register_device(RegisterDeviceInput::online("C").with_queue_size(0))
        .await
        .unwrap();
    register(&coordinator, "A", &["B", "C"]).await;

    let message = coordinator
        .create_distress_message(distress("A", "CRITICAL", None))
        .await
        .unwrap();
    let report = coordinator.relay(&message.id, "A").await.unwrap();

    let routes = report.outcome.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].from_device_id, "A");
    assert_eq!(routes[0].to_device_id, "C");
    assert_eq!(routes[0].hop_count, 1);

    let stored = coordinator.get_message(&message.id).unwrap();
    assert_eq!(stored.relay_count, 1);
    assert_eq!(stored.status, MessageStatus::Delivered);
}

/// a -> b -> c -> d; d acknowledges at hop 3 and the upstream relayers stop
#[tokio::test]
async fn test_acknowledgment_at_hop_three_halts_upstream() {
    let (coordinator, _) = mesh(1, 5);
    register(&coordinator, "a", &[]).await;
    register(&coordinator, "b", &["a"]).await;
    register(&coordinator, "c", &["b"]).await;
    register(&coordinator, "d", &["c"]).await;
    register(&coordinator, "e", &["c"]).await;

    let message = coordinator
        .create_distress_message(distress("a", "HIGH", Some(24.0)))
        .await
        .unwrap();

    for holder in ["a", "b", "c"] {
        let report = coordinator.relay(&message.id, holder).await.unwrap();
        assert!(report.outcome.is_forwarded(), "{holder} should forward");
    }

    let routes = coordinator.get_message_routes(&message.id).unwrap();
    let path: Vec<(&str, &str, u32)> = routes
        .iter()
        .map(|r| (r.from_device_id.as_str(), r.to_device_id.as_str(), r.hop_count))
        .collect();
    assert_eq!(path, vec![("a", "b", 1), ("b", "c", 2), ("c", "d", 3)]);

    let receipt = coordinator
        .submit_acknowledgment(&message.id, "d")
        .await
        .unwrap();
    assert!(receipt.newly_acknowledged);
    assert!(receipt.reached_origin);
    assert_eq!(receipt.informed, vec!["d", "c", "b", "a"]);

    // c could still hand the message to e, but it is acknowledged now
    for holder in ["c", "b"] {
        let report = coordinator.relay(&message.id, holder).await.unwrap();
        assert_eq!(
            report.outcome,
            RelayOutcome::Halted(RelayHalt::Terminal(MessageStatus::Acknowledged))
        );
    }
    assert_eq!(coordinator.get_message_routes(&message.id).unwrap().len(), 3);
    assert_route_invariants(&coordinator, &message.id, 5);

    // A second acknowledgment from the same responder changes nothing
    let again = coordinator
        .submit_acknowledgment(&message.id, "d")
        .await
        .unwrap();
    assert!(!again.newly_added);
    assert!(!again.newly_acknowledged);
    assert_eq!(again.message.acknowledgments.len(), 1);
}

/// Expiring in one hour, observed two hours later: reaped and never relayed
#[tokio::test]
async fn test_expired_message_is_reaped_and_not_relayed() {
    let (coordinator, clock) = mesh(2, 5);
    register(&coordinator, "b", &[]).await;
    register(&coordinator, "a", &["b"]).await;

    let reaped = coordinator
        .create_distress_message(distress("a", "MEDIUM", Some(1.0)))
        .await
        .unwrap();
    let other = coordinator
        .create_distress_message(distress("a", "MEDIUM", Some(1.0)))
        .await
        .unwrap();

    clock.advance(chrono::Duration::hours(2));
    coordinator.heartbeat("a").await.unwrap();
    coordinator.heartbeat("b").await.unwrap();

    let swept = coordinator.reap_expired().await;
    assert_eq!(swept, 2);
    assert_eq!(
        coordinator.get_message(&reaped.id).unwrap().status,
        MessageStatus::Expired
    );
    let report = coordinator.relay(&reaped.id, "a").await.unwrap();
    assert_eq!(
        report.outcome,
        RelayOutcome::Halted(RelayHalt::Terminal(MessageStatus::Expired))
    );
    assert!(coordinator.engine().pending_jobs().is_empty());
    assert!(coordinator.get_message_routes(&other.id).unwrap().is_empty());

    // Acknowledging an expired message is refused
    assert!(coordinator
        .submit_acknowledgment(&reaped.id, "b")
        .await
        .is_err());
}

/// A relay decision that finds the deadline passed expires the message itself
#[tokio::test]
async fn test_relay_forces_expiry_before_reaper_runs() {
    let (coordinator, clock) = mesh(2, 5);
    register(&coordinator, "b", &[]).await;
    register(&coordinator, "a", &["b"]).await;

    let message = coordinator
        .create_distress_message(distress("a", "LOW", Some(1.0)))
        .await
        .unwrap();

    clock.advance(chrono::Duration::hours(2));
    coordinator.heartbeat("a").await.unwrap();
    coordinator.heartbeat("b").await.unwrap();

    let report = coordinator.relay(&message.id, "a").await.unwrap();
    assert_eq!(report.outcome, RelayOutcome::Halted(RelayHalt::ExpiredMessage));
    assert_eq!(
        coordinator.get_message(&message.id).unwrap().status,
        MessageStatus::Expired
    );
    assert_eq!(coordinator.reap_expired().await, 0);
}

/// The same message arriving twice is stored once
#[tokio::test]
async fn test_ingest_deduplicates() {
    let (coordinator, clock) = mesh(1, 5);
    let message = DistressMessage::new(
        "from-elsewhere",
        "user-x",
        "x",
        MessageCategory::Shelter,
        Urgency::High,
        "roof collapsed",
        Location::new(-1.29, 36.82),
        clock.now(),
        None,
    )
    .unwrap();

    assert_eq!(
        coordinator.ingest(message.clone()).await.unwrap(),
        AdmitOutcome::Admitted
    );
    for _ in 0..3 {
        assert_eq!(
            coordinator.ingest(message.clone()).await.unwrap(),
            AdmitOutcome::Duplicate
        );
    }
    assert_eq!(coordinator.stats().messages.total(), 1);
    assert_eq!(coordinator.get_message("from-elsewhere").unwrap(), message);
}

/// Hop ceiling holds no matter how many holders keep relaying
#[tokio::test]
async fn test_hop_limit_caps_relays() {
    let (coordinator, _) = mesh(3, 3);
    let ring = ["n0", "n1", "n2", "n3", "n4", "n5"];
    for device in ring {
        register(&coordinator, device, &[]).await;
    }
    for device in ring {
        let peers: Vec<&str> = ring.iter().copied().filter(|d| *d != device).collect();
        register(&coordinator, device, &peers).await;
    }

    let message = coordinator
        .create_distress_message(distress("n0", "LOW", None))
        .await
        .unwrap();

    for _ in 0..4 {
        coordinator.relay_pending().await;
    }

    let stored = coordinator.get_message(&message.id).unwrap();
    assert_eq!(stored.relay_count, 3);
    assert_route_invariants(&coordinator, &message.id, 3);

    let report = coordinator.relay(&message.id, "n0").await.unwrap();
    assert_eq!(
        report.outcome,
        RelayOutcome::Halted(RelayHalt::HopLimitExceeded {
            relay_count: 3,
            max_hops: 3
        })
    );
}

/// Concurrent relay decisions from every holder never double-count hops or
/// deliver twice to one device
#[tokio::test]
async fn test_concurrent_relays_keep_counts_consistent() {
    let (coordinator, _) = mesh(2, 8);
    let devices: Vec<String> = (0..10).map(|i| format!("d{i}")).collect();
    for device in &devices {
        register(&coordinator, device, &[]).await;
    }
    for device in &devices {
        let peers: Vec<&str> = devices
            .iter()
            .map(String::as_str)
            .filter(|d| *d != device)
            .collect();
        register(&coordinator, device, &peers).await;
    }

    let message = coordinator
        .create_distress_message(distress("d0", "CRITICAL", None))
        .await
        .unwrap();
    coordinator.relay(&message.id, "d0").await.unwrap();

    let mut handles = Vec::new();
    for round in 0..3 {
        for holder in devices.iter().cloned() {
            let coordinator = coordinator.clone();
            let message_id = message.id.clone();
            handles.push(tokio::spawn(async move {
                // Some holders do not have it yet in early rounds
                let _ = coordinator.relay(&message_id, &holder).await;
                round
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = coordinator.get_message(&message.id).unwrap();
    assert_eq!(stored.relay_count, 8);
    assert_route_invariants(&coordinator, &message.id, 8);
}
