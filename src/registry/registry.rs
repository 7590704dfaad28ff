//! Device registry: online state, heartbeats and peer adjacency.
//!
//! Each device lives in its own map entry, so updates to different devices
//! proceed in parallel and a reader cloning one entry always sees a whole
//! peer set. No two entries are ever locked at the same time.

use crate::metrics::recorder;
use crate::model::{Clock, DeviceId, DeviceNode};
use crate::registry::types::{DeviceUpdate, PeerView, RegistryConfig, RegistryEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct DeviceRegistry {
    devices: DashMap<DeviceId, DeviceNode>,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<RegistryEvent>,
}

impl DeviceRegistry {
    pub fn new(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            devices: DashMap::new(),
            config,
            clock,
            events,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribe to adjacency changes
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Upsert a device from a registration or heartbeat report.
    ///
    /// Reported peers become the device's adjacency. Registered online peers
    /// get the reciprocal link; peers known to be offline are dropped;
    /// unregistered peers are kept as unverified links until they register.
    /// A device coming online announces itself to every online device that
    /// already lists it.
    pub fn register_or_update(&self, update: DeviceUpdate) -> DeviceNode {
        if !update.online {
            return self.apply_offline(update);
        }

        let now = self.clock.now();
        let device_id = update.device_id.clone();
        let was_online = self.devices.get(&device_id).is_some_and(|node| node.is_online);

        let reported: HashSet<DeviceId> = update
            .peers
            .into_iter()
            .filter(|peer| *peer != device_id)
            .collect();

        let mut online_peers = HashSet::new();
        let mut peers = HashSet::new();
        for peer in reported {
            match self.devices.get(&peer).map(|node| node.is_online) {
                Some(true) => {
                    online_peers.insert(peer.clone());
                    peers.insert(peer);
                }
                Some(false) => {
                    tracing::debug!(device = %device_id, peer = %peer, "Ignoring offline peer");
                }
                None => {
                    peers.insert(peer);
                }
            }
        }

        let (node, previous_peers) = {
            let mut entry = self
                .devices
                .entry(device_id.clone())
                .or_insert_with(|| DeviceNode::new(device_id.clone(), now));

            if update.user_id.is_some() {
                entry.user_id = update.user_id;
            }
            if update.location.is_some() {
                entry.location = update.location;
            }
            if let Some(queue_size) = update.queue_size {
                entry.message_queue_size = queue_size.min(self.config.max_queue_size);
            }
            entry.is_online = true;
            entry.last_seen = now;

            let previous = std::mem::replace(&mut entry.connected_peers, peers);
            (entry.clone(), previous)
        };

        for peer in &online_peers {
            let linked = match self.devices.get_mut(peer) {
                Some(mut peer_node) if peer_node.is_online => {
                    peer_node.connected_peers.insert(device_id.clone())
                }
                _ => false,
            };
            if linked || !previous_peers.contains(peer) {
                self.emit(RegistryEvent::PeerLinked {
                    device_id: device_id.clone(),
                    peer_id: peer.clone(),
                });
            }
            if linked {
                self.emit(RegistryEvent::PeerLinked {
                    device_id: peer.clone(),
                    peer_id: device_id.clone(),
                });
            }
        }

        for dropped in previous_peers.difference(&node.connected_peers) {
            if let Some(mut peer_node) = self.devices.get_mut(dropped) {
                peer_node.connected_peers.remove(&device_id);
            }
        }

        if !was_online {
            for holder in self.holders_listing(&device_id, &online_peers) {
                self.emit(RegistryEvent::PeerLinked {
                    device_id: holder,
                    peer_id: device_id.clone(),
                });
            }
        }

        recorder::set_online_devices(self.online_count());
        node
    }

    /// Online devices whose adjacency names `device_id`, other than `linked`
    fn holders_listing(&self, device_id: &str, linked: &HashSet<DeviceId>) -> Vec<DeviceId> {
        let mut holders: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|node| {
                node.is_online
                    && node.device_id != device_id
                    && !linked.contains(&node.device_id)
                    && node.connected_peers.contains(device_id)
            })
            .map(|node| node.device_id.clone())
            .collect();
        holders.sort();
        holders
    }

    fn apply_offline(&self, update: DeviceUpdate) -> DeviceNode {
        let now = self.clock.now();
        {
            let mut entry = self
                .devices
                .entry(update.device_id.clone())
                .or_insert_with(|| DeviceNode::new(update.device_id.clone(), now));
            if update.user_id.is_some() {
                entry.user_id = update.user_id;
            }
            if update.location.is_some() {
                entry.location = update.location;
            }
            entry.last_seen = now;
        }
        self.set_offline(&update.device_id)
    }

    /// Mark a device offline and remove it from every adjacency set.
    /// Unknown devices are created in the offline state.
    pub fn set_offline(&self, device_id: &str) -> DeviceNode {
        let now = self.clock.now();
        let (node, was_online) = {
            let mut entry = self
                .devices
                .entry(device_id.to_string())
                .or_insert_with(|| DeviceNode::new(device_id, now));
            let was_online = entry.is_online;
            entry.is_online = false;
            entry.connected_peers.clear();
            (entry.clone(), was_online)
        };

        for mut other in self.devices.iter_mut() {
            other.connected_peers.remove(device_id);
        }

        if was_online {
            tracing::info!(device = %device_id, "Device went offline");
            self.emit(RegistryEvent::WentOffline {
                device_id: device_id.to_string(),
            });
        }

        recorder::set_online_devices(self.online_count());
        node
    }

    /// Refresh `last_seen`; a heartbeat from an offline device brings it back
    /// online with an empty adjacency.
    pub fn heartbeat(&self, device_id: &str) -> DeviceNode {
        let now = self.clock.now();
        let node = {
            let mut entry = self
                .devices
                .entry(device_id.to_string())
                .or_insert_with(|| DeviceNode::new(device_id, now));
            entry.is_online = true;
            entry.last_seen = now;
            entry.clone()
        };
        recorder::set_online_devices(self.online_count());
        node
    }

    /// Record a reported queue size, clamped to the configured maximum
    pub fn set_queue_size(&self, device_id: &str, queue_size: u32) {
        let now = self.clock.now();
        let mut entry = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceNode::new(device_id, now));
        entry.message_queue_size = queue_size.min(self.config.max_queue_size);
    }

    /// Account for one message handed to `device_id` until its next report
    pub fn note_enqueued(&self, device_id: &str) {
        if let Some(mut node) = self.devices.get_mut(device_id) {
            node.message_queue_size = node
                .message_queue_size
                .saturating_add(1)
                .min(self.config.max_queue_size);
        }
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceNode> {
        self.devices.get(device_id).map(|node| node.clone())
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Online and heard from within the staleness window
    pub fn is_reachable(&self, device_id: &str) -> bool {
        let now = self.clock.now();
        self.devices
            .get(device_id)
            .is_some_and(|node| self.is_live(&node, now))
    }

    pub fn is_congested(&self, node: &DeviceNode) -> bool {
        node.message_queue_size >= self.config.max_queue_size
    }

    /// Current online peers of `device_id`, sorted by id
    pub fn neighbors_of(&self, device_id: &str) -> Vec<DeviceId> {
        let now = self.clock.now();
        self.peer_view(device_id)
            .into_iter()
            .filter(|view| {
                view.node
                    .as_ref()
                    .is_some_and(|node| self.is_live(node, now))
            })
            .map(|view| view.peer_id)
            .collect()
    }

    /// Adjacency of `device_id` with a snapshot of each peer, sorted by id
    pub fn peer_view(&self, device_id: &str) -> Vec<PeerView> {
        let peers: Vec<DeviceId> = match self.devices.get(device_id) {
            Some(node) if node.is_online => node.connected_peers.iter().cloned().collect(),
            _ => return Vec::new(),
        };

        let mut view: Vec<PeerView> = peers
            .into_iter()
            .map(|peer_id| {
                let node = self.get(&peer_id);
                PeerView { peer_id, node }
            })
            .collect();
        view.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        view
    }

    /// Set offline every online device whose last heartbeat is older than
    /// the staleness window. Returns the affected ids.
    pub fn mark_stale_offline(&self, now: DateTime<Utc>) -> Vec<DeviceId> {
        let stale: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|node| node.is_online && !self.is_live(node, now))
            .map(|node| node.device_id.clone())
            .collect();

        for device_id in &stale {
            self.set_offline(device_id);
        }
        stale
    }

    /// Devices owned by a user, sorted by id. Anonymous devices relay like
    /// any other but are not listed.
    pub fn listed_devices(&self) -> Vec<DeviceNode> {
        let mut devices: Vec<DeviceNode> = self
            .devices
            .iter()
            .filter(|node| !node.is_anonymous())
            .map(|node| node.clone())
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Every known device, sorted by id
    pub fn all_devices(&self) -> Vec<DeviceNode> {
        let mut devices: Vec<DeviceNode> = self.devices.iter().map(|node| node.clone()).collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Reinstate a device record verbatim (archive restore)
    pub fn restore(&self, node: DeviceNode) {
        self.devices.insert(node.device_id.clone(), node);
    }

    pub fn online_count(&self) -> usize {
        self.devices.iter().filter(|node| node.is_online).count()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Online and within the staleness window at `now`
    pub fn is_live(&self, node: &DeviceNode, now: DateTime<Utc>) -> bool {
        if !node.is_online {
            return false;
        }
        let age = now.signed_duration_since(node.last_seen);
        age.to_std().map_or(true, |age| age <= self.config.stale_after())
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
