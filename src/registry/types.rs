use crate::model::{DeviceId, Location};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the device registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Peers not heard from within this window are not neighbors
    pub stale_after_secs: u64,

    /// Upper bound for a device's reported outbound queue
    pub max_queue_size: u32,

    /// Buffer size of the registry event channel
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 5 * 60,
            max_queue_size: 64,
            event_capacity: 256,
        }
    }
}

impl RegistryConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// A registration or heartbeat report from a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub device_id: DeviceId,
    /// `None` leaves the recorded owner unchanged
    pub user_id: Option<String>,
    /// `None` leaves the last-known location unchanged
    pub location: Option<Location>,
    pub online: bool,
    pub peers: Vec<DeviceId>,
    /// `None` leaves the recorded queue size unchanged
    pub queue_size: Option<u32>,
}

impl DeviceUpdate {
    /// An online report with no peers
    pub fn online(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: None,
            location: None,
            online: true,
            peers: Vec::new(),
            queue_size: None,
        }
    }

    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DeviceId>,
    {
        self.peers = peers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_queue_size(mut self, queue_size: u32) -> Self {
        self.queue_size = Some(queue_size);
        self
    }
}

/// Adjacency changes broadcast to interested components
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// `peer_id` became reachable from `device_id`
    PeerLinked {
        device_id: DeviceId,
        peer_id: DeviceId,
    },

    /// Device went offline and was removed from all adjacency sets
    WentOffline { device_id: DeviceId },
}

/// One entry of a device's adjacency as seen at a single instant
#[derive(Debug, Clone)]
pub struct PeerView {
    pub peer_id: DeviceId,
    /// `None` when the peer was reported but never registered
    pub node: Option<crate::model::DeviceNode>,
}
