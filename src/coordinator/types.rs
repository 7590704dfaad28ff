use crate::model::{DeviceId, Location};
use crate::routing::RoutingStats;
use crate::store::StoreStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInput {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub address: Option<String>,
}

impl From<LocationInput> for Location {
    fn from(input: LocationInput) -> Self {
        Location {
            latitude: input.latitude,
            longitude: input.longitude,
            address: input.address,
        }
    }
}

/// A new distress message as submitted by a device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDistressMessageInput {
    pub sender_id: String,
    /// Device the message is created on; root of its route forest
    pub origin_device_id: DeviceId,
    /// FOOD, WATER, SHELTER, MEDICAL, RESCUE or GENERAL
    pub message_type: String,
    /// LOW, MEDIUM, HIGH or CRITICAL
    pub urgency_level: String,
    pub content: String,
    pub location: LocationInput,
    /// Hours until the message expires
    #[serde(default)]
    pub expires_in: Option<f64>,
}

/// A registration or heartbeat-with-peers report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceInput {
    pub device_id: DeviceId,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub location: Option<LocationInput>,
    #[serde(default = "default_online")]
    pub is_online: bool,
    #[serde(default)]
    pub connected_peers: Vec<DeviceId>,
    #[serde(default)]
    pub message_queue_size: Option<u32>,
}

fn default_online() -> bool {
    true
}

impl RegisterDeviceInput {
    pub fn online(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: None,
            location: None,
            is_online: true,
            connected_peers: Vec::new(),
            message_queue_size: None,
        }
    }

    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DeviceId>,
    {
        self.connected_peers = peers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_queue_size(mut self, queue_size: u32) -> Self {
        self.message_queue_size = Some(queue_size);
        self
    }
}

/// What one maintenance cycle did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub stale_devices: Vec<DeviceId>,
    pub reaped: usize,
    pub relay_decisions: usize,
    pub hops_recorded: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshStats {
    pub messages: StoreStats,
    pub routing: RoutingStats,
    pub known_devices: usize,
    pub online_devices: usize,
}
