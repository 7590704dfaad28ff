use crate::model::{DeviceId, DistressMessage};
use serde::{Deserialize, Serialize};

/// Result of one acknowledgment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckReceipt {
    /// Message state after the acknowledgment was applied
    pub message: DistressMessage,

    /// First acknowledgment from this device
    pub newly_added: bool,

    /// This acknowledgment moved the message to ACKNOWLEDGED
    pub newly_acknowledged: bool,

    /// Devices told about the acknowledgment by this walk, acker first
    pub informed: Vec<DeviceId>,

    /// The walk got all the way back to the origin device
    pub reached_origin: bool,
}
