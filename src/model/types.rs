use crate::model::error::{ModelError, ModelResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

pub type MessageId = String;
pub type DeviceId = String;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geographic position in decimal degrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Reject coordinates outside the valid lat/lon ranges
    pub fn validate(&self) -> ModelResult<()> {
        let lat_ok = (-90.0..=90.0).contains(&self.latitude);
        let lon_ok = (-180.0..=180.0).contains(&self.longitude);
        if lat_ok && lon_ok {
            Ok(())
        } else {
            Err(ModelError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }

    /// Great-circle distance (haversine)
    pub fn distance_km(&self, other: &Location) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageCategory {
    Food,
    Water,
    Shelter,
    Medical,
    Rescue,
    General,
}

impl MessageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::Food => "FOOD",
            MessageCategory::Water => "WATER",
            MessageCategory::Shelter => "SHELTER",
            MessageCategory::Medical => "MEDICAL",
            MessageCategory::Rescue => "RESCUE",
            MessageCategory::General => "GENERAL",
        }
    }
}

impl FromStr for MessageCategory {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FOOD" => Ok(MessageCategory::Food),
            "WATER" => Ok(MessageCategory::Water),
            "SHELTER" => Ok(MessageCategory::Shelter),
            "MEDICAL" => Ok(MessageCategory::Medical),
            "RESCUE" => Ok(MessageCategory::Rescue),
            "GENERAL" => Ok(MessageCategory::General),
            _ => Err(ModelError::InvalidCategory(s.to_string())),
        }
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of a distress message. Ordering follows severity, `Low < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// 1 for LOW up to 4 for CRITICAL
    pub fn rank(&self) -> i64 {
        match self {
            Urgency::Low => 1,
            Urgency::Medium => 2,
            Urgency::High => 3,
            Urgency::Critical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "LOW",
            Urgency::Medium => "MEDIUM",
            Urgency::High => "HIGH",
            Urgency::Critical => "CRITICAL",
        }
    }
}

impl FromStr for Urgency {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Urgency::Low),
            "MEDIUM" => Ok(Urgency::Medium),
            "HIGH" => Ok(Urgency::High),
            "CRITICAL" => Ok(Urgency::Critical),
            _ => Err(ModelError::InvalidUrgency(s.to_string())),
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Acknowledged,
    Expired,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Acknowledged | MessageStatus::Expired)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Position on the PENDING -> DELIVERED -> ACKNOWLEDGED track
    fn progress(&self) -> Option<u8> {
        match self {
            MessageStatus::Pending => Some(0),
            MessageStatus::Delivered => Some(1),
            MessageStatus::Acknowledged => Some(2),
            MessageStatus::Expired => None,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    /// Re-applying the current status is allowed and treated as a no-op.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self.progress(), next.progress()) {
            (Some(from), Some(to)) => to > from,
            (Some(_), None) => !self.is_terminal(),
            (None, _) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Acknowledged => "ACKNOWLEDGED",
            MessageStatus::Expired => "EXPIRED",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(MessageStatus::Pending),
            "DELIVERED" => Ok(MessageStatus::Delivered),
            "ACKNOWLEDGED" => Ok(MessageStatus::Acknowledged),
            "EXPIRED" => Ok(MessageStatus::Expired),
            _ => Err(ModelError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A distress message travelling through the mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistressMessage {
    pub id: MessageId,
    pub sender_id: String,
    /// Root of the route forest for this message
    pub origin_device_id: DeviceId,
    pub message_type: MessageCategory,
    pub urgency_level: Urgency,
    pub content: String,
    pub location: Location,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub relay_count: u32,
    pub acknowledgments: BTreeSet<String>,
}

impl DistressMessage {
    /// Create a fresh PENDING message with no relays or acknowledgments.
    /// Fails if `expires_at` is not strictly after `created_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<MessageId>,
        sender_id: impl Into<String>,
        origin_device_id: impl Into<DeviceId>,
        message_type: MessageCategory,
        urgency_level: Urgency,
        content: impl Into<String>,
        location: Location,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> ModelResult<Self> {
        if let Some(expires_at) = expires_at {
            if expires_at <= created_at {
                return Err(ModelError::InvalidExpiry {
                    created_at,
                    expires_at,
                });
            }
        }

        Ok(Self {
            id: id.into(),
            sender_id: sender_id.into(),
            origin_device_id: origin_device_id.into(),
            message_type,
            urgency_level,
            content: content.into(),
            location,
            status: MessageStatus::Pending,
            created_at,
            expires_at,
            relay_count: 0,
            acknowledgments: BTreeSet::new(),
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// A device participating in the mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceNode {
    pub device_id: DeviceId,
    /// `None` marks an anonymous device
    pub user_id: Option<String>,
    pub location: Option<Location>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub connected_peers: HashSet<DeviceId>,
    pub message_queue_size: u32,
}

impl DeviceNode {
    pub fn new(device_id: impl Into<DeviceId>, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: None,
            location: None,
            is_online: false,
            last_seen: now,
            connected_peers: HashSet::new(),
            message_queue_size: 0,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

/// One immutable hop of a message between two devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRoute {
    pub id: String,
    pub message_id: MessageId,
    pub from_device_id: DeviceId,
    pub to_device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub hop_count: u32,
}

impl MessageRoute {
    pub fn new(
        message_id: impl Into<MessageId>,
        from_device_id: impl Into<DeviceId>,
        to_device_id: impl Into<DeviceId>,
        timestamp: DateTime<Utc>,
        hop_count: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: message_id.into(),
            from_device_id: from_device_id.into(),
            to_device_id: to_device_id.into(),
            timestamp,
            hop_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use MessageStatus::*;

        assert!(Pending.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Acknowledged));
        assert!(Pending.can_transition_to(Acknowledged));
        assert!(Pending.can_transition_to(Expired));
        assert!(Delivered.can_transition_to(Expired));

        assert!(!Acknowledged.can_transition_to(Pending));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Acknowledged.can_transition_to(Expired));
        assert!(!Expired.can_transition_to(Pending));
        assert!(!Expired.can_transition_to(Acknowledged));

        assert!(Expired.can_transition_to(Expired));
    }

    #[test]
    fn test_urgency_ordering() {
        assert!(Urgency::Critical > Urgency::High);
        assert!(Urgency::High > Urgency::Medium);
        assert!(Urgency::Medium > Urgency::Low);
        assert_eq!("critical".parse::<Urgency>().unwrap(), Urgency::Critical);
        assert!("SEVERE".parse::<Urgency>().is_err());
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("MEDICAL".parse::<MessageCategory>().unwrap(), MessageCategory::Medical);
        assert!(matches!(
            "PIZZA".parse::<MessageCategory>(),
            Err(ModelError::InvalidCategory(_))
        ));
    }

    #[test]
    fn test_expiry_must_follow_creation() {
        let now = Utc::now();
        let result = DistressMessage::new(
            "m-1",
            "user-1",
            "device-1",
            MessageCategory::Water,
            Urgency::Low,
            "need water",
            Location::new(0.0, 0.0),
            now,
            Some(now),
        );
        assert!(matches!(result, Err(ModelError::InvalidExpiry { .. })));

        let message = DistressMessage::new(
            "m-1",
            "user-1",
            "device-1",
            MessageCategory::Water,
            Urgency::Low,
            "need water",
            Location::new(0.0, 0.0),
            now,
            Some(now + Duration::hours(1)),
        )
        .unwrap();
        assert!(!message.is_expired_at(now));
        assert!(message.is_expired_at(now + Duration::hours(1)));
    }

    #[test]
    fn test_location_distance_and_validation() {
        let times_square = Location::new(40.7589, -73.9851).with_address("Times Square");
        let central_park = Location::new(40.7829, -73.9654);

        let distance = times_square.distance_km(&central_park);
        assert!(distance > 2.5 && distance < 3.5, "distance was {distance}");

        assert!(Location::new(91.0, 0.0).validate().is_err());
        assert!(times_square.validate().is_ok());
    }

    #[test]
    fn test_message_serializes_with_camel_case_fields() {
        let now = Utc::now();
        let message = DistressMessage::new(
            "m-1",
            "user-1",
            "device-1",
            MessageCategory::Rescue,
            Urgency::Critical,
            "trapped",
            Location::new(1.0, 2.0),
            now,
            None,
        )
        .unwrap();

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["urgencyLevel"], "CRITICAL");
        assert_eq!(json["messageType"], "RESCUE");
        assert!(json["expiresAt"].is_null());
        assert_eq!(json["location"]["address"], serde_json::Value::Null);
    }
}
