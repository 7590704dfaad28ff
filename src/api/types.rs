use crate::api::error::{ApiError, ApiResult};
use crate::model::{
    DeviceId, DeviceNode, DistressMessage, Location, MessageCategory, MessageRoute, MessageStatus,
    Urgency,
};
use crate::routing::{RelayOutcome, RelayReport};
use crate::store::MessageFilter;
use serde::{Deserialize, Serialize};

/// Query string of `GET /api/v1/messages`. Setting `latitude`, `longitude`
/// and `radiusKm` together switches to a proximity search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesQuery {
    pub status: Option<String>,
    pub urgency: Option<String>,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub sender_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_km: Option<f64>,
}

impl ListMessagesQuery {
    pub fn filter(&self) -> ApiResult<MessageFilter> {
        Ok(MessageFilter {
            status: parse_opt::<MessageStatus>(self.status.as_deref())?,
            urgency: parse_opt::<Urgency>(self.urgency.as_deref())?,
            category: parse_opt::<MessageCategory>(self.message_type.as_deref())?,
            sender_id: self.sender_id.clone(),
        })
    }

    pub fn near(&self) -> ApiResult<Option<(Location, f64)>> {
        match (self.latitude, self.longitude, self.radius_km) {
            (None, None, None) => Ok(None),
            (Some(latitude), Some(longitude), Some(radius_km)) => {
                Ok(Some((Location::new(latitude, longitude), radius_km)))
            }
            _ => Err(ApiError::InvalidRequest(
                "latitude, longitude and radiusKm must be given together".to_string(),
            )),
        }
    }
}

fn parse_opt<T>(value: Option<&str>) -> ApiResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| v.parse::<T>())
        .transpose()
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<DistressMessage>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    /// Device currently holding the message
    pub holder_id: DeviceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedTargetResponse {
    pub device_id: DeviceId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub message_id: String,
    pub holder_id: DeviceId,
    /// `forwarded`, `held` or `halted`
    pub outcome: String,
    pub halt_reason: Option<String>,
    pub routes: Vec<MessageRoute>,
    pub skipped: Vec<SkippedTargetResponse>,
}

impl From<RelayReport> for RelayResponse {
    fn from(report: RelayReport) -> Self {
        let (outcome, halt_reason, routes) = match report.outcome {
            RelayOutcome::Forwarded(routes) => ("forwarded", None, routes),
            RelayOutcome::Held => ("held", None, Vec::new()),
            RelayOutcome::Halted(halt) => ("halted", Some(halt.to_string()), Vec::new()),
        };
        Self {
            message_id: report.message_id,
            holder_id: report.holder,
            outcome: outcome.to_string(),
            halt_reason,
            routes,
            skipped: report
                .skipped
                .into_iter()
                .map(|s| SkippedTargetResponse {
                    device_id: s.device_id,
                    reason: s.reason.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDevicesResponse {
    pub devices: Vec<DeviceNode>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_filter() {
        let query = ListMessagesQuery {
            status: Some("PENDING".into()),
            urgency: Some("critical".into()),
            ..Default::default()
        };
        let filter = query.filter().unwrap();
        assert_eq!(filter.status, Some(MessageStatus::Pending));
        assert_eq!(filter.urgency, Some(Urgency::Critical));
        assert!(filter.category.is_none());

        let bad = ListMessagesQuery {
            message_type: Some("PIZZA".into()),
            ..Default::default()
        };
        assert!(matches!(bad.filter(), Err(ApiError::InvalidRequest(_))));
    }

    #[test]
    fn test_query_near_requires_all_fields() {
        let partial = ListMessagesQuery {
            latitude: Some(1.0),
            ..Default::default()
        };
        assert!(partial.near().is_err());
        assert!(ListMessagesQuery::default().near().unwrap().is_none());
    }
}
