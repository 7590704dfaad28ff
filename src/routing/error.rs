use crate::model::{DeviceId, MessageId};
use crate::routing::route_log::RouteError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Device {device_id} does not hold message {message_id}")]
    NotHeld {
        message_id: MessageId,
        device_id: DeviceId,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Route error: {0}")]
    Route(#[from] RouteError),
}

pub type RelayResult<T> = Result<T, RelayError>;
