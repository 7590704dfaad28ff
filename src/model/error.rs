use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid message type: {0}")]
    InvalidCategory(String),

    #[error("Invalid urgency level: {0}")]
    InvalidUrgency(String),

    #[error("Invalid message status: {0}")]
    InvalidStatus(String),

    #[error("Invalid coordinates: ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("Expiry {expires_at} must be after creation time {created_at}")]
    InvalidExpiry {
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

pub type ModelResult<T> = Result<T, ModelError>;
