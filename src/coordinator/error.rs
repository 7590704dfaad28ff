use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Model error: {0}")]
    ModelError(#[from] crate::model::ModelError),

    #[error("Store error: {0}")]
    StoreError(#[from] crate::store::StoreError),

    #[error("Relay error: {0}")]
    RelayError(#[from] crate::routing::RelayError),

    #[error("Acknowledgment error: {0}")]
    AckError(#[from] crate::ack::AckError),

    #[error("Archive error: {0}")]
    ArchiveError(#[from] crate::persistence::ArchiveError),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
