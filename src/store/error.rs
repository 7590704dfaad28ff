use crate::model::{MessageId, MessageStatus, ModelError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("Message expired: {0}")]
    ExpiredMessage(MessageId),

    #[error("Invalid message: {0}")]
    Invalid(#[from] ModelError),
}

pub type StoreResult<T> = Result<T, StoreError>;
