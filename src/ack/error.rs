use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AckError {
    #[error("Acknowledging device id must not be empty")]
    EmptyAcker,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type AckResult<T> = Result<T, AckError>;
