use crate::model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for ArchiveError {
    fn from(err: sqlx::Error) -> Self {
        ArchiveError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::SerializationError(err.to_string())
    }
}

impl From<ModelError> for ArchiveError {
    fn from(err: ModelError) -> Self {
        ArchiveError::Corrupt(err.to_string())
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
